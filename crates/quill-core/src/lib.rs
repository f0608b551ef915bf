use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Title given to conversations before the first message names them.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Chat";

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<usize>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: now_millis(),
            tokens: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn with_tokens(mut self, tokens: usize) -> Self {
        self.tokens = Some(tokens);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    /// Insertion order; never re-sorted.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Identifier of the model the conversation was started with.
    pub model: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    pub fn new(title: impl Into<String>, model: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            messages: Vec::new(),
            model: model.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves `updated_at` forward, never behind `created_at`.
    pub fn touch(&mut self, at: i64) {
        self.updated_at = at.max(self.created_at);
    }
}

/// Partial update applied by `ConversationStore::update_conversation`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ConversationUpdate {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub name: String,
    /// Token budget for a single request, prompt and reply together.
    pub context_window: usize,
    /// Informational only.
    #[serde(default)]
    pub cost_per_1k: f64,
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("OpenAI API key is required")]
    MissingCredential,

    #[error("Context limit exceeded: {required} of {window} tokens")]
    ContextLimitExceeded { required: usize, window: usize },

    #[error("Store read failed: {0}")]
    StoreRead(String),

    #[error("Store write failed: {0}")]
    StoreWrite(String),

    #[error("Conversation not found: {0}")]
    StoreNotFound(String),

    #[error("{0}")]
    Completion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ChatError {
    /// The single message shown to the user when an operation fails.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::MissingCredential => {
                "Please set your OpenAI API key in settings".to_string()
            }
            ChatError::ContextLimitExceeded { .. } => "Context limit exceeded".to_string(),
            ChatError::StoreRead(detail) | ChatError::StoreWrite(detail) => detail.clone(),
            ChatError::Completion(detail) => detail.clone(),
            ChatError::Unknown(_) => "An error occurred".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_missing_credential(&self) -> bool {
        matches!(self, ChatError::MissingCredential)
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

/// Durable CRUD for conversations and their message sequences.
///
/// Every backend honours the same contract and error taxonomy, so callers never
/// need to know which one is active.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    /// All conversations with full message sequences, in no particular order.
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    async fn create_conversation(&self, title: &str, model_id: &str) -> Result<Conversation>;

    /// Fails with `StoreNotFound` when `id` is absent.
    async fn update_conversation(&self, id: &str, update: ConversationUpdate) -> Result<()>;

    /// Deleting an id that does not exist succeeds.
    async fn delete_conversation(&self, id: &str) -> Result<()>;

    /// Returns the message as stored, which may carry a backend-assigned id.
    async fn add_message(&self, conversation_id: &str, message: Message) -> Result<Message>;
}

#[async_trait::async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Models ordered by display name.
    async fn list_models(&self) -> Result<Vec<Model>>;
}

#[async_trait::async_trait]
pub trait Completion: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        model_id: &str,
        credential: &str,
    ) -> Result<String>;
}
