//! Remote record storage over a PostgREST-compatible HTTP API.
//!
//! Three tables back the store: `models`, `conversations` (scoped by `user_id`),
//! and `messages` (joined on `conversation_id`, read in `timestamp` order).

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::try_join_all;
use quill_config::RemoteSettings;
use quill_core::{
    ChatError, Conversation, ConversationStore, ConversationUpdate, Message, MessageRole, Model,
    ModelCatalog, Result,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct ModelRow {
    id: String,
    name: String,
    context_window: i64,
    cost_per_1k: f64,
}

#[derive(Debug, Deserialize)]
struct ConversationRow {
    id: String,
    title: String,
    model_id: String,
    created_at: Option<String>,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRow {
    id: String,
    role: String,
    content: String,
    tokens: Option<i64>,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
struct NewConversation<'a> {
    title: &'a str,
    model_id: &'a str,
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ConversationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct NewMessage<'a> {
    conversation_id: &'a str,
    role: &'a str,
    content: &'a str,
    tokens: Option<usize>,
    timestamp: i64,
}

#[derive(Clone, Copy)]
enum Access {
    Read,
    Write,
}

impl Access {
    fn error(self, context: &str) -> ChatError {
        match self {
            Access::Read => ChatError::StoreRead(context.to_string()),
            Access::Write => ChatError::StoreWrite(context.to_string()),
        }
    }
}

pub struct RemoteStore {
    client: reqwest::Client,
    rest_url: String,
    user_id: String,
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("rest_url", &self.rest_url)
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl RemoteStore {
    pub fn new(settings: &RemoteSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(&settings.api_key)
            .map_err(|e| ChatError::Config(format!("Invalid remote api_key: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", settings.api_key))
            .map_err(|e| ChatError::Config(format!("Invalid remote api_key: {}", e)))?;
        headers.insert("apikey", api_key);
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ChatError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let rest_url = format!("{}/rest/v1", settings.url.trim_end_matches('/'));
        info!("Using remote conversation store at {}", rest_url);

        Ok(Self {
            client,
            rest_url,
            user_id: settings.user_id.clone(),
        })
    }

    fn table(&self, name: &str) -> String {
        format!("{}/{}", self.rest_url, name)
    }

    async fn dispatch(request: RequestBuilder, access: Access, context: &str) -> Result<Response> {
        request.send().await.map_err(|e| {
            warn!("{}: {}", context, e);
            access.error(context)
        })
    }

    async fn send(request: RequestBuilder, access: Access, context: &str) -> Result<Response> {
        let response = Self::dispatch(request, access, context).await?;
        Self::check(response, access, context).await
    }

    async fn check(response: Response, access: Access, context: &str) -> Result<Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("{}: HTTP {} {}", context, status.as_u16(), body);
            return Err(access.error(context));
        }
        Ok(response)
    }

    async fn fetch<T: DeserializeOwned>(
        request: RequestBuilder,
        access: Access,
        context: &str,
    ) -> Result<T> {
        let response = Self::send(request, access, context).await?;
        Self::decode(response, access, context).await
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        access: Access,
        context: &str,
    ) -> Result<T> {
        response.json::<T>().await.map_err(|e| {
            warn!("{}: unreadable response: {}", context, e);
            access.error(context)
        })
    }

    /// Whether `id` names a conversation of the configured user. Message rows
    /// carry no user column, so every message write is checked against this first.
    async fn owns_conversation(&self, id: &str, access: Access, context: &str) -> Result<bool> {
        let request = self.client.get(self.table("conversations")).query(&[
            ("select", "id".to_string()),
            ("id", format!("eq.{}", id)),
            ("user_id", format!("eq.{}", self.user_id)),
        ]);
        let rows: Vec<serde_json::Value> = Self::fetch(request, access, context).await?;
        Ok(!rows.is_empty())
    }

    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let request = self.client.get(self.table("messages")).query(&[
            ("select", "*".to_string()),
            ("conversation_id", format!("eq.{}", conversation_id)),
            ("order", "timestamp.asc".to_string()),
        ]);
        let rows: Vec<MessageRow> =
            Self::fetch(request, Access::Read, "Failed to load messages").await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn touch_conversation(&self, id: &str) -> Result<Vec<serde_json::Value>> {
        let patch = ConversationPatch {
            title: None,
            updated_at: now_rfc3339(),
        };
        self.patch_conversation(id, &patch).await
    }

    async fn patch_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> Result<Vec<serde_json::Value>> {
        let request = self
            .client
            .patch(self.table("conversations"))
            .query(&[
                ("id", format!("eq.{}", id)),
                ("user_id", format!("eq.{}", self.user_id)),
            ])
            .header("Prefer", "return=representation")
            .json(patch);
        Self::fetch(request, Access::Write, "Failed to update conversation").await
    }
}

#[async_trait]
impl ConversationStore for RemoteStore {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let request = self.client.get(self.table("conversations")).query(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{}", self.user_id)),
            ("order", "updated_at.desc".to_string()),
        ]);
        let rows: Vec<ConversationRow> =
            Self::fetch(request, Access::Read, "Failed to load conversations").await?;

        let conversations = try_join_all(rows.into_iter().map(|row| async move {
            let messages = self.get_messages(&row.id).await?;
            let mut conversation = conversation_from_row(row);
            conversation.messages = messages;
            Ok::<_, ChatError>(conversation)
        }))
        .await?;

        debug!("Loaded {} remote conversations", conversations.len());
        Ok(conversations)
    }

    async fn create_conversation(&self, title: &str, model_id: &str) -> Result<Conversation> {
        let request = self
            .client
            .post(self.table("conversations"))
            .header("Prefer", "return=representation")
            .json(&NewConversation {
                title,
                model_id,
                user_id: &self.user_id,
            });
        let rows: Vec<ConversationRow> =
            Self::fetch(request, Access::Write, "Failed to create conversation").await?;

        let conversation = rows
            .into_iter()
            .next()
            .map(conversation_from_row)
            .ok_or_else(|| ChatError::StoreWrite("Failed to create conversation".into()))?;

        info!("Created new conversation: {}", conversation.id);
        Ok(conversation)
    }

    async fn update_conversation(&self, id: &str, update: ConversationUpdate) -> Result<()> {
        let patch = ConversationPatch {
            title: update.title,
            updated_at: now_rfc3339(),
        };
        let updated = self.patch_conversation(id, &patch).await?;
        if updated.is_empty() {
            return Err(ChatError::StoreNotFound(id.to_string()));
        }

        debug!("Updated conversation {}", id);
        Ok(())
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        const CONTEXT: &str = "Failed to delete conversation";
        if !self.owns_conversation(id, Access::Write, CONTEXT).await? {
            debug!("Conversation {} already absent", id);
            return Ok(());
        }

        let request = self
            .client
            .delete(self.table("messages"))
            .query(&[("conversation_id", format!("eq.{}", id))]);
        Self::send(request, Access::Write, CONTEXT).await?;

        let request = self.client.delete(self.table("conversations")).query(&[
            ("id", format!("eq.{}", id)),
            ("user_id", format!("eq.{}", self.user_id)),
        ]);
        Self::send(request, Access::Write, CONTEXT).await?;

        info!("Deleted conversation {}", id);
        Ok(())
    }

    async fn add_message(&self, conversation_id: &str, message: Message) -> Result<Message> {
        const CONTEXT: &str = "Failed to add message";
        if !self
            .owns_conversation(conversation_id, Access::Write, CONTEXT)
            .await?
        {
            return Err(ChatError::StoreNotFound(conversation_id.to_string()));
        }

        let request = self
            .client
            .post(self.table("messages"))
            .header("Prefer", "return=representation")
            .json(&NewMessage {
                conversation_id,
                role: message.role.as_str(),
                content: &message.content,
                tokens: message.tokens,
                timestamp: message.timestamp,
            });
        let response = Self::dispatch(request, Access::Write, CONTEXT).await?;
        // Foreign-key violation: the conversation was removed after the ownership check.
        if response.status() == StatusCode::CONFLICT {
            warn!("{}: conversation {} is gone", CONTEXT, conversation_id);
            return Err(ChatError::StoreNotFound(conversation_id.to_string()));
        }
        let response = Self::check(response, Access::Write, CONTEXT).await?;
        let rows: Vec<MessageRow> = Self::decode(response, Access::Write, CONTEXT).await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::StoreWrite(CONTEXT.into()))?;
        let stored = message_from_row(row)?;

        // The message is already durable; a stale timestamp only affects ordering.
        if let Err(e) = self.touch_conversation(conversation_id).await {
            warn!("Could not bump updated_at for {}: {}", conversation_id, e);
        }

        debug!("Appended message {} to conversation {}", stored.id, conversation_id);
        Ok(stored)
    }
}

#[async_trait]
impl ModelCatalog for RemoteStore {
    async fn list_models(&self) -> Result<Vec<Model>> {
        let request = self
            .client
            .get(self.table("models"))
            .query(&[("select", "*"), ("order", "name.asc")]);
        let rows: Vec<ModelRow> =
            Self::fetch(request, Access::Read, "Failed to load models").await?;

        Ok(rows
            .into_iter()
            .map(|row| Model {
                id: row.id,
                name: row.name,
                context_window: usize::try_from(row.context_window).unwrap_or(0),
                cost_per_1k: row.cost_per_1k,
            })
            .collect())
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_millis(timestamp: Option<&str>) -> Option<i64> {
    timestamp
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.timestamp_millis())
}

fn conversation_from_row(row: ConversationRow) -> Conversation {
    let created_at = parse_millis(row.created_at.as_deref()).unwrap_or(0);
    let updated_at = parse_millis(row.updated_at.as_deref()).unwrap_or(created_at);
    Conversation {
        id: row.id,
        title: row.title,
        messages: Vec::new(),
        model: row.model_id,
        created_at,
        updated_at: updated_at.max(created_at),
    }
}

fn message_from_row(row: MessageRow) -> Result<Message> {
    let role = MessageRole::parse(&row.role).ok_or_else(|| {
        warn!("Message {} has unexpected role '{}'", row.id, row.role);
        ChatError::StoreRead("Failed to load messages".into())
    })?;
    Ok(Message {
        id: row.id,
        role,
        content: row.content,
        timestamp: row.timestamp,
        tokens: row.tokens.and_then(|t| usize::try_from(t).ok()),
    })
}
