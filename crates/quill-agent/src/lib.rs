use quill_client::CompletionClient;
use quill_config::{AppConfig, Settings, SettingsStore};
use quill_conversation::{find_model, open_backend};
use quill_core::{
    now_millis, ChatError, Completion, Conversation, ConversationStore, ConversationUpdate,
    Message, Model, ModelCatalog, Result, DEFAULT_CONVERSATION_TITLE,
};
use quill_metrics::{
    can_send, context_usage, estimate_tokens, required_tokens, ContextUsage, CostCalculator,
    UsageStats, UsageTracker,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub mod state;

pub use state::{ChatState, StateChange};

/// Longest auto-derived title before it is cut and given an ellipsis.
pub const TITLE_MAX_CHARS: usize = 50;

const LOAD_FAILED_MESSAGE: &str = "Failed to load data from database";

/// Side effects the front end is asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiSignal {
    CredentialPromptRequested,
}

/// Where a send currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPhase {
    Idle,
    Gating,
    PersistingUserMessage,
    AwaitingCompletion,
    PersistingReply,
    Error,
}

/// Title derived from a conversation's first message.
pub fn derive_title(content: &str) -> String {
    if content.chars().count() > TITLE_MAX_CHARS {
        let truncated: String = content.chars().take(TITLE_MAX_CHARS).collect();
        format!("{truncated}...")
    } else {
        content.to_string()
    }
}

/// Ties the store, the completion client, and the in-memory state together.
///
/// Every public operation catches its own failures and records them as the
/// user-visible `error` in `ChatState`; nothing is retried.
pub struct Orchestrator {
    state: ChatState,
    phase: SendPhase,
    models: Vec<Model>,
    settings: Settings,
    settings_store: SettingsStore,
    store: Arc<dyn ConversationStore>,
    completion: Arc<dyn Completion>,
    usage: UsageTracker,
    signals: Vec<UiSignal>,
}

impl Orchestrator {
    /// Startup: fetches conversations and the model catalog concurrently and
    /// reads the persisted settings.
    pub async fn load(
        store: Arc<dyn ConversationStore>,
        catalog: Arc<dyn ModelCatalog>,
        completion: Arc<dyn Completion>,
        settings_store: SettingsStore,
        default_model: &str,
    ) -> Self {
        let settings = settings_store.load().unwrap_or_else(|e| {
            warn!("Failed to load settings: {}", e);
            Settings::default()
        });
        let selected_model = settings
            .selected_model
            .clone()
            .unwrap_or_else(|| default_model.to_string());

        let mut state = ChatState::new(selected_model);
        let models = match futures::try_join!(store.list_conversations(), catalog.list_models()) {
            Ok((conversations, models)) => {
                info!(
                    "Loaded {} conversations and {} models",
                    conversations.len(),
                    models.len()
                );
                state = state.apply(StateChange::Loaded(conversations));
                models
            }
            Err(e) => {
                warn!("Failed to load data: {}", e);
                state = state.apply(StateChange::Failed(LOAD_FAILED_MESSAGE.to_string()));
                Vec::new()
            }
        };

        Self {
            state,
            phase: SendPhase::Idle,
            models,
            settings,
            settings_store,
            store,
            completion,
            usage: UsageTracker::new(),
            signals: Vec::new(),
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let backend = open_backend(config)?;
        let completion = Arc::new(CompletionClient::from_config(config));
        Ok(Self::load(
            backend.store,
            backend.catalog,
            completion,
            config.settings_store(),
            &config.app.default_model,
        )
        .await)
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn phase(&self) -> SendPhase {
        self.phase
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn has_credential(&self) -> bool {
        self.settings.has_credential()
    }

    pub fn conversations_sorted(&self) -> Vec<&Conversation> {
        self.state.conversations_sorted()
    }

    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.state.current_conversation()
    }

    /// The selected model, or the first catalog entry when the selection is unknown.
    pub fn current_model(&self) -> Option<&Model> {
        find_model(&self.models, &self.state.selected_model)
    }

    fn current_messages(&self) -> &[Message] {
        self.current_conversation()
            .map(|c| c.messages.as_slice())
            .unwrap_or_default()
    }

    pub fn context_usage(&self) -> Option<ContextUsage> {
        let model = self.current_model()?;
        Some(ContextUsage::of(self.current_messages(), model.context_window))
    }

    /// Whether `text` fits the current conversation. Always true when no
    /// context window is known.
    pub fn can_send(&self, text: &str) -> bool {
        self.context_gate(text).is_none()
    }

    pub fn usage_stats(&self) -> UsageStats {
        self.usage.get_stats()
    }

    pub fn session_cost(&self) -> f64 {
        CostCalculator::from_models(&self.models).session_cost(&self.usage)
    }

    pub fn take_signals(&mut self) -> Vec<UiSignal> {
        std::mem::take(&mut self.signals)
    }

    fn commit(&mut self, change: StateChange) {
        debug!("State change: {:?}", change);
        self.state = std::mem::take(&mut self.state).apply(change);
    }

    fn enter(&mut self, phase: SendPhase) {
        debug!("Send phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn fail(&mut self, error: ChatError) {
        warn!("{}", error);
        self.enter(SendPhase::Error);
        self.commit(StateChange::Failed(error.user_message()));
        self.enter(SendPhase::Idle);
    }

    pub fn clear_error(&mut self) {
        self.commit(StateChange::ErrorCleared);
    }

    /// Sends `content` in the current conversation and returns the stored reply.
    ///
    /// Progress is not rolled back on failure: a persisted user message stays.
    #[instrument(skip(self, content))]
    pub async fn send_message(&mut self, content: &str) -> Option<Message> {
        match self.try_send(content).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    async fn try_send(&mut self, content: &str) -> Result<Message> {
        self.enter(SendPhase::Gating);
        if !self.settings.has_credential() {
            self.signals.push(UiSignal::CredentialPromptRequested);
            return Err(ChatError::MissingCredential);
        }
        if let Some(error) = self.context_gate(content) {
            return Err(error);
        }

        let conversation_id = match self.current_conversation() {
            Some(conversation) => conversation.id.clone(),
            None => {
                let conversation = self
                    .store
                    .create_conversation(DEFAULT_CONVERSATION_TITLE, &self.state.selected_model)
                    .await?;
                let id = conversation.id.clone();
                self.commit(StateChange::ConversationCreated(conversation));
                id
            }
        };
        let model_id = self.state.selected_model.clone();

        self.commit(StateChange::SendStarted);
        self.enter(SendPhase::PersistingUserMessage);
        let user_message = Message::user(content).with_tokens(estimate_tokens(content));
        let stored = self.store.add_message(&conversation_id, user_message).await?;
        self.commit(StateChange::MessageAppended {
            conversation_id: conversation_id.clone(),
            message: stored,
            at: now_millis(),
        });

        self.auto_title(&conversation_id).await?;

        self.enter(SendPhase::AwaitingCompletion);
        let history = self
            .state
            .conversation(&conversation_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default();
        let reply_text = self
            .completion
            .complete(&history, &model_id, &self.settings.api_key)
            .await?;

        self.enter(SendPhase::PersistingReply);
        let reply_tokens = estimate_tokens(&reply_text);
        let reply = Message::assistant(reply_text).with_tokens(reply_tokens);
        let stored_reply = self.store.add_message(&conversation_id, reply).await?;
        self.commit(StateChange::MessageAppended {
            conversation_id,
            message: stored_reply.clone(),
            at: now_millis(),
        });
        self.usage
            .record_exchange(&model_id, context_usage(&history), reply_tokens);

        self.commit(StateChange::SendFinished);
        self.enter(SendPhase::Idle);
        Ok(stored_reply)
    }

    /// Runs whenever a context window is known. With no conversation selected
    /// the history is empty.
    fn context_gate(&self, content: &str) -> Option<ChatError> {
        let model = self.current_model()?;
        let messages = self.current_messages();
        if can_send(messages, content, model.context_window as i64) {
            return None;
        }
        Some(ChatError::ContextLimitExceeded {
            required: required_tokens(messages, content),
            window: model.context_window,
        })
    }

    /// Names a conversation after its first message. Runs only while the
    /// conversation holds exactly one message.
    async fn auto_title(&mut self, conversation_id: &str) -> Result<()> {
        let first = match self.state.conversation(conversation_id) {
            Some(conversation) if conversation.messages.len() == 1 => {
                conversation.messages[0].content.clone()
            }
            _ => return Ok(()),
        };

        let title = derive_title(&first);
        self.store
            .update_conversation(conversation_id, ConversationUpdate::title(title.clone()))
            .await?;
        self.commit(StateChange::TitleChanged {
            conversation_id: conversation_id.to_string(),
            title,
            at: now_millis(),
        });
        Ok(())
    }

    /// Starts an empty conversation with the selected model and selects it.
    pub async fn new_chat(&mut self) -> Option<String> {
        match self
            .store
            .create_conversation(DEFAULT_CONVERSATION_TITLE, &self.state.selected_model)
            .await
        {
            Ok(conversation) => {
                let id = conversation.id.clone();
                self.commit(StateChange::ConversationCreated(conversation));
                Some(id)
            }
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    pub fn select_conversation(&mut self, id: &str) -> bool {
        if self.state.conversation(id).is_none() {
            self.fail(ChatError::StoreNotFound(id.to_string()));
            return false;
        }
        self.commit(StateChange::ConversationSelected(Some(id.to_string())));
        true
    }

    /// Removes a conversation. An id the store no longer knows counts as deleted.
    pub async fn delete_conversation(&mut self, id: &str) -> bool {
        match self.store.delete_conversation(id).await {
            Ok(()) | Err(ChatError::StoreNotFound(_)) => {
                self.commit(StateChange::ConversationDeleted(id.to_string()));
                true
            }
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    pub async fn rename_conversation(&mut self, id: &str, title: &str) -> bool {
        let update = ConversationUpdate::title(title);
        match self.store.update_conversation(id, update).await {
            Ok(()) => {
                self.commit(StateChange::TitleChanged {
                    conversation_id: id.to_string(),
                    title: title.to_string(),
                    at: now_millis(),
                });
                true
            }
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    pub fn select_model(&mut self, model_id: &str) -> bool {
        if !self.models.is_empty() && !self.models.iter().any(|m| m.id == model_id) {
            self.fail(ChatError::Config(format!("Unknown model: {model_id}")));
            return false;
        }
        if let Err(e) = self.settings_store.set_selected_model(model_id) {
            self.fail(e);
            return false;
        }
        self.settings.selected_model = Some(model_id.to_string());
        self.commit(StateChange::ModelSelected(model_id.to_string()));
        true
    }

    pub fn set_credential(&mut self, api_key: &str) -> bool {
        let api_key = api_key.trim();
        if let Err(e) = self.settings_store.set_api_key(api_key) {
            self.fail(e);
            return false;
        }
        self.settings.api_key = api_key.to_string();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::{mock, predicate::eq};
    use quill_config::KeyValueDir;
    use quill_conversation::ConfiguredCatalog;
    use tempfile::TempDir;

    mock! {
        pub Store {}

        #[async_trait]
        impl ConversationStore for Store {
            async fn list_conversations(&self) -> Result<Vec<Conversation>>;
            async fn create_conversation(&self, title: &str, model_id: &str) -> Result<Conversation>;
            async fn update_conversation(&self, id: &str, update: ConversationUpdate) -> Result<()>;
            async fn delete_conversation(&self, id: &str) -> Result<()>;
            async fn add_message(&self, conversation_id: &str, message: Message) -> Result<Message>;
        }
    }

    mock! {
        pub Catalog {}

        #[async_trait]
        impl ModelCatalog for Catalog {
            async fn list_models(&self) -> Result<Vec<Model>>;
        }
    }

    mock! {
        pub Llm {}

        #[async_trait]
        impl Completion for Llm {
            async fn complete(
                &self,
                messages: &[Message],
                model_id: &str,
                credential: &str,
            ) -> Result<String>;
        }
    }

    const LONG_PROMPT: &str =
        "Explain quantum computing in simple terms for a beginner audience please";

    fn model(id: &str, context_window: usize) -> Model {
        Model {
            id: id.to_string(),
            name: id.to_string(),
            context_window,
            cost_per_1k: 0.001,
        }
    }

    fn conversation(id: &str, updated_at: i64, messages: Vec<Message>) -> Conversation {
        Conversation {
            id: id.to_string(),
            title: format!("Chat {id}"),
            messages,
            model: "gpt-4o-mini".to_string(),
            created_at: 1,
            updated_at,
        }
    }

    fn store_with(conversations: Vec<Conversation>) -> MockStore {
        let mut store = MockStore::new();
        store
            .expect_list_conversations()
            .times(1)
            .returning(move || Ok(conversations.clone()));
        store
    }

    async fn orchestrator(
        temp_dir: &TempDir,
        store: MockStore,
        llm: MockLlm,
        api_key: &str,
        models: Vec<Model>,
    ) -> Orchestrator {
        let settings_store = SettingsStore::new(KeyValueDir::new(temp_dir.path()));
        if !api_key.is_empty() {
            settings_store.set_api_key(api_key).unwrap();
        }
        Orchestrator::load(
            Arc::new(store),
            Arc::new(ConfiguredCatalog::new(models)),
            Arc::new(llm),
            settings_store,
            "gpt-4o-mini",
        )
        .await
    }

    #[test]
    fn test_derive_title() {
        let title = derive_title(LONG_PROMPT);
        assert_eq!(title, "Explain quantum computing in simple terms for a be...");
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);

        let exact = "x".repeat(TITLE_MAX_CHARS);
        assert_eq!(derive_title(&exact), exact);
        assert_eq!(derive_title("Short"), "Short");
    }

    #[tokio::test]
    async fn test_missing_credential_touches_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(Vec::new());
        let mut llm = MockLlm::new();
        llm.expect_complete().never();

        let mut orchestrator =
            orchestrator(&temp_dir, store, llm, "", vec![model("gpt-4o-mini", 128_000)]).await;

        assert!(orchestrator.send_message("hello").await.is_none());
        assert_eq!(
            orchestrator.state().error.as_deref(),
            Some(ChatError::MissingCredential.user_message().as_str())
        );
        assert!(orchestrator.state().conversations.is_empty());
        assert_eq!(orchestrator.state().current_conversation_id, None);
        assert_eq!(
            orchestrator.take_signals(),
            vec![UiSignal::CredentialPromptRequested]
        );
        assert!(orchestrator.take_signals().is_empty());
        assert_eq!(orchestrator.phase(), SendPhase::Idle);
    }

    #[tokio::test]
    async fn test_first_send_creates_titles_and_replies() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_with(Vec::new());
        let created = conversation("c1", 1, Vec::new());
        store
            .expect_create_conversation()
            .withf(|title, model_id| title == "New Chat" && model_id == "gpt-4o-mini")
            .times(1)
            .returning(move |_, _| Ok(created.clone()));
        store
            .expect_add_message()
            .times(2)
            .returning(|_, message| Ok(message));
        store
            .expect_update_conversation()
            .with(
                eq("c1"),
                eq(ConversationUpdate::title(derive_title(LONG_PROMPT))),
            )
            .times(1)
            .returning(|_, _| Ok(()));

        let mut llm = MockLlm::new();
        llm.expect_complete()
            .withf(|messages, model_id, credential| {
                messages.len() == 1
                    && messages[0].content == LONG_PROMPT
                    && model_id == "gpt-4o-mini"
                    && credential == "sk-test"
            })
            .times(1)
            .returning(|_, _, _| Ok("Qubits can be 0 and 1 at once.".to_string()));

        let mut orchestrator = orchestrator(
            &temp_dir,
            store,
            llm,
            "sk-test",
            vec![model("gpt-4o-mini", 128_000)],
        )
        .await;

        let reply = orchestrator.send_message(LONG_PROMPT).await.unwrap();
        assert_eq!(reply.content, "Qubits can be 0 and 1 at once.");
        assert_eq!(reply.tokens, Some(estimate_tokens(&reply.content)));

        let state = orchestrator.state();
        assert_eq!(state.current_conversation_id.as_deref(), Some("c1"));
        assert!(!state.is_loading);
        assert_eq!(state.error, None);

        let current = orchestrator.current_conversation().unwrap();
        assert_eq!(current.title, derive_title(LONG_PROMPT));
        assert_eq!(current.messages.len(), 2);
        assert_eq!(current.messages[0].tokens, Some(estimate_tokens(LONG_PROMPT)));
        assert!(current.updated_at >= current.created_at);

        let usage = orchestrator.usage_stats();
        assert_eq!(usage.requests, 1);
        assert_eq!(usage.prompt_tokens, estimate_tokens(LONG_PROMPT));
        assert!(orchestrator.session_cost() > 0.0);
    }

    #[tokio::test]
    async fn test_later_messages_never_retitle() {
        let temp_dir = TempDir::new().unwrap();
        let existing = conversation(
            "c1",
            5,
            vec![Message::user("first"), Message::assistant("reply")],
        );
        let mut store = store_with(vec![existing]);
        store
            .expect_add_message()
            .times(2)
            .returning(|_, message| Ok(message));
        store.expect_update_conversation().never();

        let mut llm = MockLlm::new();
        llm.expect_complete()
            .withf(|messages, _, _| messages.len() == 3)
            .times(1)
            .returning(|_, _, _| Ok("again".to_string()));

        let mut orchestrator =
            orchestrator(&temp_dir, store, llm, "sk-test", vec![model("gpt-4o-mini", 128_000)])
                .await;
        assert!(orchestrator.select_conversation("c1"));

        assert!(orchestrator.send_message(LONG_PROMPT).await.is_some());
        let current = orchestrator.current_conversation().unwrap();
        assert_eq!(current.title, "Chat c1");
        assert_eq!(current.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_completion_failure_keeps_user_message() {
        let temp_dir = TempDir::new().unwrap();
        let existing = conversation("c1", 5, vec![Message::user("first")]);
        let mut store = store_with(vec![existing]);
        store
            .expect_add_message()
            .times(1)
            .returning(|_, message| Ok(message));

        let mut llm = MockLlm::new();
        llm.expect_complete()
            .times(1)
            .returning(|_, _, _| Err(ChatError::Completion("rate limited".to_string())));

        let mut orchestrator =
            orchestrator(&temp_dir, store, llm, "sk-test", vec![model("gpt-4o-mini", 128_000)])
                .await;
        orchestrator.select_conversation("c1");

        assert!(orchestrator.send_message("second").await.is_none());
        let state = orchestrator.state();
        assert_eq!(state.error.as_deref(), Some("rate limited"));
        assert!(!state.is_loading);

        let current = orchestrator.current_conversation().unwrap();
        assert_eq!(current.messages.len(), 2);
        assert_eq!(current.messages[1].content, "second");
    }

    #[tokio::test]
    async fn test_store_failure_leaves_state_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let existing = conversation("c1", 5, Vec::new());
        let mut store = store_with(vec![existing]);
        store
            .expect_add_message()
            .times(1)
            .returning(|_, _| Err(ChatError::StoreWrite("Failed to add message".into())));
        let mut llm = MockLlm::new();
        llm.expect_complete().never();

        let mut orchestrator =
            orchestrator(&temp_dir, store, llm, "sk-test", vec![model("gpt-4o-mini", 128_000)])
                .await;
        orchestrator.select_conversation("c1");

        assert!(orchestrator.send_message("hello").await.is_none());
        assert_eq!(orchestrator.state().error.as_deref(), Some("Failed to add message"));
        assert!(orchestrator.current_conversation().unwrap().messages.is_empty());
        assert!(!orchestrator.state().is_loading);
    }

    #[tokio::test]
    async fn test_context_gate_blocks_before_any_store_call() {
        let temp_dir = TempDir::new().unwrap();
        // 400 characters = 100 tokens already used
        let existing = conversation("c1", 5, vec![Message::user("x".repeat(400))]);
        let store = store_with(vec![existing]);
        let mut llm = MockLlm::new();
        llm.expect_complete().never();

        let mut orchestrator =
            orchestrator(&temp_dir, store, llm, "sk-test", vec![model("gpt-4o-mini", 601)]).await;
        orchestrator.select_conversation("c1");

        // 100 + 1 + 500 = 601 fits; 100 + 2 + 500 does not
        assert!(orchestrator.can_send("abcd"));
        assert!(!orchestrator.can_send("abcde"));

        assert!(orchestrator.send_message("abcde").await.is_none());
        assert_eq!(orchestrator.state().error.as_deref(), Some("Context limit exceeded"));
        assert_eq!(orchestrator.current_conversation().unwrap().messages.len(), 1);

        let usage = orchestrator.context_usage().unwrap();
        assert_eq!(usage.used, 100);
        assert_eq!(usage.window, 601);
    }

    #[tokio::test]
    async fn test_context_gate_applies_without_selection() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_with(Vec::new());
        store.expect_create_conversation().never();
        store.expect_add_message().never();
        let mut llm = MockLlm::new();
        llm.expect_complete().never();

        let mut orchestrator =
            orchestrator(&temp_dir, store, llm, "sk-test", vec![model("gpt-4o-mini", 601)]).await;
        assert_eq!(orchestrator.state().current_conversation_id, None);

        let oversized = "x".repeat(4000);
        assert!(!orchestrator.can_send(&oversized));
        assert!(orchestrator.send_message(&oversized).await.is_none());

        assert_eq!(orchestrator.state().error.as_deref(), Some("Context limit exceeded"));
        assert!(orchestrator.state().conversations.is_empty());
        assert_eq!(orchestrator.state().current_conversation_id, None);
        assert!(!orchestrator.state().is_loading);
    }

    #[tokio::test]
    async fn test_delete_selected_selects_most_recent() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_with(vec![
            conversation("A", 10, Vec::new()),
            conversation("B", 20, Vec::new()),
        ]);
        store
            .expect_delete_conversation()
            .with(eq("B"))
            .times(1)
            .returning(|_| Ok(()));
        store
            .expect_delete_conversation()
            .with(eq("A"))
            .times(1)
            .returning(|id| Err(ChatError::StoreNotFound(id.to_string())));

        let mut orchestrator =
            orchestrator(&temp_dir, store, MockLlm::new(), "sk-test", Vec::new()).await;
        orchestrator.select_conversation("B");

        assert!(orchestrator.delete_conversation("B").await);
        assert_eq!(orchestrator.state().current_conversation_id.as_deref(), Some("A"));

        // A missing id is handled exactly like a successful delete.
        assert!(orchestrator.delete_conversation("A").await);
        assert_eq!(orchestrator.state().current_conversation_id, None);
        assert_eq!(orchestrator.state().error, None);
    }

    #[tokio::test]
    async fn test_delete_failure_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_with(vec![conversation("A", 10, Vec::new())]);
        store
            .expect_delete_conversation()
            .returning(|_| Err(ChatError::StoreWrite("Failed to delete conversation".into())));

        let mut orchestrator =
            orchestrator(&temp_dir, store, MockLlm::new(), "sk-test", Vec::new()).await;

        assert!(!orchestrator.delete_conversation("A").await);
        assert_eq!(orchestrator.state().conversations.len(), 1);
        assert_eq!(
            orchestrator.state().error.as_deref(),
            Some("Failed to delete conversation")
        );
    }

    #[tokio::test]
    async fn test_load_failure_reports_generic_message() {
        let temp_dir = TempDir::new().unwrap();
        let mut catalog = MockCatalog::new();
        catalog
            .expect_list_models()
            .returning(|| Err(ChatError::StoreRead("Failed to load models".into())));

        let orchestrator = Orchestrator::load(
            Arc::new(store_with(vec![conversation("A", 10, Vec::new())])),
            Arc::new(catalog),
            Arc::new(MockLlm::new()),
            SettingsStore::new(KeyValueDir::new(temp_dir.path())),
            "gpt-4o-mini",
        )
        .await;

        assert_eq!(orchestrator.state().error.as_deref(), Some(LOAD_FAILED_MESSAGE));
        assert!(orchestrator.state().conversations.is_empty());
        assert!(orchestrator.models().is_empty());
    }

    #[tokio::test]
    async fn test_model_and_credential_settings_persist() {
        let temp_dir = TempDir::new().unwrap();
        let models = vec![model("gpt-4", 8192), model("gpt-4o-mini", 128_000)];
        let mut orchestrator = orchestrator(
            &temp_dir,
            store_with(Vec::new()),
            MockLlm::new(),
            "",
            models.clone(),
        )
        .await;
        assert!(!orchestrator.has_credential());

        assert!(!orchestrator.select_model("gpt-9"));
        assert_eq!(orchestrator.state().selected_model, "gpt-4o-mini");
        assert!(orchestrator.state().error.is_some());
        orchestrator.clear_error();

        assert!(orchestrator.select_model("gpt-4"));
        assert!(orchestrator.set_credential("  sk-new \n"));
        assert!(orchestrator.has_credential());
        assert_eq!(orchestrator.current_model().unwrap().context_window, 8192);

        let reloaded = orchestrator_with_store(&temp_dir, models).await;
        assert_eq!(reloaded.state().selected_model, "gpt-4");
        assert!(reloaded.has_credential());
    }

    async fn orchestrator_with_store(temp_dir: &TempDir, models: Vec<Model>) -> Orchestrator {
        Orchestrator::load(
            Arc::new(store_with(Vec::new())),
            Arc::new(ConfiguredCatalog::new(models)),
            Arc::new(MockLlm::new()),
            SettingsStore::new(KeyValueDir::new(temp_dir.path())),
            "gpt-4o-mini",
        )
        .await
    }

    #[tokio::test]
    async fn test_new_chat_and_rename() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = store_with(vec![conversation("A", 10, Vec::new())]);
        let created = conversation("N", 30, Vec::new());
        store
            .expect_create_conversation()
            .times(1)
            .returning(move |_, _| Ok(created.clone()));
        store
            .expect_update_conversation()
            .with(eq("N"), eq(ConversationUpdate::title("Renamed")))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut orchestrator =
            orchestrator(&temp_dir, store, MockLlm::new(), "sk-test", Vec::new()).await;

        assert_eq!(orchestrator.new_chat().await.as_deref(), Some("N"));
        assert_eq!(orchestrator.state().current_conversation_id.as_deref(), Some("N"));
        assert!(orchestrator.rename_conversation("N", "Renamed").await);
        assert_eq!(orchestrator.conversations_sorted()[0].title, "Renamed");
        assert!(!orchestrator.select_conversation("missing"));
    }
}
