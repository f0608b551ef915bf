use async_trait::async_trait;
use quill_config::KeyValueDir;
use quill_core::{
    now_millis, ChatError, Conversation, ConversationStore, ConversationUpdate, Message, Result,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Key of the single record holding every conversation.
pub const CONVERSATIONS_KEY: &str = "chat-conversations";

/// Replaces the record-level detail of a storage failure with the message of
/// the operation that failed, matching what the remote backend reports.
fn in_context(context: &'static str) -> impl Fn(ChatError) -> ChatError {
    move |error| match error {
        ChatError::StoreRead(detail) => {
            warn!("{}: {}", context, detail);
            ChatError::StoreRead(context.to_string())
        }
        ChatError::StoreWrite(detail) => {
            warn!("{}: {}", context, detail);
            ChatError::StoreWrite(context.to_string())
        }
        other => other,
    }
}

/// Device-local conversation storage.
///
/// The full ordered list of conversations, messages nested, lives in one JSON
/// document. Every mutation reads the document, changes it, and writes it back whole.
pub struct LocalStore {
    kv: KeyValueDir,
    write_lock: Mutex<()>,
}

impl LocalStore {
    pub fn new(kv: KeyValueDir) -> Self {
        debug!("LocalStore initialized at {:?}", kv.dir());
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<Vec<Conversation>> {
        Ok(self.kv.get(CONVERSATIONS_KEY)?.unwrap_or_default())
    }

    fn write_all(&self, conversations: &[Conversation]) -> Result<()> {
        self.kv.set(CONVERSATIONS_KEY, conversations)
    }

    /// Read-modify-write of a single conversation.
    async fn modify<T>(
        &self,
        id: &str,
        context: &'static str,
        change: impl FnOnce(&mut Conversation) -> T,
    ) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut conversations = self.read_all().map_err(in_context(context))?;
        let conversation = conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ChatError::StoreNotFound(id.to_string()))?;

        let result = change(conversation);
        self.write_all(&conversations).map_err(in_context(context))?;
        Ok(result)
    }
}

#[async_trait]
impl ConversationStore for LocalStore {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let conversations = self
            .read_all()
            .map_err(in_context("Failed to load conversations"))?;
        debug!("Loaded {} conversations", conversations.len());
        Ok(conversations)
    }

    async fn create_conversation(&self, title: &str, model_id: &str) -> Result<Conversation> {
        let context = in_context("Failed to create conversation");
        let _guard = self.write_lock.lock().await;
        let mut conversations = self.read_all().map_err(&context)?;
        let conversation = Conversation::new(title, model_id);
        conversations.insert(0, conversation.clone());
        self.write_all(&conversations).map_err(&context)?;

        info!("Created new conversation: {}", conversation.id);
        Ok(conversation)
    }

    async fn update_conversation(&self, id: &str, update: ConversationUpdate) -> Result<()> {
        self.modify(id, "Failed to update conversation", |conversation| {
            if let Some(title) = update.title {
                conversation.title = title;
            }
            conversation.touch(now_millis());
        })
        .await?;

        debug!("Updated conversation {}", id);
        Ok(())
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        let context = in_context("Failed to delete conversation");
        let _guard = self.write_lock.lock().await;
        let mut conversations = self.read_all().map_err(&context)?;
        let before = conversations.len();
        conversations.retain(|c| c.id != id);

        if conversations.len() == before {
            debug!("Conversation {} already absent", id);
            return Ok(());
        }

        self.write_all(&conversations).map_err(&context)?;
        info!("Deleted conversation {}", id);
        Ok(())
    }

    async fn add_message(&self, conversation_id: &str, message: Message) -> Result<Message> {
        let stored = message.clone();
        self.modify(conversation_id, "Failed to add message", |conversation| {
            conversation.messages.push(message);
            conversation.touch(now_millis());
        })
        .await?;

        debug!("Appended message to conversation {}", conversation_id);
        Ok(stored)
    }
}
