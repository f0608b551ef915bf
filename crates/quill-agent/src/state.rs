//! In-memory application state and its transitions.
//!
//! The orchestrator never edits `ChatState` in place. Each step that the store
//! has confirmed is described as a `StateChange` and folded into the previous
//! state by `ChatState::apply`, which is pure and can be replayed.

use quill_core::{Conversation, Message};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatState {
    pub conversations: Vec<Conversation>,
    pub current_conversation_id: Option<String>,
    pub selected_model: String,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    Loaded(Vec<Conversation>),
    /// Prepends the conversation and selects it.
    ConversationCreated(Conversation),
    ConversationSelected(Option<String>),
    ConversationDeleted(String),
    MessageAppended {
        conversation_id: String,
        message: Message,
        at: i64,
    },
    TitleChanged {
        conversation_id: String,
        title: String,
        at: i64,
    },
    ModelSelected(String),
    SendStarted,
    SendFinished,
    Failed(String),
    ErrorCleared,
}

impl ChatState {
    pub fn new(selected_model: impl Into<String>) -> Self {
        Self {
            selected_model: selected_model.into(),
            ..Default::default()
        }
    }

    pub fn apply(mut self, change: StateChange) -> Self {
        match change {
            StateChange::Loaded(conversations) => {
                self.conversations = conversations;
                let stale = self
                    .current_conversation_id
                    .as_deref()
                    .is_some_and(|id| self.conversation(id).is_none());
                if stale {
                    self.current_conversation_id = None;
                }
            }
            StateChange::ConversationCreated(conversation) => {
                self.current_conversation_id = Some(conversation.id.clone());
                self.conversations.insert(0, conversation);
            }
            StateChange::ConversationSelected(id) => {
                self.current_conversation_id = id;
            }
            StateChange::ConversationDeleted(id) => {
                self.conversations.retain(|c| c.id != id);
                if self.current_conversation_id.as_deref() == Some(id.as_str()) {
                    self.current_conversation_id =
                        self.most_recently_updated().map(|c| c.id.clone());
                }
            }
            StateChange::MessageAppended {
                conversation_id,
                message,
                at,
            } => {
                if let Some(conversation) = self.conversation_mut(&conversation_id) {
                    conversation.messages.push(message);
                    conversation.touch(at);
                }
            }
            StateChange::TitleChanged {
                conversation_id,
                title,
                at,
            } => {
                if let Some(conversation) = self.conversation_mut(&conversation_id) {
                    conversation.title = title;
                    conversation.touch(at);
                }
            }
            StateChange::ModelSelected(model) => {
                self.selected_model = model;
            }
            StateChange::SendStarted => {
                self.is_loading = true;
                self.error = None;
            }
            StateChange::SendFinished => {
                self.is_loading = false;
            }
            StateChange::Failed(message) => {
                self.is_loading = false;
                self.error = Some(message);
            }
            StateChange::ErrorCleared => {
                self.error = None;
            }
        }
        self
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    fn conversation_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.current_conversation_id
            .as_deref()
            .and_then(|id| self.conversation(id))
    }

    /// Conversations as presented: most recently updated first.
    pub fn conversations_sorted(&self) -> Vec<&Conversation> {
        let mut sorted: Vec<&Conversation> = self.conversations.iter().collect();
        sorted.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sorted
    }

    pub fn most_recently_updated(&self) -> Option<&Conversation> {
        self.conversations.iter().max_by_key(|c| c.updated_at)
    }
}
