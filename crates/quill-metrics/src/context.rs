//! Context-window accounting.
//!
//! The send gate runs before any network call, against the same character
//! heuristic used everywhere else. The reply length is unknown until the call
//! returns, so a fixed budget is held back for it.

use crate::estimate_tokens;
use quill_core::Message;
use serde::{Deserialize, Serialize};

/// Tokens held back for the reply when deciding whether a message fits.
pub const RESERVED_RESPONSE_BUDGET: usize = 500;

/// Sum of the estimated tokens of every message, in sequence order.
pub fn context_usage(messages: &[Message]) -> usize {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

/// Tokens a request would need if `candidate` were sent after `messages`.
pub fn required_tokens(messages: &[Message], candidate: &str) -> usize {
    context_usage(messages) + estimate_tokens(candidate) + RESERVED_RESPONSE_BUDGET
}

/// Whether `candidate` fits. A window equal to the requirement still fits;
/// zero and negative windows never do.
pub fn can_send(messages: &[Message], candidate: &str, context_window: i64) -> bool {
    i64::try_from(required_tokens(messages, candidate))
        .map(|required| required <= context_window)
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsageLevel {
    Normal,
    Warning,
    Critical,
}

/// Snapshot of how much of a model's window a conversation occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextUsage {
    pub used: usize,
    pub window: usize,
}

impl ContextUsage {
    pub fn new(used: usize, window: usize) -> Self {
        Self { used, window }
    }

    pub fn of(messages: &[Message], window: usize) -> Self {
        Self::new(context_usage(messages), window)
    }

    pub fn percentage(&self) -> f64 {
        if self.window == 0 {
            0.0
        } else {
            self.used as f64 / self.window as f64 * 100.0
        }
    }

    pub fn level(&self) -> UsageLevel {
        let percentage = self.percentage();
        if percentage > 90.0 {
            UsageLevel::Critical
        } else if percentage > 70.0 {
            UsageLevel::Warning
        } else {
            UsageLevel::Normal
        }
    }
}

impl std::fmt::Display for ContextUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} tokens", self.used, self.window)
    }
}
