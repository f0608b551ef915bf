use quill_core::Model;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

pub mod context;

pub use context::{
    can_send, context_usage, required_tokens, ContextUsage, UsageLevel, RESERVED_RESPONSE_BUDGET,
};

/// Approximate token count: one token per four characters, rounded up.
///
/// This is a heuristic, not a tokenizer. The send gate is calibrated against it.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Session-wide tally of estimated prompt and reply tokens.
pub struct UsageTracker {
    prompt_tokens: AtomicUsize,
    reply_tokens: AtomicUsize,
    requests: AtomicUsize,
    model_stats: Arc<RwLock<HashMap<String, ModelUsage>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model_id: String,
    pub prompt_tokens: usize,
    pub reply_tokens: usize,
    pub requests: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub prompt_tokens: usize,
    pub reply_tokens: usize,
    pub total_tokens: usize,
    pub requests: usize,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            prompt_tokens: AtomicUsize::new(0),
            reply_tokens: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
            model_stats: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Records one completed exchange.
    pub fn record_exchange(&self, model: &str, prompt_tokens: usize, reply_tokens: usize) {
        self.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
        self.reply_tokens.fetch_add(reply_tokens, Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);

        let mut stats = self
            .model_stats
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let model_stat = stats.entry(model.to_string()).or_insert_with(|| ModelUsage {
            model_id: model.to_string(),
            ..Default::default()
        });
        model_stat.prompt_tokens += prompt_tokens;
        model_stat.reply_tokens += reply_tokens;
        model_stat.requests += 1;

        debug!(
            "Recorded exchange on {}: {} prompt, {} reply tokens",
            model, prompt_tokens, reply_tokens
        );
    }

    pub fn get_stats(&self) -> UsageStats {
        let prompt_tokens = self.prompt_tokens.load(Ordering::Relaxed);
        let reply_tokens = self.reply_tokens.load(Ordering::Relaxed);
        UsageStats {
            prompt_tokens,
            reply_tokens,
            total_tokens: prompt_tokens + reply_tokens,
            requests: self.requests.load(Ordering::Relaxed),
        }
    }

    pub fn get_model_stats(&self) -> HashMap<String, ModelUsage> {
        self.model_stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Informational cost figures derived from each model's `cost_per_1k`.
pub struct CostCalculator {
    pricing: HashMap<String, f64>,
}

impl CostCalculator {
    pub fn from_models(models: &[Model]) -> Self {
        Self {
            pricing: models
                .iter()
                .map(|m| (m.id.clone(), m.cost_per_1k))
                .collect(),
        }
    }

    pub fn estimate(&self, tokens: usize, model: &str) -> f64 {
        match self.pricing.get(model) {
            Some(per_1k) => tokens as f64 / 1000.0 * per_1k,
            None => {
                debug!("No pricing found for model: {}", model);
                0.0
            }
        }
    }

    pub fn session_cost(&self, tracker: &UsageTracker) -> f64 {
        tracker
            .get_model_stats()
            .values()
            .map(|usage| self.estimate(usage.prompt_tokens + usage.reply_tokens, &usage.model_id))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimation() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("This is a test message"), 6);
    }

    #[test]
    fn test_token_estimation_counts_characters() {
        // four characters, twelve bytes
        assert_eq!(estimate_tokens("日本語字"), 1);
    }

    #[test]
    fn test_usage_tracker() {
        let tracker = UsageTracker::new();
        tracker.record_exchange("gpt-4o", 100, 50);
        tracker.record_exchange("gpt-4o", 20, 10);
        tracker.record_exchange("gpt-4", 5, 5);

        let stats = tracker.get_stats();
        assert_eq!(stats.prompt_tokens, 125);
        assert_eq!(stats.reply_tokens, 65);
        assert_eq!(stats.total_tokens, 190);
        assert_eq!(stats.requests, 3);

        let model_stats = tracker.get_model_stats();
        assert_eq!(model_stats["gpt-4o"].requests, 2);
        assert_eq!(model_stats["gpt-4"].prompt_tokens, 5);
    }

    #[test]
    fn test_cost_calculator() {
        let models = vec![Model {
            id: "gpt-4".into(),
            name: "GPT-4".into(),
            context_window: 8192,
            cost_per_1k: 0.03,
        }];
        let calculator = CostCalculator::from_models(&models);
        assert!((calculator.estimate(2000, "gpt-4") - 0.06).abs() < 1e-9);
        assert_eq!(calculator.estimate(2000, "unknown"), 0.0);

        let tracker = UsageTracker::new();
        tracker.record_exchange("gpt-4", 500, 500);
        tracker.record_exchange("unknown", 500, 500);
        assert!((calculator.session_cost(&tracker) - 0.03).abs() < 1e-9);
    }
}
