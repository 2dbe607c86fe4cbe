//! Token usage tracking
//!
//! Process-wide accumulator for tokens and estimated cost across provider
//! calls. Shared between concurrent requests behind a mutex; increments are
//! atomic per call and `snapshot` returns a consistent copy, never a live
//! reference.

use crate::providers::TokenCounts;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// Kind of provider call a usage record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Embedding,
    Chat,
}

/// Append-only log entry for one API call
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub call_kind: CallKind,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated statistics for the process lifetime
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub embedding_calls: u64,
    pub chat_calls: u64,
    pub total_api_calls: u64,
    pub estimated_cost_usd: f64,
    pub session_duration_minutes: f64,
    pub session_start: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Per-1K-token USD prices; (model, input price, output price)
const PRICING: &[(&str, f64, f64)] = &[
    ("gpt-3.5-turbo", 0.0015, 0.002),
    ("gpt-4", 0.03, 0.06),
    ("text-embedding-ada-002", 0.0001, 0.0),
];

/// Price row used when a chat model has no entry in the table
const DEFAULT_CHAT_PRICING: (f64, f64) = (0.0015, 0.002);
const DEFAULT_EMBEDDING_PRICING: (f64, f64) = (0.0001, 0.0);

fn price_for(kind: CallKind, model: &str) -> (f64, f64) {
    PRICING
        .iter()
        .find(|(name, _, _)| *name == model)
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or(match kind {
            CallKind::Chat => DEFAULT_CHAT_PRICING,
            CallKind::Embedding => DEFAULT_EMBEDDING_PRICING,
        })
}

#[derive(Debug)]
struct TrackerState {
    totals: TokenCounts,
    embedding_calls: u64,
    chat_calls: u64,
    estimated_cost_usd: f64,
    last_updated: DateTime<Utc>,
    history: Vec<UsageRecord>,
}

/// Process-wide usage tracker
#[derive(Debug)]
pub struct UsageTracker {
    session_start: DateTime<Utc>,
    state: Mutex<TrackerState>,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            session_start: now,
            state: Mutex::new(TrackerState {
                totals: TokenCounts::default(),
                embedding_calls: 0,
                chat_calls: 0,
                estimated_cost_usd: 0.0,
                last_updated: now,
                history: Vec::new(),
            }),
        }
    }

    /// Fold one call's counters into the session totals
    pub fn record(&self, kind: CallKind, model: &str, counts: TokenCounts) {
        let (input_price, output_price) = price_for(kind, model);
        let cost = (counts.prompt_tokens as f64 / 1000.0) * input_price
            + (counts.completion_tokens as f64 / 1000.0) * output_price;

        let mut state = self.state.lock().expect("usage tracker lock poisoned");
        state.totals.prompt_tokens += counts.prompt_tokens;
        state.totals.completion_tokens += counts.completion_tokens;
        state.totals.total_tokens += counts.total_tokens;
        match kind {
            CallKind::Embedding => state.embedding_calls += 1,
            CallKind::Chat => state.chat_calls += 1,
        }
        state.estimated_cost_usd += cost;
        let now = Utc::now();
        state.last_updated = now;
        state.history.push(UsageRecord {
            prompt_tokens: counts.prompt_tokens,
            completion_tokens: counts.completion_tokens,
            total_tokens: counts.total_tokens,
            call_kind: kind,
            model: model.to_string(),
            timestamp: now,
        });

        tracing::debug!(
            kind = ?kind,
            model,
            prompt_tokens = counts.prompt_tokens,
            completion_tokens = counts.completion_tokens,
            "Usage recorded"
        );
    }

    /// Point-in-time copy of the aggregated statistics
    pub fn snapshot(&self) -> SessionStats {
        let state = self.state.lock().expect("usage tracker lock poisoned");
        let now = Utc::now();
        SessionStats {
            total_prompt_tokens: state.totals.prompt_tokens,
            total_completion_tokens: state.totals.completion_tokens,
            total_tokens: state.totals.total_tokens,
            embedding_calls: state.embedding_calls,
            chat_calls: state.chat_calls,
            total_api_calls: state.embedding_calls + state.chat_calls,
            estimated_cost_usd: (state.estimated_cost_usd * 1e6).round() / 1e6,
            session_duration_minutes: (now - self.session_start).num_milliseconds() as f64
                / 60_000.0,
            session_start: self.session_start,
            last_updated: state.last_updated,
        }
    }

    /// Reset all counters and history; the session start is kept
    pub fn clear(&self) {
        let mut state = self.state.lock().expect("usage tracker lock poisoned");
        state.totals = TokenCounts::default();
        state.embedding_calls = 0;
        state.chat_calls = 0;
        state.estimated_cost_usd = 0.0;
        state.last_updated = Utc::now();
        state.history.clear();
    }

    #[cfg(test)]
    fn history(&self) -> Vec<UsageRecord> {
        self.state
            .lock()
            .expect("usage tracker lock poisoned")
            .history
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn counts(prompt: u64, completion: u64) -> TokenCounts {
        TokenCounts {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    #[test]
    fn test_record_accumulates() {
        let tracker = UsageTracker::new();
        tracker.record(CallKind::Embedding, "text-embedding-ada-002", counts(100, 0));
        tracker.record(CallKind::Chat, "gpt-3.5-turbo", counts(200, 50));

        let stats = tracker.snapshot();
        assert_eq!(stats.total_prompt_tokens, 300);
        assert_eq!(stats.total_completion_tokens, 50);
        assert_eq!(stats.total_tokens, 350);
        assert_eq!(stats.embedding_calls, 1);
        assert_eq!(stats.chat_calls, 1);
        assert_eq!(stats.total_api_calls, 2);
    }

    #[test]
    fn test_cost_estimation_known_models() {
        let tracker = UsageTracker::new();
        tracker.record(CallKind::Chat, "gpt-4", counts(1000, 1000));
        let stats = tracker.snapshot();
        // 1K input at $0.03 + 1K output at $0.06
        assert!((stats.estimated_cost_usd - 0.09).abs() < 1e-9);
    }

    #[test]
    fn test_cost_estimation_unknown_model_falls_back() {
        let tracker = UsageTracker::new();
        tracker.record(CallKind::Chat, "some-future-model", counts(1000, 1000));
        let stats = tracker.snapshot();
        // Falls back to the gpt-3.5-turbo row rather than failing
        assert!((stats.estimated_cost_usd - 0.0035).abs() < 1e-9);
    }

    #[test]
    fn test_clear_resets_counters() {
        let tracker = UsageTracker::new();
        tracker.record(CallKind::Chat, "gpt-3.5-turbo", counts(10, 10));
        tracker.clear();
        let stats = tracker.snapshot();
        assert_eq!(stats.total_tokens, 0);
        assert_eq!(stats.total_api_calls, 0);
        assert_eq!(stats.estimated_cost_usd, 0.0);
    }

    #[test]
    fn test_record_stamps_history_and_last_updated_together() {
        let tracker = UsageTracker::new();
        tracker.record(CallKind::Chat, "gpt-3.5-turbo", counts(10, 5));

        let history = tracker.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].total_tokens, 15);
        assert_eq!(history[0].model, "gpt-3.5-turbo");
        // The log entry carries the same instant the totals were updated at
        assert_eq!(history[0].timestamp, tracker.snapshot().last_updated);
    }

    #[tokio::test]
    async fn test_concurrent_records_are_not_lost() {
        let tracker = Arc::new(UsageTracker::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    tracker.record(CallKind::Chat, "gpt-3.5-turbo", counts(1, 1));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let stats = tracker.snapshot();
        assert_eq!(stats.chat_calls, 800);
        assert_eq!(stats.total_tokens, 1600);
    }
}
