use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::window::View;

/// Model id used for entries that carry no model name.
pub const UNKNOWN_MODEL: &str = "unknown";

/// Token counts for the four billed categories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    /// Sum of all four token categories, saturating at `u64::MAX`.
    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_creation_input_tokens)
            .saturating_add(self.cache_read_input_tokens)
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_creation_input_tokens = self
            .cache_creation_input_tokens
            .saturating_add(other.cache_creation_input_tokens);
        self.cache_read_input_tokens = self
            .cache_read_input_tokens
            .saturating_add(other.cache_read_input_tokens);
    }
}

/// One normalized usage event. Built once by the parser, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageEntry {
    /// Local wall-clock time, truncated to whole seconds.
    pub timestamp: NaiveDateTime,
    /// Cost after the channel multiplier.
    pub cost: f64,
    /// Cost at list price, before the channel multiplier.
    pub raw_cost: f64,
    pub model: String,
    pub channel: String,
    pub message_id: String,
    pub request_id: String,
    pub tokens: TokenUsage,
}

impl UsageEntry {
    /// Model id for grouping; empty names collapse into [`UNKNOWN_MODEL`].
    pub fn model_key(&self) -> &str {
        if self.model.is_empty() {
            UNKNOWN_MODEL
        } else {
            &self.model
        }
    }
}

/// Per-model totals within a bucket or across a whole series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelAggregate {
    pub model: String,
    pub cost: f64,
    #[serde(flatten)]
    pub tokens: TokenUsage,
    pub count: u64,
}

impl ModelAggregate {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn accumulate(&mut self, entry: &UsageEntry) {
        self.cost += entry.cost;
        self.tokens.accumulate(&entry.tokens);
        self.count += 1;
    }

    /// Merge another aggregate of the same model into this one.
    pub fn accumulate_from(&mut self, other: &ModelAggregate) {
        self.cost += other.cost;
        self.tokens.accumulate(&other.tokens);
        self.count += other.count;
    }
}

/// Order aggregates by cost, most expensive first. Ties fall back to the
/// model name so output is stable across runs.
pub fn sort_by_cost_desc(models: &mut [ModelAggregate]) {
    models.sort_by(|a, b| {
        b.cost
            .partial_cmp(&a.cost)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.model.cmp(&b.model))
    });
}

/// All entries whose timestamp falls into one fixed-width window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinuteBucket {
    /// `HH:MM` display label of the bucket start.
    pub minute: String,
    /// Bucket start, local time.
    pub timestamp: NaiveDateTime,
    pub cost: f64,
    #[serde(flatten)]
    pub tokens: TokenUsage,
    pub count: u64,
    pub models: Vec<ModelAggregate>,
}

/// Summary over an ordered bucket sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    pub total_cost: f64,
    #[serde(flatten)]
    pub total_tokens: TokenUsage,
    pub average_rate: f64,
    pub peak_rate: f64,
    /// Largest single-bucket token sum, cache tokens included.
    pub peak_tokens: u64,
    /// Number of non-empty buckets.
    pub duration_minutes: usize,
    pub models: Vec<ModelAggregate>,
}

/// Payload of the burn-rate endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurnRateResponse {
    pub view: View,
    pub bucket_minutes: u32,
    pub current_rate: f64,
    pub data: Vec<MinuteBucket>,
    pub stats: Stats,
    pub generated_at: NaiveDateTime,
}

/// Spend routed through one billing channel, at list price and as billed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChannelTotal {
    pub channel: String,
    /// Display name from the upstream table, or the channel id.
    pub name: String,
    pub raw_cost: f64,
    pub cost: f64,
    pub count: u64,
}

/// A burn-rate response plus the per-channel split, for the CLI report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    #[serde(flatten)]
    pub response: BurnRateResponse,
    pub channels: Vec<ChannelTotal>,
}
