use std::collections::HashMap;

use crate::types::{sort_by_cost_desc, MinuteBucket, ModelAggregate, Stats};

/// Current burn rate: the cost of the most recent bucket.
pub fn calculate_burn_rate(buckets: &[MinuteBucket]) -> f64 {
    buckets.last().map_or(0.0, |b| b.cost)
}

/// Fold a bucket sequence into summary statistics.
pub fn calculate_stats(buckets: &[MinuteBucket]) -> Stats {
    if buckets.is_empty() {
        return Stats::default();
    }

    let mut stats = Stats::default();
    let mut models: HashMap<&str, ModelAggregate> = HashMap::new();

    for b in buckets {
        stats.total_cost += b.cost;
        stats.total_tokens.accumulate(&b.tokens);
        stats.peak_rate = stats.peak_rate.max(b.cost);
        stats.peak_tokens = stats.peak_tokens.max(b.tokens.total());

        for m in &b.models {
            models
                .entry(m.model.as_str())
                .or_insert_with(|| ModelAggregate::new(m.model.as_str()))
                .accumulate_from(m);
        }
    }

    stats.duration_minutes = buckets.len();
    stats.average_rate = stats.total_cost / buckets.len() as f64;
    stats.models = models.into_values().collect();
    sort_by_cost_desc(&mut stats.models);
    stats
}
