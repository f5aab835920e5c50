use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveDateTime, SubsecRound, TimeDelta};

use crate::rates::RateBook;
use crate::types::{
    sort_by_cost_desc, ChannelTotal, MinuteBucket, ModelAggregate, TokenUsage, UsageEntry,
};

pub const DEFAULT_BUCKET_MINUTES: u32 = 1;
/// Widest bucket accepted from callers: one day.
pub const MAX_BUCKET_MINUTES: u32 = 24 * 60;

/// Shorten model names for display: strip `claude-` prefix and date suffixes.
/// "claude-opus-4-6" → "opus-4-6"
/// "claude-sonnet-4-5-20250929" → "sonnet-4-5"
pub fn short_model_name(model: &str) -> String {
    let s = model.strip_prefix("claude-").unwrap_or(model);
    // Strip trailing date suffix (8 digits preceded by -)
    if s.len() > 9
        && s.as_bytes()[s.len() - 9] == b'-'
        && s[s.len() - 8..].chars().all(|c| c.is_ascii_digit())
    {
        s[..s.len() - 9].to_string()
    } else {
        s.to_string()
    }
}

/// Clamp a requested width into `1..=MAX_BUCKET_MINUTES`.
pub fn clamp_bucket_minutes(minutes: u32) -> u32 {
    minutes.clamp(1, MAX_BUCKET_MINUTES)
}

/// Bucket width for a minute count, clamped like [`clamp_bucket_minutes`].
pub fn bucket_width(minutes: u32) -> TimeDelta {
    TimeDelta::minutes(i64::from(clamp_bucket_minutes(minutes)))
}

/// Start of the bucket holding `ts`. Buckets are aligned to the epoch, so any
/// width that divides an hour lines up with the top of the hour.
pub fn bucket_start(ts: NaiveDateTime, width: TimeDelta) -> NaiveDateTime {
    let ts = ts.trunc_subsecs(0);
    let width_secs = width.num_seconds().max(1);
    let offset = ts.and_utc().timestamp().rem_euclid(width_secs);
    ts - TimeDelta::seconds(offset)
}

/// Entries in a fixed order, so float sums come out bit-identical however
/// the input was ordered.
fn canonical_order<'a, I>(entries: I) -> Vec<&'a UsageEntry>
where
    I: IntoIterator<Item = &'a UsageEntry>,
{
    let mut sorted: Vec<&UsageEntry> = entries.into_iter().collect();
    sorted.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.model_key().cmp(b.model_key()))
            .then_with(|| a.channel.cmp(&b.channel))
            .then_with(|| a.cost.total_cmp(&b.cost))
            .then_with(|| a.raw_cost.total_cmp(&b.raw_cost))
    });
    sorted
}

/// Per-bucket state accumulated during the single pass.
#[derive(Default)]
struct BucketState {
    cost: f64,
    tokens: TokenUsage,
    count: u64,
    model_details: HashMap<String, ModelAggregate>,
}

/// Group entries into fixed-width buckets, ascending by start time.
///
/// Buckets are sparse: a window with no entries produces no bucket. The
/// output does not depend on the order of the input.
pub fn aggregate<'a, I>(entries: I, width: TimeDelta) -> Vec<MinuteBucket>
where
    I: IntoIterator<Item = &'a UsageEntry>,
{
    let mut states: BTreeMap<NaiveDateTime, BucketState> = BTreeMap::new();

    for e in canonical_order(entries) {
        let state = states.entry(bucket_start(e.timestamp, width)).or_default();

        state.cost += e.cost;
        state.tokens.accumulate(&e.tokens);
        state.count += 1;

        state
            .model_details
            .entry(e.model_key().to_string())
            .or_insert_with_key(|model| ModelAggregate::new(model.as_str()))
            .accumulate(e);
    }

    states
        .into_iter()
        .map(|(start, state)| {
            let mut models: Vec<ModelAggregate> = state.model_details.into_values().collect();
            sort_by_cost_desc(&mut models);
            MinuteBucket {
                minute: start.format("%H:%M").to_string(),
                timestamp: start,
                cost: state.cost,
                tokens: state.tokens,
                count: state.count,
                models,
            }
        })
        .collect()
}

/// Total raw and billed cost per channel, most expensive first.
pub fn aggregate_channels<'a, I>(entries: I, rates: &RateBook) -> Vec<ChannelTotal>
where
    I: IntoIterator<Item = &'a UsageEntry>,
{
    let mut totals: HashMap<&str, ChannelTotal> = HashMap::new();
    for e in canonical_order(entries) {
        let total = totals.entry(e.channel.as_str()).or_insert_with(|| ChannelTotal {
            channel: e.channel.clone(),
            name: rates.upstream_name(&e.channel).to_string(),
            ..Default::default()
        });
        total.raw_cost += e.raw_cost;
        total.cost += e.cost;
        total.count += 1;
    }

    let mut channels: Vec<ChannelTotal> = totals.into_values().collect();
    channels.sort_by(|a, b| {
        b.cost
            .partial_cmp(&a.cost)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.channel.cmp(&b.channel))
    });
    channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tests::static_rates;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn entry(ts: &str, model: &str, cost: f64, input: u64, output: u64) -> UsageEntry {
        UsageEntry {
            timestamp: dt(ts),
            cost,
            raw_cost: cost,
            model: model.to_string(),
            channel: "official".to_string(),
            message_id: String::new(),
            request_id: String::new(),
            tokens: TokenUsage {
                input_tokens: input,
                output_tokens: output,
                cache_creation_input_tokens: 10,
                cache_read_input_tokens: 20,
            },
        }
    }

    #[test]
    fn short_names() {
        assert_eq!(short_model_name("claude-sonnet-4-5-20250929"), "sonnet-4-5");
        assert_eq!(short_model_name("claude-opus-4-6"), "opus-4-6");
        assert_eq!(short_model_name("gpt-5"), "gpt-5");
    }

    #[test]
    fn same_minute_entries_share_a_bucket() {
        let entries = vec![
            entry("2025-06-01 10:00:05", "A", 0.00105, 100, 50),
            entry("2025-06-01 10:00:59", "A", 0.00105, 100, 50),
        ];
        let buckets = aggregate(&entries, bucket_width(1));
        assert_eq!(buckets.len(), 1);

        let b = &buckets[0];
        assert_eq!(b.minute, "10:00");
        assert_eq!(b.timestamp, dt("2025-06-01 10:00:00"));
        assert_eq!(b.count, 2);
        assert!((b.cost - 0.0021).abs() < 1e-12);
        assert_eq!(b.tokens.input_tokens, 200);
        assert_eq!(b.tokens.cache_read_input_tokens, 40);
        assert_eq!(b.models.len(), 1);
        assert_eq!(b.models[0].model, "A");
        assert_eq!(b.models[0].count, 2);
    }

    #[test]
    fn boundary_belongs_to_the_bucket_it_starts() {
        let entries = vec![
            entry("2025-06-01 10:00:59", "A", 1.0, 1, 1),
            entry("2025-06-01 10:01:00", "A", 2.0, 1, 1),
            entry("2025-06-01 10:04:59", "A", 4.0, 1, 1),
            entry("2025-06-01 10:05:00", "A", 8.0, 1, 1),
        ];

        let per_minute = aggregate(&entries, bucket_width(1));
        let starts: Vec<String> = per_minute.iter().map(|b| b.minute.clone()).collect();
        assert_eq!(starts, vec!["10:00", "10:01", "10:04", "10:05"]);

        let five = aggregate(&entries, bucket_width(5));
        assert_eq!(five.len(), 2);
        assert_eq!(five[0].timestamp, dt("2025-06-01 10:00:00"));
        assert_eq!(five[0].cost, 7.0);
        assert_eq!(five[1].timestamp, dt("2025-06-01 10:05:00"));
        assert_eq!(five[1].cost, 8.0);
    }

    #[test]
    fn oversized_widths_are_clamped_to_a_day() {
        assert_eq!(clamp_bucket_minutes(0), 1);
        assert_eq!(clamp_bucket_minutes(u32::MAX), MAX_BUCKET_MINUTES);
        assert_eq!(bucket_width(u32::MAX), TimeDelta::days(1));

        let entries = vec![
            entry("2025-06-01 10:00:05", "A", 1.0, 1, 1),
            entry("2025-06-01 10:00:59", "A", 1.0, 1, 1),
        ];
        let buckets = aggregate(&entries, bucket_width(u32::MAX));
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].timestamp, dt("2025-06-01 00:00:00"));
        assert_eq!(buckets[0].count, 2);
    }

    #[test]
    fn bucket_start_always_floors() {
        let ts = dt("2025-06-01 10:04:37");
        for width in [
            TimeDelta::seconds(1),
            TimeDelta::minutes(7),
            TimeDelta::hours(5),
            TimeDelta::days(100_000),
        ] {
            let start = bucket_start(ts, width);
            assert!(start <= ts, "{width}");
            assert!(ts - start < width, "{width}");
            assert_eq!(start.and_utc().timestamp() % width.num_seconds(), 0, "{width}");
        }
        assert_eq!(
            bucket_start(ts, TimeDelta::days(100_000)),
            dt("1970-01-01 00:00:00")
        );
    }

    #[test]
    fn gaps_produce_no_empty_buckets() {
        let entries = vec![
            entry("2025-06-01 10:00:00", "A", 1.0, 1, 1),
            entry("2025-06-01 13:30:00", "A", 1.0, 1, 1),
        ];
        assert_eq!(aggregate(&entries, bucket_width(1)).len(), 2);
    }

    #[test]
    fn order_independent_and_cost_conserving() {
        // Non-dyadic costs: summing them in a different order changes the
        // last bit unless the input is put in a fixed order first.
        let mut entries = vec![
            entry("2025-06-01 10:00:10", "A", 0.1, 1, 1),
            entry("2025-06-01 10:00:20", "A", 0.2, 1, 1),
            entry("2025-06-01 10:00:30", "A", 0.3, 1, 1),
            entry("2025-06-01 10:02:10", "B", 0.7, 1, 1),
            entry("2025-06-01 10:02:10", "A", 0.1, 1, 1),
            entry("2025-06-01 10:02:10", "A", 0.3, 1, 1),
            entry("2025-06-01 09:59:59", "", 2.0, 1, 1),
        ];
        let forward = aggregate(&entries, bucket_width(1));
        entries.reverse();
        let backward = aggregate(&entries, bucket_width(1));
        assert_eq!(forward, backward);
        entries.swap(0, 3);
        entries.swap(1, 5);
        assert_eq!(aggregate(&entries, bucket_width(1)), forward);

        let rates = static_rates();
        let channels_backward = aggregate_channels(&entries, &rates);
        entries.reverse();
        assert_eq!(aggregate_channels(&entries, &rates), channels_backward);

        let bucket_total: f64 = forward.iter().map(|b| b.cost).sum();
        let entry_total: f64 = entries.iter().map(|e| e.cost).sum();
        assert!((bucket_total - entry_total).abs() < 1e-12);

        let starts: Vec<NaiveDateTime> = forward.iter().map(|b| b.timestamp).collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
    }

    #[test]
    fn per_model_breakdown_sorted_by_cost() {
        let entries = vec![
            entry("2025-06-01 10:00:01", "cheap", 0.5, 1, 1),
            entry("2025-06-01 10:00:02", "pricey", 3.0, 1, 1),
            entry("2025-06-01 10:00:03", "", 1.0, 1, 1),
        ];
        let buckets = aggregate(&entries, bucket_width(1));
        let models: Vec<&str> = buckets[0].models.iter().map(|m| m.model.as_str()).collect();
        assert_eq!(models, vec!["pricey", "unknown", "cheap"]);
    }

    #[test]
    fn channel_totals_keep_raw_and_billed_cost() {
        let routed = |ts: &str, channel: &str, raw: f64, cost: f64| UsageEntry {
            channel: channel.to_string(),
            raw_cost: raw,
            ..entry(ts, "A", cost, 1, 1)
        };
        let entries = vec![
            routed("2025-06-01 10:00:00", "official", 1.0, 1.0),
            routed("2025-06-01 10:01:00", "claude", 1.0, 6.0),
            routed("2025-06-01 10:02:00", "claude", 0.5, 3.0),
            routed("2025-06-01 10:03:00", "mystery", 2.0, 2.0),
        ];
        let channels = aggregate_channels(&entries, &static_rates());

        let rows: Vec<(&str, &str, f64, f64, u64)> = channels
            .iter()
            .map(|c| (c.channel.as_str(), c.name.as_str(), c.raw_cost, c.cost, c.count))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("claude", "Relay (official)", 1.5, 9.0, 2),
                ("mystery", "mystery", 2.0, 2.0, 1),
                ("official", "Official", 1.0, 1.0, 1),
            ]
        );
    }

    #[test]
    fn empty_input() {
        let none: Vec<UsageEntry> = Vec::new();
        assert!(aggregate(&none, bucket_width(1)).is_empty());
    }
}
