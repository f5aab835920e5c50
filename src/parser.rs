use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone};
use serde::Deserialize;

use crate::cost::{self, Cost};
use crate::rates::RateBook;
use crate::types::{TokenUsage, UsageEntry};

#[derive(Deserialize)]
struct RawLine {
    timestamp: Option<String>,
    #[serde(rename = "costUSD")]
    cost_usd: Option<f64>,
    model: Option<String>,
    usage: Option<RawUsage>,
    message: Option<RawMessage>,
    #[serde(rename = "requestId")]
    request_id: Option<String>,
}

#[derive(Deserialize)]
struct RawMessage {
    id: Option<String>,
    model: Option<String>,
    usage: Option<RawUsage>,
}

#[derive(Deserialize, Default)]
struct RawUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse an ISO-8601 timestamp into wall-clock time in `tz`, dropping
/// sub-second precision. A timestamp without an offset is already local
/// wall-clock time and is kept as is.
pub fn parse_timestamp<Tz: TimeZone>(raw: &str, tz: &Tz) -> Option<NaiveDateTime> {
    let normalized = match raw.strip_suffix('Z') {
        Some(rest) => format!("{rest}+00:00"),
        None => raw.to_string(),
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(parsed.with_timezone(tz).naive_local().trunc_subsecs(0));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&normalized, fmt).ok())
        .map(|naive| naive.trunc_subsecs(0))
}

/// Turn one JSONL line into a [`UsageEntry`].
///
/// Returns `None` for lines that are not JSON objects, lack a usable
/// timestamp, or carry no input or output tokens. These are routine in
/// session logs and not worth reporting.
pub fn parse_line<Tz: TimeZone>(line: &str, tz: &Tz, rates: &RateBook) -> Option<UsageEntry> {
    let raw: RawLine = serde_json::from_str(line).ok()?;
    let timestamp = parse_timestamp(raw.timestamp.as_deref()?, tz)?;

    let message = raw.message.as_ref();
    let usage = message
        .and_then(|m| m.usage.as_ref())
        .or(raw.usage.as_ref());
    let tokens = usage.map_or_else(TokenUsage::default, |u| TokenUsage {
        input_tokens: u.input_tokens,
        output_tokens: u.output_tokens,
        cache_creation_input_tokens: u.cache_creation_input_tokens,
        cache_read_input_tokens: u.cache_read_input_tokens,
    });
    match tokens.input_tokens.checked_add(tokens.output_tokens) {
        None | Some(0) => return None,
        Some(_) => {}
    }

    let model = message
        .and_then(|m| m.model.clone())
        .or(raw.model)
        .unwrap_or_default();

    let channel = rates.channel_at(timestamp).to_string();
    let cost = match raw.cost_usd {
        Some(billed) => Cost {
            raw: billed,
            actual: billed,
        },
        None => {
            let price = rates.model_price(&model, timestamp);
            let multiplier = rates.multiplier(&channel, timestamp);
            cost::calculate(&tokens, &price, multiplier)
        }
    };

    Some(UsageEntry {
        timestamp,
        cost: cost.actual,
        raw_cost: cost.raw,
        model,
        channel,
        message_id: message.and_then(|m| m.id.clone()).unwrap_or_default(),
        request_id: raw.request_id.unwrap_or_default(),
        tokens,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pricing::NoRemotePricing;
    use crate::rates::RateSources;
    use chrono::{FixedOffset, Utc};
    use std::fs;
    use std::time::Instant;

    /// Rates with no history logs and no remote table: static config prices,
    /// official channel.
    pub(crate) fn static_rates() -> RateBook {
        let config = Config {
            upstream_log: None,
            upstream_rate_log: None,
            price_log: None,
            ..Config::default()
        };
        RateSources::new(&config, Box::new(NoRemotePricing)).snapshot(Instant::now())
    }

    const ASSISTANT: &str = r#"{"type":"assistant","timestamp":"2025-06-01T10:15:42.123Z","requestId":"req_1","message":{"id":"msg_1","model":"claude-sonnet-4-5-20250929","usage":{"input_tokens":100,"output_tokens":50,"cache_creation_input_tokens":1000,"cache_read_input_tokens":2000}}}"#;

    #[test]
    fn parses_assistant_line() {
        let entry = parse_line(ASSISTANT, &Utc, &static_rates()).expect("should parse");
        assert_eq!(
            entry.timestamp,
            NaiveDateTime::parse_from_str("2025-06-01 10:15:42", "%Y-%m-%d %H:%M:%S").unwrap()
        );
        assert_eq!(entry.model, "claude-sonnet-4-5-20250929");
        assert_eq!(entry.channel, "official");
        assert_eq!(entry.message_id, "msg_1");
        assert_eq!(entry.request_id, "req_1");
        assert_eq!(entry.tokens.input_tokens, 100);
        assert_eq!(entry.tokens.cache_read_input_tokens, 2000);

        // (100*3 + 50*15 + 1000*3.75 + 2000*0.3) / 1e6
        let expected = (300.0 + 750.0 + 3750.0 + 600.0) / 1_000_000.0;
        assert!((entry.cost - expected).abs() < 1e-12);
        assert_eq!(entry.cost, entry.raw_cost);
    }

    #[test]
    fn converts_to_local_wall_clock() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        let entry = parse_line(ASSISTANT, &tz, &static_rates()).unwrap();
        assert_eq!(entry.timestamp.to_string(), "2025-06-01 18:15:42");
    }

    #[test]
    fn offsetless_timestamps_are_local_wall_clock() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        for raw in [
            "2025-06-01T10:00:00",
            "2025-06-01T10:00:00.750",
            "2025-06-01 10:00:00",
        ] {
            assert_eq!(
                parse_timestamp(raw, &tz).map(|t| t.to_string()),
                Some("2025-06-01 10:00:00".to_string()),
                "{raw}"
            );
        }
        assert!(parse_timestamp("2025-06-01", &tz).is_none());

        let line = r#"{"timestamp":"2025-06-01T10:00:00","usage":{"input_tokens":1,"output_tokens":1}}"#;
        let entry = parse_line(line, &tz, &static_rates()).unwrap();
        assert_eq!(entry.timestamp.to_string(), "2025-06-01 10:00:00");
    }

    #[test]
    fn overflowing_token_counts_are_skipped() {
        let line = r#"{"timestamp":"2025-06-01T10:00:00Z","usage":{"input_tokens":18446744073709551615,"output_tokens":1}}"#;
        assert!(parse_line(line, &Utc, &static_rates()).is_none());

        let line = r#"{"timestamp":"2025-06-01T10:00:00Z","usage":{"input_tokens":18446744073709551615,"output_tokens":0,"cache_read_input_tokens":18446744073709551615}}"#;
        let entry = parse_line(line, &Utc, &static_rates()).unwrap();
        assert_eq!(entry.tokens.total(), u64::MAX);
    }

    #[test]
    fn explicit_cost_wins() {
        let line = r#"{"timestamp":"2025-06-01T10:00:00Z","costUSD":0.42,"message":{"model":"m","usage":{"input_tokens":1,"output_tokens":1}}}"#;
        let entry = parse_line(line, &Utc, &static_rates()).unwrap();
        assert_eq!(entry.cost, 0.42);
        assert_eq!(entry.raw_cost, 0.42);
    }

    #[test]
    fn null_cost_is_computed() {
        let line = r#"{"timestamp":"2025-06-01T10:00:00Z","costUSD":null,"message":{"model":"claude-haiku-4-5-20251001","usage":{"input_tokens":1000000,"output_tokens":0}}}"#;
        let entry = parse_line(line, &Utc, &static_rates()).unwrap();
        assert!((entry.cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn top_level_usage_and_model() {
        let line = r#"{"timestamp":"2025-06-01T10:00:00+02:00","model":"claude-haiku-4-5-20251001","usage":{"input_tokens":5,"output_tokens":0}}"#;
        let entry = parse_line(line, &Utc, &static_rates()).unwrap();
        assert_eq!(entry.model, "claude-haiku-4-5-20251001");
        assert_eq!(entry.timestamp.to_string(), "2025-06-01 08:00:00");
    }

    #[test]
    fn missing_model_is_kept_empty() {
        let line = r#"{"timestamp":"2025-06-01T10:00:00Z","usage":{"input_tokens":0,"output_tokens":3}}"#;
        let entry = parse_line(line, &Utc, &static_rates()).unwrap();
        assert_eq!(entry.model, "");
        assert_eq!(entry.model_key(), "unknown");
    }

    #[test]
    fn skips_noise() {
        let rates = static_rates();
        let skipped = [
            "",
            "not json",
            "[1, 2, 3]",
            r#"{"type":"user","message":{"content":"hi"}}"#,
            r#"{"timestamp":"yesterday","usage":{"input_tokens":1}}"#,
            r#"{"usage":{"input_tokens":1,"output_tokens":1}}"#,
            r#"{"timestamp":"2025-06-01T10:00:00Z","message":{"usage":{"input_tokens":0,"output_tokens":0,"cache_read_input_tokens":500}}}"#,
            r#"{"timestamp":"2025-06-01T10:00:00Z","usage":{"input_tokens":-4,"output_tokens":1}}"#,
        ];
        for line in skipped {
            assert!(parse_line(line, &Utc, &rates).is_none(), "{line}");
        }
    }

    #[test]
    fn applies_channel_multiplier_from_logs() {
        let dir = tempfile::tempdir().unwrap();
        let switches = dir.path().join("upstream.log");
        let rates_log = dir.path().join("rates.log");
        fs::write(&switches, "2025-06-01 09:00:00, droid\n").unwrap();
        fs::write(&rates_log, "2025-06-01 00:00:00, droid, 0.5\n").unwrap();

        let config = Config {
            upstream_log: Some(switches),
            upstream_rate_log: Some(rates_log),
            price_log: None,
            ..Config::default()
        };
        let rates = RateSources::new(&config, Box::new(NoRemotePricing)).snapshot(Instant::now());

        let line = r#"{"timestamp":"2025-06-01T10:00:00Z","message":{"model":"claude-sonnet-4-5-20250929","usage":{"input_tokens":100,"output_tokens":50}}}"#;
        let entry = parse_line(line, &Utc, &rates).unwrap();
        assert_eq!(entry.channel, "droid");
        assert!((entry.raw_cost - 0.00105).abs() < 1e-12);
        assert!((entry.cost - 0.000525).abs() < 1e-12);

        let early = r#"{"timestamp":"2025-06-01T08:00:00Z","message":{"model":"claude-sonnet-4-5-20250929","usage":{"input_tokens":100,"output_tokens":50}}}"#;
        let entry = parse_line(early, &Utc, &rates).unwrap();
        assert_eq!(entry.channel, "official");
        assert_eq!(entry.cost, entry.raw_cost);
    }
}
