//! Append-only history logs: price table, channel rates, channel switches.
//!
//! Each log is a piecewise-constant step function over time. A record takes
//! effect at its timestamp and stays in effect until the next record for the
//! same key. Lines are comma separated, `#` starts a comment line, and
//! timestamps are local wall-clock time.

use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::cost::ModelPrice;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord<V> {
    pub effective_from: NaiveDateTime,
    pub key: String,
    pub value: V,
}

/// Time-ordered records, stable-sorted at construction so the lookup can
/// stop at the first record past the query instant.
#[derive(Debug, Clone, PartialEq)]
pub struct History<V> {
    records: Vec<HistoryRecord<V>>,
}

impl<V> Default for History<V> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<V> History<V> {
    pub fn new(mut records: Vec<HistoryRecord<V>>) -> Self {
        // Stable: for equal timestamps the later line in the file wins.
        records.sort_by_key(|r| r.effective_from);
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Value for `key` in effect at `at`, or `None` if `key` has no record
    /// at or before `at`.
    pub fn resolve(&self, key: &str, at: NaiveDateTime) -> Option<&V> {
        let mut found = None;
        for record in self.records.iter().filter(|r| r.key == key) {
            if record.effective_from > at {
                break;
            }
            found = Some(&record.value);
        }
        found
    }

    /// Most recent record of any key in effect at `at`.
    pub fn latest(&self, at: NaiveDateTime) -> Option<&HistoryRecord<V>> {
        let mut found = None;
        for record in &self.records {
            if record.effective_from > at {
                break;
            }
            found = Some(record);
        }
        found
    }
}

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Split a log line into trimmed fields; `None` for blanks and comments.
fn fields(line: &str) -> Option<Vec<&str>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(line.split(',').map(str::trim).collect())
}

/// `datetime, model, input, output[, cache_write[, cache_read]]`
pub fn parse_price_log(text: &str) -> History<ModelPrice> {
    let records = text
        .lines()
        .filter_map(|line| {
            let f = fields(line)?;
            if f.len() < 4 || f[1].is_empty() {
                return None;
            }
            let effective_from = parse_datetime(f[0])?;
            let input = f[2].parse().ok()?;
            let output = f[3].parse().ok()?;
            let optional = |idx: usize| f.get(idx).and_then(|v| v.parse::<f64>().ok());
            Some(HistoryRecord {
                effective_from,
                key: f[1].to_string(),
                value: ModelPrice {
                    input,
                    output,
                    cache_write: optional(4),
                    cache_read: optional(5),
                },
            })
        })
        .collect();
    History::new(records)
}

/// `datetime, channel, multiplier`
pub fn parse_rate_log(text: &str) -> History<f64> {
    let records = text
        .lines()
        .filter_map(|line| {
            let f = fields(line)?;
            if f.len() < 3 || f[1].is_empty() {
                return None;
            }
            Some(HistoryRecord {
                effective_from: parse_datetime(f[0])?,
                key: f[1].to_string(),
                value: f[2].parse().ok()?,
            })
        })
        .collect();
    History::new(records)
}

/// `datetime, ..., channel`: the channel is always the last field.
pub fn parse_switch_log(text: &str) -> History<()> {
    let records = text
        .lines()
        .filter_map(|line| {
            let f = fields(line)?;
            if f.len() < 2 {
                return None;
            }
            let channel = f.last()?;
            if channel.is_empty() {
                return None;
            }
            Some(HistoryRecord {
                effective_from: parse_datetime(f[0])?,
                key: channel.to_string(),
                value: (),
            })
        })
        .collect();
    History::new(records)
}

/// Read and parse a log file. A missing path or unreadable file yields an
/// empty history.
pub fn read_log<V>(path: Option<&Path>, parse: fn(&str) -> History<V>) -> History<V> {
    let Some(path) = path else {
        return History::default();
    };
    match fs::read_to_string(path) {
        Ok(text) => {
            let history = parse(&text);
            debug!(path = %path.display(), records = history.len(), "loaded history log");
            history
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "history log unavailable");
            History::default()
        }
    }
}
