//! View selection over a loaded entry set.
//!
//! `current` follows the provider's 5-hour usage session. A session starts at
//! the top of the hour of its first entry and ends either 5 hours later or
//! after a silence longer than 5 hours, whichever comes first.

use chrono::{DurationRound, NaiveDateTime, NaiveTime, TimeDelta};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::types::UsageEntry;

pub const SESSION_HOURS: i64 = 5;

pub fn session_duration() -> TimeDelta {
    TimeDelta::hours(SESSION_HOURS)
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum View {
    /// Active 5-hour session block
    #[default]
    Current,
    /// Since local midnight
    Today,
    /// Rolling 24 hours
    #[serde(rename = "24h")]
    #[value(name = "24h")]
    Last24h,
    /// Rolling hour
    #[serde(rename = "1h")]
    #[value(name = "1h")]
    LastHour,
}

impl View {
    pub const ALL: [View; 4] = [View::Current, View::Today, View::Last24h, View::LastHour];

    pub fn as_str(&self) -> &'static str {
        match self {
            View::Current => "current",
            View::Today => "today",
            View::Last24h => "24h",
            View::LastHour => "1h",
        }
    }

    /// Parse a query value; anything unrecognized means `current`.
    pub fn parse_lenient(raw: &str) -> View {
        View::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(raw.trim()))
            .unwrap_or_default()
    }
}

/// The most recent session block found in an entry set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBlock {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl SessionBlock {
    /// `now` has not yet passed the end of the block.
    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        now <= self.end
    }
}

pub fn floor_to_hour(ts: NaiveDateTime) -> NaiveDateTime {
    ts.duration_trunc(TimeDelta::hours(1)).unwrap_or(ts)
}

/// Reconstruct session blocks from the full history and return the last one.
/// `None` only when there are no entries.
pub fn detect_block(entries: &[UsageEntry]) -> Option<SessionBlock> {
    let mut times: Vec<NaiveDateTime> = entries.iter().map(|e| e.timestamp).collect();
    times.sort_unstable();

    let (first, rest) = times.split_first()?;
    let duration = session_duration();
    let mut start = floor_to_hour(*first);
    let mut prev = *first;

    for &t in rest {
        if t - start > duration || t - prev > duration {
            start = floor_to_hour(t);
        }
        prev = t;
    }

    Some(SessionBlock {
        start,
        end: start + duration,
    })
}

/// Start of the session block in progress at `now`, if any.
pub fn current_block_start(entries: &[UsageEntry], now: NaiveDateTime) -> Option<NaiveDateTime> {
    detect_block(entries)
        .filter(|b| b.is_active(now))
        .map(|b| b.start)
}

/// Earliest timestamp included in `view`, or `None` when the view is empty
/// regardless of the entries (no active session).
pub fn view_start(entries: &[UsageEntry], view: View, now: NaiveDateTime) -> Option<NaiveDateTime> {
    match view {
        View::Today => Some(now.date().and_time(NaiveTime::MIN)),
        View::Last24h => Some(now - TimeDelta::hours(24)),
        View::LastHour => Some(now - TimeDelta::hours(1)),
        View::Current => current_block_start(entries, now),
    }
}

/// Entries belonging to `view` as of `now`, in input order.
pub fn select(entries: &[UsageEntry], view: View, now: NaiveDateTime) -> Vec<&UsageEntry> {
    let Some(start) = view_start(entries, view, now) else {
        return Vec::new();
    };
    entries.iter().filter(|e| e.timestamp >= start).collect()
}
