use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use crate::types::UsageEntry;

/// Drop replays of the same API response. Resumed sessions copy earlier
/// assistant messages into the new session file, so the same message and
/// request ids show up more than once. Entries missing either id are kept.
pub fn dedup(entries: Vec<UsageEntry>) -> Vec<UsageEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| {
            if e.message_id.is_empty() || e.request_id.is_empty() {
                return true;
            }
            seen.insert(entry_hash(e))
        })
        .collect()
}

fn entry_hash(e: &UsageEntry) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    e.message_id.hash(&mut hasher);
    e.request_id.hash(&mut hasher);
    hasher.finish()
}
