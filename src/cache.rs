use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Source of the current time. Swapped for a fixed clock in tests.
pub trait Clock: Send + Sync {
    /// Monotonic instant, used for cache expiry.
    fn instant(&self) -> Instant;
    /// Wall-clock time, used for view windows.
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn instant(&self) -> Instant {
        Instant::now()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct Slot<T> {
    loaded_at: Instant,
    value: Arc<T>,
}

/// A single value with a refresh deadline.
///
/// Readers within the TTL share the cached `Arc`. Once it expires the next
/// caller reloads and replaces it; callers racing that reload may see either
/// snapshot.
pub struct TtlCache<T> {
    ttl: Duration,
    slot: RwLock<Option<Slot<T>>>,
}

impl<T> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Cached value if loaded within the TTL as of `now`, otherwise the result
    /// of `load`, which then becomes the cached value.
    pub fn get_or_refresh<F>(&self, now: Instant, load: F) -> Arc<T>
    where
        F: FnOnce() -> T,
    {
        {
            let guard = self.slot.read().unwrap_or_else(|e| e.into_inner());
            if let Some(slot) = guard.as_ref() {
                if now.saturating_duration_since(slot.loaded_at) < self.ttl {
                    return Arc::clone(&slot.value);
                }
            }
        }

        let value = Arc::new(load());
        let mut guard = self.slot.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Slot {
            loaded_at: now,
            value: Arc::clone(&value),
        });
        value
    }
}
