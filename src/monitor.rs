use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeZone};
use tracing::debug;

use crate::aggregate::{aggregate, aggregate_channels, bucket_width, clamp_bucket_minutes};
use crate::cache::{Clock, SystemClock};
use crate::config::Config;
use crate::dedup::dedup;
use crate::loader::{default_roots, load_entries};
use crate::pricing::{LiteLlmFetcher, NoRemotePricing, PriceFetcher};
use crate::rates::{RateBook, RateSources};
use crate::stats::{calculate_burn_rate, calculate_stats};
use crate::types::{BurnRateResponse, Report, Stats, UsageEntry};
use crate::window::{select, View};

/// The burn-rate pipeline: load, window, bucket, reduce.
///
/// Holds no per-request state; the rate caches inside are safe to hit from
/// the refresh task and request handlers at once.
pub struct Monitor<Tz: TimeZone = Local> {
    config: Arc<Config>,
    roots: Vec<PathBuf>,
    rates: RateSources,
    clock: Arc<dyn Clock>,
    tz: Tz,
}

impl Monitor<Local> {
    pub fn new(config: Arc<Config>, offline: bool) -> Self {
        let fetcher: Box<dyn PriceFetcher> = if config.remote_pricing {
            Box::new(LiteLlmFetcher::new(
                Duration::from_secs(config.fetch_timeout_secs),
                offline,
            ))
        } else {
            Box::new(NoRemotePricing)
        };
        Self::with_parts(config, fetcher, Arc::new(SystemClock), Local)
    }
}

impl<Tz> Monitor<Tz>
where
    Tz: TimeZone + Send + Sync,
{
    pub fn with_parts(
        config: Arc<Config>,
        fetcher: Box<dyn PriceFetcher>,
        clock: Arc<dyn Clock>,
        tz: Tz,
    ) -> Self {
        let roots = if config.data_dirs.is_empty() {
            default_roots()
        } else {
            config.data_dirs.clone()
        };
        let rates = RateSources::new(&config, fetcher);
        Self {
            config,
            roots,
            rates,
            clock,
            tz,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Wall-clock now in the monitor's time zone.
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now().with_timezone(&self.tz).naive_local()
    }

    pub fn rate_book(&self) -> RateBook {
        self.rates.snapshot(self.clock.instant())
    }

    /// Every usage entry on disk, sorted by timestamp.
    fn load(&self, rates: &RateBook) -> Vec<UsageEntry> {
        let entries = load_entries(&self.roots, &self.tz, rates);
        if self.config.dedup {
            dedup(entries)
        } else {
            entries
        }
    }

    pub fn compute(&self, view: View, bucket_minutes: u32) -> BurnRateResponse {
        self.report(view, bucket_minutes).response
    }

    /// [`Monitor::compute`] plus the raw-versus-billed split per channel.
    pub fn report(&self, view: View, bucket_minutes: u32) -> Report {
        let now = self.now();
        let rates = self.rate_book();
        let entries = self.load(&rates);
        let selected = select(&entries, view, now);
        let data = aggregate(selected.iter().copied(), bucket_width(bucket_minutes));
        let channels = aggregate_channels(selected.iter().copied(), &rates);
        let current_rate = calculate_burn_rate(&data);
        let stats = calculate_stats(&data);

        debug!(
            view = view.as_str(),
            entries = selected.len(),
            buckets = data.len(),
            "computed burn rate"
        );

        Report {
            response: BurnRateResponse {
                view,
                bucket_minutes: clamp_bucket_minutes(bucket_minutes),
                current_rate,
                data,
                stats,
                generated_at: now,
            },
            channels,
        }
    }

    pub fn compute_stats_for_today(&self) -> Stats {
        self.compute(View::Today, self.config.bucket_minutes).stats
    }
}
