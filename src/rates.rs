//! Price and channel-rate resolution at an instant.
//!
//! Model price: history log, then remote table, then the static config
//! table, then [`DEFAULT_PRICE`]. Channel multiplier: history log, then the
//! configured upstream rate, then 1.0. Active channel: switch log, then
//! [`DEFAULT_CHANNEL`].

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use tracing::warn;

use crate::cache::TtlCache;
use crate::config::{Config, Upstream};
use crate::cost::{ModelPrice, PricingMap, StaticPricing};
use crate::history::{self, History};
use crate::pricing::{CachedPricing, PriceFetcher};

pub const DEFAULT_CHANNEL: &str = "official";

/// Last-resort price row for models nobody knows about.
pub const DEFAULT_PRICE: ModelPrice = ModelPrice::new(3.0, 15.0, 3.75, 0.3);

/// Which rung of the fallback chain produced a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceOrigin {
    History,
    Remote,
    Static,
    Default,
}

impl PriceOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceOrigin::History => "history",
            PriceOrigin::Remote => "remote",
            PriceOrigin::Static => "static",
            PriceOrigin::Default => "default",
        }
    }
}

/// Snapshot of every rate input, taken once per computation.
#[derive(Clone)]
pub struct RateBook {
    prices: Arc<History<ModelPrice>>,
    channel_rates: Arc<History<f64>>,
    switches: Arc<History<()>>,
    remote: Arc<CachedPricing>,
    static_prices: Arc<StaticPricing>,
    upstreams: Arc<BTreeMap<String, Upstream>>,
}

impl RateBook {
    pub fn price_with_origin(&self, model: &str, at: NaiveDateTime) -> (ModelPrice, PriceOrigin) {
        if let Some(price) = self.prices.resolve(model, at) {
            return (*price, PriceOrigin::History);
        }
        if let Some(price) = self.remote.get(model) {
            return (*price, PriceOrigin::Remote);
        }
        if let Some(price) = self.static_prices.get(model) {
            return (*price, PriceOrigin::Static);
        }
        (DEFAULT_PRICE, PriceOrigin::Default)
    }

    pub fn model_price(&self, model: &str, at: NaiveDateTime) -> ModelPrice {
        self.price_with_origin(model, at).0
    }

    /// Channel serving requests at `at`.
    pub fn channel_at(&self, at: NaiveDateTime) -> &str {
        self.switches
            .latest(at)
            .map_or(DEFAULT_CHANNEL, |r| r.key.as_str())
    }

    /// Cost multiplier of `channel` at `at`.
    pub fn multiplier(&self, channel: &str, at: NaiveDateTime) -> f64 {
        if let Some(rate) = self.channel_rates.resolve(channel, at) {
            return *rate;
        }
        self.upstreams.get(channel).map_or(1.0, |u| u.rate)
    }

    pub fn upstream_name<'a>(&'a self, channel: &'a str) -> &'a str {
        self.upstreams
            .get(channel)
            .filter(|u| !u.name.is_empty())
            .map_or(channel, |u| u.name.as_str())
    }
}

/// Owns the TTL caches behind each [`RateBook`] input.
pub struct RateSources {
    price_log: Option<PathBuf>,
    rate_log: Option<PathBuf>,
    switch_log: Option<PathBuf>,
    prices: TtlCache<History<ModelPrice>>,
    channel_rates: TtlCache<History<f64>>,
    switches: TtlCache<History<()>>,
    remote: TtlCache<CachedPricing>,
    fetcher: Box<dyn PriceFetcher>,
    static_prices: Arc<StaticPricing>,
    upstreams: Arc<BTreeMap<String, Upstream>>,
}

impl RateSources {
    pub fn new(config: &Config, fetcher: Box<dyn PriceFetcher>) -> Self {
        let history_ttl = Duration::from_secs(config.history_ttl_secs);
        let static_prices: HashMap<String, ModelPrice> = config
            .model_pricing
            .iter()
            .map(|(model, price)| (model.clone(), *price))
            .collect();
        Self {
            price_log: config.price_log.clone(),
            rate_log: config.upstream_rate_log.clone(),
            switch_log: config.upstream_log.clone(),
            prices: TtlCache::new(history_ttl),
            channel_rates: TtlCache::new(history_ttl),
            switches: TtlCache::new(history_ttl),
            remote: TtlCache::new(Duration::from_secs(config.remote_pricing_ttl_secs)),
            fetcher,
            static_prices: Arc::new(StaticPricing::new(static_prices)),
            upstreams: Arc::new(config.upstreams.clone()),
        }
    }

    /// Rates as of `now`, reloading any input whose TTL has lapsed.
    pub fn snapshot(&self, now: Instant) -> RateBook {
        let prices = self.prices.get_or_refresh(now, || {
            history::read_log(self.price_log.as_deref(), history::parse_price_log)
        });
        let channel_rates = self.channel_rates.get_or_refresh(now, || {
            history::read_log(self.rate_log.as_deref(), history::parse_rate_log)
        });
        let switches = self.switches.get_or_refresh(now, || {
            history::read_log(self.switch_log.as_deref(), history::parse_switch_log)
        });
        // A failed fetch caches an empty table until the TTL lapses.
        let remote = self.remote.get_or_refresh(now, || match self.fetcher.fetch() {
            Ok(pricing) => pricing,
            Err(e) => {
                warn!(error = %e, "remote pricing unavailable");
                CachedPricing::default()
            }
        });

        RateBook {
            prices,
            channel_rates,
            switches,
            remote,
            static_prices: Arc::clone(&self.static_prices),
            upstreams: Arc::clone(&self.upstreams),
        }
    }
}
