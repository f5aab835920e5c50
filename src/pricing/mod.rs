mod litellm;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use tracing::{debug, warn};

use crate::cost::{ModelPrice, PricingMap};

const DISK_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// Model table from the remote pricing source.
#[derive(Debug, Clone, Default)]
pub struct CachedPricing {
    map: HashMap<String, ModelPrice>,
}

impl CachedPricing {
    pub fn new(map: HashMap<String, ModelPrice>) -> Self {
        Self { map }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

impl PricingMap for CachedPricing {
    fn get(&self, model: &str) -> Option<&ModelPrice> {
        self.map.get(model)
    }
}

/// Best-effort remote price table.
pub trait PriceFetcher: Send + Sync {
    fn fetch(&self) -> Result<CachedPricing>;
}

/// Fetcher that never has data; used with `--offline` and in tests.
pub struct NoRemotePricing;

impl PriceFetcher for NoRemotePricing {
    fn fetch(&self) -> Result<CachedPricing> {
        bail!("remote pricing disabled")
    }
}

/// LiteLLM price table over HTTPS, mirrored to an on-disk cache.
pub struct LiteLlmFetcher {
    agent: ureq::Agent,
    offline: bool,
}

impl LiteLlmFetcher {
    pub fn new(timeout: Duration, offline: bool) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent, offline }
    }
}

fn cache_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "brmon").map(|d| d.cache_dir().join("pricing.json"))
}

fn cache_is_fresh(path: &PathBuf) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|d| d.as_secs() < DISK_CACHE_TTL_SECS)
        .unwrap_or(false)
}

fn read_cache(path: &PathBuf) -> Option<CachedPricing> {
    let data = fs::read_to_string(path).ok()?;
    let map = litellm::parse_litellm_json(&data).ok()?;
    Some(CachedPricing::new(map))
}

impl PriceFetcher for LiteLlmFetcher {
    fn fetch(&self) -> Result<CachedPricing> {
        let cache = cache_path();

        if let Some(ref path) = cache {
            if self.offline || cache_is_fresh(path) {
                if let Some(pricing) = read_cache(path) {
                    debug!(models = pricing.len(), "using cached remote pricing");
                    return Ok(pricing);
                }
            }
        }
        if self.offline {
            bail!("offline: no valid pricing cache found");
        }

        let data = match litellm::fetch_litellm_json(&self.agent) {
            Ok(data) => data,
            Err(e) => {
                // A stale table beats none at all.
                if let Some(pricing) = cache.as_ref().and_then(read_cache) {
                    warn!(error = %e, "pricing fetch failed, using stale cache");
                    return Ok(pricing);
                }
                return Err(e).context("Failed to fetch pricing data");
            }
        };
        let map = litellm::parse_litellm_json(&data).context("Failed to parse pricing data")?;

        if let Some(ref path) = cache {
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = fs::write(path, &data);
        }

        debug!(models = map.len(), "fetched remote pricing");
        Ok(CachedPricing::new(map))
    }
}
