use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::{BaseDirs, ProjectDirs};
use serde::Deserialize;
use tracing::warn;

use crate::aggregate::DEFAULT_BUCKET_MINUTES;
use crate::cost::ModelPrice;

/// A billing route and its cost multiplier relative to list price.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Upstream {
    pub rate: f64,
    #[serde(default)]
    pub name: String,
}

/// Runtime configuration, loaded once at startup and shared read-only.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Roots scanned for `.jsonl` usage logs. Empty means the Claude defaults.
    pub data_dirs: Vec<PathBuf>,
    /// Channel switch log: `datetime, ..., channel`.
    pub upstream_log: Option<PathBuf>,
    /// Channel multiplier history: `datetime, channel, multiplier`.
    pub upstream_rate_log: Option<PathBuf>,
    /// Model price history: `datetime, model, input, output, cache_write, cache_read`.
    pub price_log: Option<PathBuf>,
    pub upstreams: BTreeMap<String, Upstream>,
    pub model_pricing: BTreeMap<String, ModelPrice>,
    pub bind: String,
    pub refresh_secs: u64,
    pub bucket_minutes: u32,
    pub history_ttl_secs: u64,
    pub remote_pricing: bool,
    pub remote_pricing_ttl_secs: u64,
    pub fetch_timeout_secs: u64,
    pub dedup: bool,
}

fn claude_home() -> Option<PathBuf> {
    BaseDirs::new().map(|d| d.home_dir().join(".claude"))
}

fn default_upstreams() -> BTreeMap<String, Upstream> {
    [
        ("official", 1.0, "Official"),
        ("claude", 6.0, "Relay (official)"),
        ("azure", 4.0, "Relay (Azure)"),
        ("2api", 0.6, "2api"),
        ("droid", 0.25, "AWS droid"),
    ]
    .into_iter()
    .map(|(id, rate, name)| {
        (
            id.to_string(),
            Upstream {
                rate,
                name: name.to_string(),
            },
        )
    })
    .collect()
}

fn default_model_pricing() -> BTreeMap<String, ModelPrice> {
    [
        ("claude-opus-4-5-20251101", ModelPrice::new(5.0, 25.0, 6.25, 0.5)),
        ("claude-sonnet-4-5-20250929", ModelPrice::new(3.0, 15.0, 3.75, 0.3)),
        ("claude-sonnet-4-20250514", ModelPrice::new(3.0, 15.0, 3.75, 0.3)),
        ("claude-3-5-sonnet-20241022", ModelPrice::new(3.0, 15.0, 3.75, 0.3)),
        ("claude-haiku-4-5-20251001", ModelPrice::new(1.0, 5.0, 1.25, 0.1)),
    ]
    .into_iter()
    .map(|(model, price)| (model.to_string(), price))
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        let home = claude_home();
        Self {
            data_dirs: Vec::new(),
            upstream_log: home.as_ref().map(|h| h.join("upstream.log")),
            upstream_rate_log: home.as_ref().map(|h| h.join("upstream_rates.log")),
            price_log: home.as_ref().map(|h| h.join("model_prices.log")),
            upstreams: default_upstreams(),
            model_pricing: default_model_pricing(),
            bind: "0.0.0.0:3001".to_string(),
            refresh_secs: 30,
            bucket_minutes: DEFAULT_BUCKET_MINUTES,
            history_ttl_secs: 30,
            remote_pricing: true,
            remote_pricing_ttl_secs: 60 * 60,
            fetch_timeout_secs: 10,
            dedup: false,
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "brmon").map(|d| d.config_dir().join("config.toml"))
}

pub fn parse_config(data: &str) -> Result<Config> {
    let config: Config = toml::from_str(data)?;
    Ok(config)
}

/// Load the config file.
///
/// An explicit path must exist and parse. The default location is optional:
/// a missing file gives defaults, an invalid one logs a warning and also
/// gives defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        return parse_config(&data)
            .with_context(|| format!("Invalid config {}", path.display()));
    }

    let Some(path) = default_config_path() else {
        return Ok(Config::default());
    };
    let Ok(data) = fs::read_to_string(&path) else {
        return Ok(Config::default());
    };

    match parse_config(&data) {
        Ok(config) => Ok(config),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.bucket_minutes, 1);
        assert_eq!(config.refresh_secs, 30);
        assert_eq!(config.upstreams["official"].rate, 1.0);
        assert_eq!(config.upstreams["droid"].rate, 0.25);
        assert!(config.model_pricing.contains_key("claude-sonnet-4-5-20250929"));
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse_config(
            r#"
bind = "127.0.0.1:9000"
bucket_minutes = 5
upstream_log = "/tmp/upstream.log"

[upstreams.relay]
rate = 2.5
name = "Relay"

[model_pricing.model-x]
input = 2.0
output = 10.0
cache_creation = 2.5
"#,
        )
        .unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.bucket_minutes, 5);
        assert_eq!(config.upstream_log, Some(PathBuf::from("/tmp/upstream.log")));
        assert_eq!(config.upstreams.len(), 1);
        assert_eq!(config.upstreams["relay"].rate, 2.5);
        let price = config.model_pricing["model-x"];
        assert_eq!(price.cache_write, Some(2.5));
        assert_eq!(price.cache_read, None);
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(dir.path().join("missing.toml").as_path())).is_err());

        let path = dir.path().join("config.toml");
        fs::write(&path, "refresh_secs = 5\n").unwrap();
        assert_eq!(load_config(Some(path.as_path())).unwrap().refresh_secs, 5);

        fs::write(&path, "refresh_secs = \"soon\"\n").unwrap();
        assert!(load_config(Some(path.as_path())).is_err());
    }
}
