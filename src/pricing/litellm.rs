use std::collections::HashMap;

use anyhow::Result;

use crate::cost::ModelPrice;

pub const LITELLM_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

const PER_MILLION: f64 = 1_000_000.0;

pub fn fetch_litellm_json(agent: &ureq::Agent) -> Result<String> {
    let body = agent
        .get(LITELLM_URL)
        .call()?
        .body_mut()
        .read_to_string()?;
    Ok(body)
}

/// Parse the LiteLLM table. Its costs are USD per token; the result is in
/// USD per million tokens like every other price in this crate.
pub fn parse_litellm_json(data: &str) -> Result<HashMap<String, ModelPrice>> {
    let raw: HashMap<String, serde_json::Value> = serde_json::from_str(data)?;
    let mut map = HashMap::new();

    for (key, val) in &raw {
        let Some(input) = val.get("input_cost_per_token").and_then(|v| v.as_f64()) else {
            continue;
        };
        let Some(output) = val.get("output_cost_per_token").and_then(|v| v.as_f64()) else {
            continue;
        };

        let per_million = |field: &str| {
            val.get(field)
                .and_then(|v| v.as_f64())
                .map(|v| v * PER_MILLION)
        };

        let price = ModelPrice {
            input: input * PER_MILLION,
            output: output * PER_MILLION,
            cache_write: per_million("cache_creation_input_token_cost"),
            cache_read: per_million("cache_read_input_token_cost"),
        };

        map.insert(key.clone(), price);

        // Also store under normalized names for lookup
        for normalized in normalize_key(key) {
            map.entry(normalized).or_insert(price);
        }
    }

    Ok(map)
}

/// Generate normalized variants of a LiteLLM key so Claude Code model names
/// (e.g. "claude-opus-4-5-20251101") can be looked up directly.
fn normalize_key(key: &str) -> Vec<String> {
    let mut variants = Vec::new();

    let stripped = strip_provider_prefix(key);
    if stripped != key {
        variants.push(stripped.to_string());
    }

    let without_suffix = strip_version_suffix(stripped);
    if without_suffix != stripped {
        variants.push(without_suffix.to_string());
    }

    variants
}

fn strip_provider_prefix(key: &str) -> &str {
    // Longest prefixes first
    let prefixes = [
        "us.anthropic.",
        "eu.anthropic.",
        "au.anthropic.",
        "apac.anthropic.",
        "global.anthropic.",
        "anthropic.",
        "anthropic/",
    ];

    for prefix in prefixes {
        if let Some(rest) = key.strip_prefix(prefix) {
            return rest;
        }
    }

    // "bedrock/us-west-2/anthropic.claude-..."
    if let Some(rest) = key.strip_prefix("bedrock/") {
        let rest = rest.find('/').map_or(rest, |idx| &rest[idx + 1..]);
        return strip_provider_prefix(rest);
    }

    key
}

fn strip_version_suffix(key: &str) -> &str {
    // "-v1:0", "-v1", ":0"
    if let Some(stripped) = key.strip_suffix(":0") {
        return stripped.strip_suffix("-v1").unwrap_or(stripped);
    }
    key.strip_suffix("-v1").unwrap_or(key)
}
