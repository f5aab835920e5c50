use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::TokenUsage;

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

/// Unit prices for a model, in USD per million tokens.
///
/// Cache prices are optional; a missing cache price bills those tokens at
/// zero rather than guessing a ratio to the input price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
    #[serde(default, alias = "cache_creation")]
    pub cache_write: Option<f64>,
    #[serde(default)]
    pub cache_read: Option<f64>,
}

impl ModelPrice {
    pub const fn new(input: f64, output: f64, cache_write: f64, cache_read: f64) -> Self {
        Self {
            input,
            output,
            cache_write: Some(cache_write),
            cache_read: Some(cache_read),
        }
    }
}

/// Trait for looking up pricing by model name.
pub trait PricingMap {
    fn get(&self, model: &str) -> Option<&ModelPrice>;
}

/// Fixed model table, usually the `model_pricing` section of the config.
#[derive(Debug, Clone, Default)]
pub struct StaticPricing {
    map: HashMap<String, ModelPrice>,
}

impl StaticPricing {
    pub fn new(map: HashMap<String, ModelPrice>) -> Self {
        Self { map }
    }
}

impl PricingMap for StaticPricing {
    fn get(&self, model: &str) -> Option<&ModelPrice> {
        self.map.get(model)
    }
}

/// Cost of one usage record, before and after the channel multiplier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cost {
    pub raw: f64,
    pub actual: f64,
}

/// List-price cost of `tokens` under `price`.
pub fn raw_cost(tokens: &TokenUsage, price: &ModelPrice) -> f64 {
    let mut cost = 0.0;
    cost += tokens.input_tokens as f64 * price.input;
    cost += tokens.output_tokens as f64 * price.output;
    if let Some(cw) = price.cache_write {
        cost += tokens.cache_creation_input_tokens as f64 * cw;
    }
    if let Some(cr) = price.cache_read {
        cost += tokens.cache_read_input_tokens as f64 * cr;
    }
    cost / TOKENS_PER_UNIT
}

pub fn calculate(tokens: &TokenUsage, price: &ModelPrice, multiplier: f64) -> Cost {
    let raw = raw_cost(tokens, price);
    Cost {
        raw,
        actual: raw * multiplier,
    }
}
