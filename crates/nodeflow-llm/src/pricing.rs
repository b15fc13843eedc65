use std::collections::HashMap;

use nodeflow_core::config::{AppConfig, ModelConfig};
use nodeflow_core::types::Pricing;

/// Price charged for models missing from the table.
pub const DEFAULT_PRICING: Pricing = Pricing::new(3.0, 15.0);

/// Built-in per-million-token prices in USD, keyed by `provider/model`.
const BUILTIN: &[(&str, Pricing)] = &[
    ("openai/gpt-4o", Pricing::new(2.5, 10.0)),
    ("openai/gpt-4o-mini", Pricing::new(0.15, 0.6)),
    ("openai/gpt-4.1", Pricing::new(2.0, 8.0)),
    ("openai/gpt-4.1-mini", Pricing::new(0.4, 1.6)),
    ("anthropic/claude-3-5-sonnet-latest", Pricing::new(3.0, 15.0)),
    ("anthropic/claude-3-5-haiku-latest", Pricing::new(0.8, 4.0)),
    ("anthropic/claude-sonnet-4-20250514", Pricing::new(3.0, 15.0)),
    ("gemini/gemini-1.5-pro", Pricing::new(1.25, 5.0)),
    ("gemini/gemini-1.5-flash", Pricing::new(0.075, 0.3)),
    ("gemini/gemini-2.0-flash", Pricing::new(0.1, 0.4)),
    ("workers-ai/@cf/meta/llama-3.1-8b-instruct", Pricing::new(0.28, 0.83)),
];

/// Read-only price lookup shared by every run in the process.
#[derive(Debug, Clone)]
pub struct PricingTable {
    prices: HashMap<String, Pricing>,
    fallback: Pricing,
}

impl PricingTable {
    /// The built-in table.
    pub fn builtin() -> Self {
        Self {
            prices: BUILTIN
                .iter()
                .map(|(key, price)| (key.to_string(), *price))
                .collect(),
            fallback: DEFAULT_PRICING,
        }
    }

    /// Built-in table with the config's `[pricing]` overrides applied.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut table = Self::builtin();
        for (key, price) in &config.pricing {
            table.prices.insert(key.clone(), *price);
        }
        table
    }

    /// Price for a model, falling back to [`DEFAULT_PRICING`].
    pub fn lookup(&self, model: &ModelConfig) -> Pricing {
        self.get(&model.pricing_key()).unwrap_or(self.fallback)
    }

    pub fn get(&self, key: &str) -> Option<Pricing> {
        self.prices.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}
