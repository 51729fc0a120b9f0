use serde::{Deserialize, Serialize};

/// Token counts for a single completion, as reported by the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// A cache hit costs nothing.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0
    }

    /// Monetary cost in USD given unit costs expressed in USD per 1M tokens.
    pub fn cost_usd(&self, input_cost: f64, output_cost: f64) -> f64 {
        (self.prompt_tokens as f64 * input_cost + self.completion_tokens as f64 * output_cost)
            / 1_000_000.0
    }
}
