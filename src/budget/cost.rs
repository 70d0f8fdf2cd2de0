//! Cost calculation from token usage and catalog pricing.
//!
//! Only input and output tokens are billed. Cache read/write counts are
//! recorded on the ledger row but carry no price.

use crate::providers::types::TokenUsage;
use crate::registry::Model;

#[derive(Debug, Clone, Copy, Default)]
pub struct CostCalculator;

impl CostCalculator {
    pub fn new() -> Self {
        Self
    }

    /// `(input / 1000) * cost_1k_input + (output / 1000) * cost_1k_output`, in USD.
    pub fn calculate_cost(&self, model: &Model, usage: &TokenUsage) -> f64 {
        let input = f64::from(usage.input_tokens) / 1000.0 * model.cost_1k_input;
        let output = f64::from(usage.output_tokens) / 1000.0 * model.cost_1k_output;
        let cost = input + output;

        tracing::debug!(
            model = %model.id,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost_usd = cost,
            "Calculated cost"
        );
        cost
    }
}
