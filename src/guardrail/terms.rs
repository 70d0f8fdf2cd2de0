use std::future::Future;
use std::pin::Pin;

use super::{Guardrail, GuardrailOutcome, GuardrailSource, text_units};
use crate::error::GatewayError;

/// Blocks text containing any configured term, case-insensitively.
pub struct TermListGuardrail {
    terms: Vec<String>,
    cost_per_unit: f64,
    unit_chars: usize,
}

impl TermListGuardrail {
    pub fn new(terms: Vec<String>, cost_per_unit: f64, unit_chars: usize) -> Self {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            cost_per_unit,
            unit_chars,
        }
    }

    fn evaluate(&self, text: &str) -> GuardrailOutcome {
        let cost = text_units(text, self.unit_chars) as f64 * self.cost_per_unit;
        let haystack = text.to_lowercase();
        match self.terms.iter().find(|term| haystack.contains(term.as_str())) {
            Some(term) => GuardrailOutcome::blocked(cost, format!("blocked term '{term}'")),
            None => GuardrailOutcome::allowed(cost),
        }
    }
}

impl Guardrail for TermListGuardrail {
    fn name(&self) -> &str {
        "terms"
    }

    fn check<'a>(
        &'a self,
        text: &'a str,
        source: GuardrailSource,
    ) -> Pin<Box<dyn Future<Output = Result<GuardrailOutcome, GatewayError>> + Send + 'a>> {
        Box::pin(async move {
            let outcome = self.evaluate(text);
            if outcome.blocked {
                tracing::info!(?source, details = ?outcome.details, "Guardrail blocked content");
            }
            Ok(outcome)
        })
    }
}
