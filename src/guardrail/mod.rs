//! Content guardrails.
//!
//! A guardrail inspects text before it reaches a provider (and optionally the
//! provider's output) and reports whether it should be blocked. Checks are
//! billable: each outcome carries the USD cost of the check itself.

pub mod http;
pub mod terms;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{GuardrailConfig, GuardrailKind};
use crate::error::GatewayError;

pub use self::http::HttpGuardrail;
pub use self::terms::TermListGuardrail;

/// Which side of the conversation is being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GuardrailSource {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailOutcome {
    pub blocked: bool,
    /// USD cost of the check.
    pub cost: f64,
    /// Human-readable reason when blocked.
    pub details: Option<String>,
}

impl GuardrailOutcome {
    pub fn allowed(cost: f64) -> Self {
        Self {
            blocked: false,
            cost,
            details: None,
        }
    }

    pub fn blocked(cost: f64, details: impl Into<String>) -> Self {
        Self {
            blocked: true,
            cost,
            details: Some(details.into()),
        }
    }
}

pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;

    fn check<'a>(
        &'a self,
        text: &'a str,
        source: GuardrailSource,
    ) -> Pin<Box<dyn Future<Output = Result<GuardrailOutcome, GatewayError>> + Send + 'a>>;
}

/// Number of billable text units in `text`: `ceil(chars / unit_chars)`.
pub fn text_units(text: &str, unit_chars: usize) -> u64 {
    let chars = text.chars().count();
    if chars == 0 || unit_chars == 0 {
        return 0;
    }
    chars.div_ceil(unit_chars) as u64
}

/// Build the configured guardrail, if any.
pub fn build_guardrail(config: &GuardrailConfig) -> Result<Option<Arc<dyn Guardrail>>, GatewayError> {
    let guardrail: Arc<dyn Guardrail> = match config.kind {
        GuardrailKind::None => return Ok(None),
        GuardrailKind::Terms => Arc::new(TermListGuardrail::new(
            config.blocked_terms.clone(),
            config.cost_per_text_unit,
            config.text_unit_chars,
        )),
        GuardrailKind::Http => {
            let url = config.url.clone().ok_or_else(|| {
                GatewayError::InvalidRequest("HTTP guardrail requires a url".into())
            })?;
            Arc::new(HttpGuardrail::new(
                url,
                config.cost_per_text_unit,
                config.timeout_secs,
            )?)
        }
    };
    tracing::info!(guardrail = %guardrail.name(), "Guardrail enabled");
    Ok(Some(guardrail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_units_rounds_up() {
        assert_eq!(text_units("", 1000), 0);
        assert_eq!(text_units("a", 1000), 1);
        assert_eq!(text_units(&"a".repeat(1000), 1000), 1);
        assert_eq!(text_units(&"a".repeat(1001), 1000), 2);
        // Counted in characters, not bytes.
        assert_eq!(text_units("ééé", 3), 1);
    }

    #[test]
    fn test_build_guardrail_none() {
        assert!(build_guardrail(&GuardrailConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_build_guardrail_terms() {
        let config = GuardrailConfig {
            kind: GuardrailKind::Terms,
            blocked_terms: vec!["secret".into()],
            ..Default::default()
        };
        let guardrail = build_guardrail(&config).unwrap().unwrap();
        assert_eq!(guardrail.name(), "terms");
    }

    #[test]
    fn test_build_http_guardrail_without_url() {
        let config = GuardrailConfig {
            kind: GuardrailKind::Http,
            ..Default::default()
        };
        assert!(build_guardrail(&config).is_err());
    }

    #[test]
    fn test_source_wire_format() {
        assert_eq!(serde_json::to_value(GuardrailSource::Input).unwrap(), "INPUT");
    }
}
