use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use super::{Guardrail, GuardrailOutcome, GuardrailSource};
use crate::error::GatewayError;
use crate::net::HttpClient;

#[derive(Debug, Serialize)]
struct CheckRequest<'a> {
    text: &'a str,
    source: GuardrailSource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckResponse {
    action: String,
    #[serde(default)]
    text_units: u64,
    #[serde(default)]
    details: Option<String>,
}

/// Delegates checks to an external content-safety service.
///
/// The service receives `{ text, source }` and answers with
/// `{ action: "BLOCKED" | "NONE", textUnits, details }`.
pub struct HttpGuardrail {
    url: String,
    cost_per_unit: f64,
    client: HttpClient,
}

impl HttpGuardrail {
    pub fn new(url: String, cost_per_unit: f64, timeout_secs: u64) -> Result<Self, GatewayError> {
        let client = HttpClient::with_timeout_secs(timeout_secs)
            .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            url,
            cost_per_unit,
            client,
        })
    }
}

impl Guardrail for HttpGuardrail {
    fn name(&self) -> &str {
        "http"
    }

    fn check<'a>(
        &'a self,
        text: &'a str,
        source: GuardrailSource,
    ) -> Pin<Box<dyn Future<Output = Result<GuardrailOutcome, GatewayError>> + Send + 'a>> {
        Box::pin(async move {
            let resp = self
                .client
                .inner()
                .post(&self.url)
                .json(&CheckRequest { text, source })
                .send()
                .await
                .map_err(|e| GatewayError::GuardrailUnavailable(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(GatewayError::GuardrailUnavailable(format!(
                    "guardrail returned {}: {body}",
                    status.as_u16()
                )));
            }

            let body: CheckResponse = resp
                .json()
                .await
                .map_err(|e| GatewayError::GuardrailUnavailable(format!("invalid response: {e}")))?;

            let cost = body.text_units as f64 * self.cost_per_unit;
            if body.action.eq_ignore_ascii_case("BLOCKED") {
                let details = body.details.unwrap_or_else(|| "content policy".to_string());
                tracing::info!(?source, details = %details, "Guardrail blocked content");
                Ok(GuardrailOutcome::blocked(cost, details))
            } else {
                Ok(GuardrailOutcome::allowed(cost))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_blocked_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/check"))
            .and(body_json(json!({"text": "bad words", "source": "INPUT"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "action": "BLOCKED",
                "textUnits": 2,
                "details": "hate speech"
            })))
            .mount(&server)
            .await;

        let guardrail = HttpGuardrail::new(format!("{}/check", server.uri()), 0.5, 5).unwrap();
        let outcome = guardrail.check("bad words", GuardrailSource::Input).await.unwrap();
        assert_eq!(outcome, GuardrailOutcome::blocked(1.0, "hate speech"));
    }

    #[tokio::test]
    async fn test_allowed_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "action": "NONE",
                "textUnits": 1
            })))
            .mount(&server)
            .await;

        let guardrail = HttpGuardrail::new(server.uri(), 0.25, 5).unwrap();
        let outcome = guardrail.check("fine", GuardrailSource::Output).await.unwrap();
        assert_eq!(outcome, GuardrailOutcome::allowed(0.25));
    }

    #[tokio::test]
    async fn test_service_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let guardrail = HttpGuardrail::new(server.uri(), 0.0, 5).unwrap();
        let err = guardrail.check("x", GuardrailSource::Input).await.unwrap_err();
        assert!(matches!(err, GatewayError::GuardrailUnavailable(_)));
    }
}
