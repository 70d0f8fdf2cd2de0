//! HTTP relay to a standalone gateway.
//!
//! Admission, guardrails and metering happen on the gateway; this client only
//! translates its responses back into [`InvokeOutcome`] values so callers see
//! the same shapes as with the in-process client.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;

use crate::error::GatewayError;
use crate::net::{HttpClient, join_url};
use crate::providers::types::ConverseResponse;
use crate::registry::ModelSummary;
use crate::stream::{EventStream, NdjsonStream};

use super::{InferenceClient, InvocationRequest, InvokeOutcome, ListModelsFilter};

pub const INVOKE_PATH: &str = "/api/v1/model/invoke";
pub const MODELS_PATH: &str = "/api/v1/models";

const GUARDRAIL_PREFIX: &str = "Content blocked by guardrail: ";

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    code: Option<String>,
}

impl ErrorBody {
    fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_else(|_| Self {
            error: text.to_string(),
            code: None,
        })
    }
}

pub struct RemoteClient {
    base_url: String,
    client: HttpClient,
    /// Whole-exchange timeout for non-streaming calls. Streams are bounded
    /// only by the connect timeout.
    timeout: Duration,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, GatewayError> {
        let client = HttpClient::builder()
            .no_request_timeout()
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    async fn post_invoke(&self, request: InvocationRequest) -> Result<InvokeOutcome, GatewayError> {
        let url = join_url(&self.base_url, INVOKE_PATH);
        tracing::debug!(url = %url, model = %request.model, stream = request.stream, "Relaying invocation");

        let mut builder = self.client.inner().post(&url).json(&request);
        if !request.stream {
            builder = builder.timeout(self.timeout);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return error_outcome(status, &text);
        }

        if request.stream {
            let events = NdjsonStream::new(resp.bytes_stream())
                .map(|item| item.map_err(|e| GatewayError::Transport(e.to_string())));
            let stream: EventStream = Box::pin(events);
            return Ok(InvokeOutcome::Stream(stream));
        }

        let response: ConverseResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("invalid gateway response: {e}")))?;
        Ok(InvokeOutcome::Response(response))
    }

    async fn get_models(&self, filter: ListModelsFilter) -> Result<Vec<ModelSummary>, GatewayError> {
        let mut url = url::Url::parse(&join_url(&self.base_url, MODELS_PATH))
            .map_err(|e| GatewayError::InvalidRequest(format!("invalid gateway url: {e}")))?;
        if let Some(ref model_type) = filter.model_type {
            url.query_pairs_mut().append_pair("type", model_type);
        }

        let resp = self
            .client
            .inner()
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Remote {
                status,
                message: ErrorBody::parse(&text).error,
            });
        }

        resp.json()
            .await
            .map_err(|e| GatewayError::Transport(format!("invalid gateway response: {e}")))
    }
}

/// Map a non-2xx gateway response back onto the client contract.
fn error_outcome(status: u16, text: &str) -> Result<InvokeOutcome, GatewayError> {
    let body = ErrorBody::parse(text);
    if status == 429 {
        return Ok(InvokeOutcome::Rejected {
            error: body.error,
            status,
        });
    }
    if body.code.as_deref() == Some("guardrail_blocked") {
        let details = body
            .error
            .strip_prefix(GUARDRAIL_PREFIX)
            .unwrap_or(&body.error)
            .to_string();
        return Err(GatewayError::GuardrailBlocked(details));
    }
    tracing::warn!(status, error = %body.error, "Gateway returned error");
    Err(GatewayError::Remote {
        status,
        message: body.error,
    })
}

impl InferenceClient for RemoteClient {
    fn mode(&self) -> &'static str {
        "remote"
    }

    fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<InvokeOutcome, GatewayError>> + Send + '_>> {
        Box::pin(self.post_invoke(request))
    }

    fn list_models(
        &self,
        filter: ListModelsFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ModelSummary>, GatewayError>> + Send + '_>> {
        Box::pin(self.get_models(filter))
    }
}
