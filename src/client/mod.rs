//! Inference client contract.
//!
//! Callers hold an `Arc<dyn InferenceClient>` chosen once at startup by the
//! [`factory`]. Both implementations expose the same `invoke` and
//! `list_models` behaviour: [`DirectClient`] runs admission, guardrails,
//! the provider call and metering in-process, and [`RemoteClient`] relays to
//! a standalone gateway over HTTP.

pub mod direct;
pub mod factory;
pub mod remote;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::providers::types::{ConverseResponse, Message, Tool};
use crate::registry::ModelSummary;
use crate::stream::EventStream;

pub use self::direct::DirectClient;
pub use self::factory::{ClientMode, build_client};
pub use self::remote::RemoteClient;

/// A single model invocation. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    /// Metering and admission are skipped when absent.
    #[serde(default, alias = "userID", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Registry id or internal name.
    pub model: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_budget: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_config: Option<serde_json::Value>,
}

impl InvocationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            user_id: None,
            model: model.into(),
            messages,
            system: None,
            tools: Vec::new(),
            thought_budget: None,
            stream: false,
            ip: None,
            output_config: None,
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// What an invocation produced.
pub enum InvokeOutcome {
    Response(ConverseResponse),
    Stream(EventStream),
    /// Admission control refused the call. Not an error: no provider call
    /// was made and nothing was metered.
    Rejected { error: String, status: u16 },
}

impl fmt::Debug for InvokeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(resp) => f.debug_tuple("Response").field(resp).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Rejected { error, status } => f
                .debug_struct("Rejected")
                .field("error", error)
                .field("status", status)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListModelsFilter {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
}

impl ListModelsFilter {
    pub fn of_type(model_type: impl Into<String>) -> Self {
        Self {
            model_type: Some(model_type.into()),
        }
    }
}

pub trait InferenceClient: Send + Sync {
    /// `"direct"` or `"remote"`.
    fn mode(&self) -> &'static str;

    fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<InvokeOutcome, GatewayError>> + Send + '_>>;

    fn list_models(
        &self,
        filter: ListModelsFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ModelSummary>, GatewayError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_user_id_alias() {
        let req: InvocationRequest = serde_json::from_str(
            r#"{"userID":"u1","model":"gpt-mini","messages":[{"role":"user","content":[{"type":"text","text":"hi"}]}],"thoughtBudget":512,"stream":true}"#,
        )
        .unwrap();
        assert_eq!(req.user_id.as_deref(), Some("u1"));
        assert_eq!(req.thought_budget, Some(512));
        assert!(req.stream);
        assert_eq!(req.messages[0].text(), "hi");
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let req = InvocationRequest::new("gpt-mini", vec![Message::user("hi")])
            .for_user("u1")
            .streaming();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["stream"], true);
        assert!(json.get("tools").is_none());
        assert!(json.get("outputConfig").is_none());

        let back: InvocationRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_rejected_debug() {
        let outcome = InvokeOutcome::Rejected {
            error: "quota".into(),
            status: 429,
        };
        assert_eq!(format!("{outcome:?}"), r#"Rejected { error: "quota", status: 429 }"#);
    }
}
