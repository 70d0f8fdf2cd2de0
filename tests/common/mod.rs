#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use modelgate::AppState;
use modelgate::api::build_api_router;
use modelgate::budget::UsageLedger;
use modelgate::client::{DirectClient, InferenceClient, RemoteClient};
use modelgate::config::Config;
use modelgate::db::Database;
use modelgate::guardrail::Guardrail;
use modelgate::providers::types::{
    ConverseRequest, ConverseResponse, Message, Metrics, Role, StopReason, TokenUsage,
};
use modelgate::providers::{ModelProvider, ProviderError, ProviderEventStream, ProviderRouter};
use modelgate::registry::{Model, ModelRegistry};
use modelgate::stream::StreamEvent;

pub const REPLY: &str = "The quick brown fox jumps over the lazy dog.";

/// $0.01 / 1k input, $0.02 / 1k output.
pub fn test_model() -> Model {
    Model {
        id: "gpt-mini".into(),
        internal_name: "gpt-4o-mini".into(),
        name: "GPT Mini".into(),
        model_type: "chat".into(),
        provider_id: "fixed".into(),
        max_context: 128_000,
        max_output: 4096,
        max_reasoning: 0,
        cost_1k_input: 0.01,
        cost_1k_output: 0.02,
    }
}

/// Provider that always answers with the same text and usage.
pub struct FixedProvider {
    text: String,
    usage: TokenUsage,
}

impl FixedProvider {
    pub fn new(text: &str, input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            text: text.to_string(),
            usage: TokenUsage::new(input_tokens, output_tokens),
        }
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        let mut events = vec![StreamEvent::MessageStart {
            role: Role::Assistant,
        }];
        for word in self.text.split_inclusive(' ') {
            events.push(StreamEvent::text_delta(0, word));
        }
        events.push(StreamEvent::MessageStop {
            stop_reason: StopReason::EndTurn,
        });
        events.push(StreamEvent::Metadata {
            usage: self.usage,
            metrics: Metrics::default(),
        });
        events
    }
}

impl ModelProvider for FixedProvider {
    fn id(&self) -> &str {
        "fixed"
    }

    fn converse(
        &self,
        _request: &ConverseRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ConverseResponse, ProviderError>> + Send + '_>> {
        Box::pin(async move {
            Ok(ConverseResponse {
                output: Message::assistant(self.text.clone()),
                stop_reason: StopReason::EndTurn,
                usage: self.usage,
                metrics: Metrics::default(),
            })
        })
    }

    fn converse_stream(
        &self,
        _request: &ConverseRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderEventStream, ProviderError>> + Send + '_>> {
        let events: Vec<Result<StreamEvent, ProviderError>> =
            self.events().into_iter().map(Ok).collect();
        Box::pin(async move { Ok(Box::pin(futures::stream::iter(events)) as ProviderEventStream) })
    }
}

/// A gateway served on an ephemeral port plus the in-process client behind it.
pub struct TestGateway {
    pub db: Database,
    pub direct: Arc<dyn InferenceClient>,
    pub remote: RemoteClient,
    pub config: Config,
}

impl TestGateway {
    pub async fn start(guardrail: Option<Arc<dyn Guardrail>>) -> Self {
        let db = Database::open_in_memory().unwrap();
        ModelRegistry::new(db.clone()).upsert(&test_model()).unwrap();

        let mut providers = ProviderRouter::new();
        providers.register(Arc::new(FixedProvider::new(REPLY, 1234, 567)));

        let config = Config::default();
        let direct: Arc<dyn InferenceClient> = Arc::new(
            DirectClient::new(db.clone(), providers, &config.budget).with_guardrail(guardrail, false),
        );

        let state = AppState {
            config: Arc::new(config.clone()),
            db: db.clone(),
            client: direct.clone(),
        };
        let app = build_api_router().with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let remote = RemoteClient::new(format!("http://{addr}"), 10).unwrap();
        Self {
            db,
            direct,
            remote,
            config,
        }
    }

    pub fn ledger(&self) -> UsageLedger {
        UsageLedger::new(self.db.clone())
    }

    /// Poll until `user_id` has at least `n` ledger rows.
    pub async fn wait_for_records(&self, user_id: &str, n: usize) {
        for _ in 0..200 {
            if self.ledger().records_for_user(user_id).unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {n} usage records");
    }
}
