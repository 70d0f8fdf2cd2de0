//! In-process client: admission, guardrails, provider call and metering.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::budget::{Admission, AdmissionController, UsageEvent, UsageLedger};
use crate::config::BudgetConfig;
use crate::db::Database;
use crate::error::GatewayError;
use crate::guardrail::{Guardrail, GuardrailSource};
use crate::providers::ProviderRouter;
use crate::providers::types::{ConverseRequest, Role, TokenUsage};
use crate::registry::{Model, ModelRegistry, ModelSummary};
use crate::stream::{MeterFn, spawn_metered};

use super::{InferenceClient, InvocationRequest, InvokeOutcome, ListModelsFilter};

pub struct DirectClient {
    registry: ModelRegistry,
    admission: AdmissionController,
    ledger: UsageLedger,
    providers: ProviderRouter,
    guardrail: Option<Arc<dyn Guardrail>>,
    check_output: bool,
}

impl DirectClient {
    pub fn new(db: Database, providers: ProviderRouter, budget: &BudgetConfig) -> Self {
        Self {
            registry: ModelRegistry::new(db.clone()),
            admission: AdmissionController::new(db.clone(), budget),
            ledger: UsageLedger::new(db),
            providers,
            guardrail: None,
            check_output: false,
        }
    }

    /// Attach a guardrail. `check_output` also screens non-streaming
    /// responses.
    pub fn with_guardrail(mut self, guardrail: Option<Arc<dyn Guardrail>>, check_output: bool) -> Self {
        self.guardrail = guardrail;
        self.check_output = check_output;
        self
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Meter a finished invocation. Failures are logged, not returned: the
    /// provider already ran and its result is still delivered.
    fn meter(&self, request: &InvocationRequest, model: &Model, usage: Option<TokenUsage>, guardrail_cost: f64) {
        let Some(ref user_id) = request.user_id else {
            return;
        };
        let event = UsageEvent::new(user_id, model, request.ip.as_deref(), usage)
            .with_guardrail_cost(guardrail_cost);
        if let Err(e) = self.ledger.track(&event) {
            tracing::error!(user_id = %user_id, model = %model.id, error = %e, "Failed to record usage");
        }
    }

    /// Metering callback for a streamed invocation. The ledger write runs on
    /// the blocking pool.
    fn stream_meter(&self, request: &InvocationRequest, model: &Model, guardrail_cost: f64) -> MeterFn {
        let ledger = self.ledger.clone();
        let user_id = request.user_id.clone();
        let ip = request.ip.clone();
        let model = model.clone();
        Box::new(move |usage| {
            let Some(user_id) = user_id else {
                return;
            };
            let event = UsageEvent::new(&user_id, &model, ip.as_deref(), usage)
                .with_guardrail_cost(guardrail_cost);
            tokio::task::spawn_blocking(move || {
                if let Err(e) = ledger.track(&event) {
                    tracing::error!(user_id = %event.user_id, model = %event.model.id, error = %e, "Failed to record stream usage");
                }
            });
        })
    }

    async fn run(&self, request: InvocationRequest) -> Result<InvokeOutcome, GatewayError> {
        if let Some(ref user_id) = request.user_id {
            if let Admission::Rejected { status, message } = self.admission.check(user_id)? {
                return Ok(InvokeOutcome::Rejected {
                    error: message,
                    status,
                });
            }
        }

        let model = self.registry.resolve(&request.model)?;
        let provider = self.providers.provider_for(&model)?;

        let mut guardrail_cost = 0.0;
        if let Some(ref guardrail) = self.guardrail {
            let input = user_text(&request);
            if !input.is_empty() {
                let outcome = guardrail.check(&input, GuardrailSource::Input).await?;
                guardrail_cost += outcome.cost;
                if outcome.blocked {
                    self.meter(&request, &model, None, guardrail_cost);
                    return Err(GatewayError::GuardrailBlocked(
                        outcome.details.unwrap_or_default(),
                    ));
                }
            }
        }

        let converse = ConverseRequest {
            model_id: model.internal_name.clone(),
            messages: request.messages.clone(),
            system: request.system.clone(),
            tools: request.tools.clone(),
            max_tokens: Some(model.max_output).filter(|&max| max > 0),
            thought_budget: model.clamp_thought_budget(request.thought_budget),
            output_config: request.output_config.clone(),
        };

        tracing::debug!(
            model = %model.id,
            provider = %model.provider_id,
            stream = request.stream,
            "Invoking provider"
        );

        if request.stream {
            let upstream = match provider.converse_stream(&converse).await {
                Ok(upstream) => upstream,
                Err(e) => {
                    self.meter(&request, &model, None, guardrail_cost);
                    return Err(e.into());
                }
            };
            let meter = self.stream_meter(&request, &model, guardrail_cost);
            return Ok(InvokeOutcome::Stream(spawn_metered(upstream, meter)));
        }

        let response = match provider.converse(&converse).await {
            Ok(response) => response,
            Err(e) => {
                self.meter(&request, &model, None, guardrail_cost);
                return Err(e.into());
            }
        };

        let verdict = match self.guardrail {
            Some(ref guardrail) if self.check_output => {
                let output = response.output.text();
                if output.is_empty() {
                    Ok(None)
                } else {
                    guardrail.check(&output, GuardrailSource::Output).await.map(|outcome| {
                        guardrail_cost += outcome.cost;
                        outcome.blocked.then(|| outcome.details.unwrap_or_default())
                    })
                }
            }
            _ => Ok(None),
        };

        self.meter(&request, &model, Some(response.usage), guardrail_cost);

        match verdict? {
            Some(details) => Err(GatewayError::GuardrailBlocked(details)),
            None => Ok(InvokeOutcome::Response(response)),
        }
    }
}

/// Text of all user-role messages, one message per line.
fn user_text(request: &InvocationRequest) -> String {
    request
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.text())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

impl InferenceClient for DirectClient {
    fn mode(&self) -> &'static str {
        "direct"
    }

    fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<InvokeOutcome, GatewayError>> + Send + '_>> {
        Box::pin(self.run(request))
    }

    fn list_models(
        &self,
        filter: ListModelsFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ModelSummary>, GatewayError>> + Send + '_>> {
        Box::pin(async move { self.registry.list(filter.model_type.as_deref()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use futures::StreamExt;

    use crate::budget::UsageKind;
    use crate::guardrail::{GuardrailOutcome, TermListGuardrail};
    use crate::providers::testing::ScriptedProvider;
    use crate::providers::types::Message;
    use crate::registry::tests::sample_model;
    use crate::stream::StreamEvent;
    use crate::users;

    struct Harness {
        db: Database,
        client: DirectClient,
        calls: Arc<std::sync::atomic::AtomicUsize>,
        user_id: String,
    }

    fn harness(provider: ScriptedProvider, budget: Option<f64>) -> Harness {
        let db = Database::open_in_memory().unwrap();
        ModelRegistry::new(db.clone()).upsert(&sample_model()).unwrap();
        let user = users::create_user(&db, "alice", budget).unwrap();

        let calls = provider.call_counter();
        let mut router = ProviderRouter::new();
        router.register(Arc::new(provider));

        Harness {
            client: DirectClient::new(db.clone(), router, &BudgetConfig::default()),
            db,
            calls,
            user_id: user.id,
        }
    }

    fn openai(text: &str, input: u32, output: u32) -> ScriptedProvider {
        ScriptedProvider::new("openai", text, input, output)
    }

    fn request(user_id: &str) -> InvocationRequest {
        InvocationRequest::new("gpt-mini", vec![Message::user("Hello")]).for_user(user_id)
    }

    fn remaining(h: &Harness) -> Option<f64> {
        users::get_user(&h.db, &h.user_id).unwrap().unwrap().remaining
    }

    /// Allows input at a fixed cost; the output check is unreachable.
    struct OutputUnavailable;

    impl Guardrail for OutputUnavailable {
        fn name(&self) -> &str {
            "output-unavailable"
        }

        fn check<'a>(
            &'a self,
            _text: &'a str,
            source: GuardrailSource,
        ) -> Pin<Box<dyn Future<Output = Result<GuardrailOutcome, GatewayError>> + Send + 'a>> {
            Box::pin(async move {
                match source {
                    GuardrailSource::Input => Ok(GuardrailOutcome::allowed(0.001)),
                    GuardrailSource::Output => {
                        Err(GatewayError::GuardrailUnavailable("connection refused".into()))
                    }
                }
            })
        }
    }

    /// Term list that never matches the test prompt but still costs 0.001.
    fn billable_guardrail() -> Arc<dyn Guardrail> {
        Arc::new(TermListGuardrail::new(vec!["forbidden".into()], 0.001, 1000))
    }

    async fn wait_for_records(h: &Harness, n: usize) {
        for _ in 0..100 {
            if h.client.ledger().records_for_user(&h.user_id).unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_non_streaming_invoke_meters() {
        let h = harness(openai("Hi!", 1000, 500), Some(0.10));

        let outcome = h.client.invoke(request(&h.user_id)).await.unwrap();
        let InvokeOutcome::Response(resp) = outcome else {
            panic!("expected response, got {outcome:?}");
        };
        assert_eq!(resp.output.text(), "Hi!");
        assert!((remaining(&h).unwrap() - 0.08).abs() < 1e-12);

        let records = h.client.ledger().records_for_user(&h.user_id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, UsageKind::User);
        assert_eq!(records[0].model_id, "gpt-mini");
    }

    #[tokio::test]
    async fn test_rejected_without_provider_call_or_records() {
        let h = harness(openai("Hi!", 10, 10), Some(1.0));
        users::set_budget(&h.db, &h.user_id, Some(0.0)).unwrap();

        let outcome = h.client.invoke(request(&h.user_id)).await.unwrap();
        match outcome {
            InvokeOutcome::Rejected { status, error } => {
                assert_eq!(status, 429);
                assert_eq!(error, BudgetConfig::default().rejection_message());
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert!(h.client.ledger().records_for_user(&h.user_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_streaming_and_non_streaming_cost_match() {
        let h = harness(openai("Streaming reply", 1234, 567), None);

        h.client.invoke(request(&h.user_id)).await.unwrap();

        let InvokeOutcome::Stream(stream) = h.client.invoke(request(&h.user_id).streaming()).await.unwrap()
        else {
            panic!("expected stream");
        };
        let events: Vec<StreamEvent> = stream.map(|e| e.unwrap()).collect().await;
        assert!(events.last().unwrap().is_metadata());

        wait_for_records(&h, 2).await;
        let records = h.client.ledger().records_for_user(&h.user_id).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cost, records[1].cost);
        assert_eq!(records[0].input_tokens, records[1].input_tokens);
    }

    #[tokio::test]
    async fn test_stream_metered_after_consumer_disconnect() {
        let h = harness(
            openai("a reply long enough to span many deltas", 100, 200).with_delay(Duration::from_millis(5)),
            Some(1.0),
        );

        let InvokeOutcome::Stream(mut stream) =
            h.client.invoke(request(&h.user_id).streaming()).await.unwrap()
        else {
            panic!("expected stream");
        };
        stream.next().await.unwrap().unwrap();
        drop(stream);

        wait_for_records(&h, 1).await;
        let records = h.client.ledger().records_for_user(&h.user_id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].output_tokens, 200);
    }

    #[tokio::test]
    async fn test_guardrail_block_records_only_guardrail_row() {
        let h = harness(openai("Hi!", 10, 10), Some(1.0));
        let guardrail: Arc<dyn Guardrail> =
            Arc::new(TermListGuardrail::new(vec!["hello".into()], 0.001, 1000));
        let client = h.client.with_guardrail(Some(guardrail), false);

        let err = client.invoke(request(&h.user_id)).await.unwrap_err();
        assert!(matches!(err, GatewayError::GuardrailBlocked(_)));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);

        let records = client.ledger().records_for_user(&h.user_id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, UsageKind::Guardrail);
        assert!((records[0].cost - 0.001).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_output_guardrail_blocks_but_meters() {
        let h = harness(openai("this output is forbidden", 1000, 500), None);
        let guardrail: Arc<dyn Guardrail> =
            Arc::new(TermListGuardrail::new(vec!["forbidden".into()], 0.0, 1000));
        let client = h.client.with_guardrail(Some(guardrail), true);

        let err = client.invoke(request(&h.user_id)).await.unwrap_err();
        assert!(matches!(err, GatewayError::GuardrailBlocked(_)));

        let records = client.ledger().records_for_user(&h.user_id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, UsageKind::User);
    }

    #[tokio::test]
    async fn test_output_guardrail_error_still_meters() {
        let h = harness(openai("Hi!", 1000, 500), Some(1.0));
        let client = h.client.with_guardrail(Some(Arc::new(OutputUnavailable)), true);

        let err = client.invoke(request(&h.user_id)).await.unwrap_err();
        assert!(matches!(err, GatewayError::GuardrailUnavailable(_)), "unexpected error: {err:?}");

        let records = client.ledger().records_for_user(&h.user_id).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, UsageKind::User);
        assert!((records[0].cost - 0.02).abs() < 1e-12);
        assert_eq!(records[1].kind, UsageKind::Guardrail);
        assert!((records[1].cost - 0.001).abs() < 1e-12);

        let remaining = users::get_user(&h.db, &h.user_id).unwrap().unwrap().remaining.unwrap();
        assert!((remaining - 0.979).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_provider_error_bills_guardrail_cost() {
        for stream in [false, true] {
            let h = harness(openai("", 0, 0).failing(503), Some(1.0));
            let client = h.client.with_guardrail(Some(billable_guardrail()), false);

            let mut req = request(&h.user_id);
            req.stream = stream;
            let err = client.invoke(req).await.unwrap_err();
            assert_eq!(err.status_code(), 503);

            let records = client.ledger().records_for_user(&h.user_id).unwrap();
            assert_eq!(records.len(), 1, "stream = {stream}");
            assert_eq!(records[0].kind, UsageKind::Guardrail);
            assert!((records[0].cost - 0.001).abs() < 1e-12);
        }
    }

    #[tokio::test]
    async fn test_stream_without_metadata_bills_guardrail_cost() {
        let h = harness(openai("no usage reported", 10, 10).without_metadata(), Some(1.0));
        let client = h.client.with_guardrail(Some(billable_guardrail()), false);

        let InvokeOutcome::Stream(stream) = client.invoke(request(&h.user_id).streaming()).await.unwrap()
        else {
            panic!("expected stream");
        };
        let events: Vec<StreamEvent> = stream.map(|e| e.unwrap()).collect().await;
        assert!(!events.iter().any(StreamEvent::is_metadata));

        for _ in 0..100 {
            if !client.ledger().records_for_user(&h.user_id).unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let records = client.ledger().records_for_user(&h.user_id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, UsageKind::Guardrail);
        assert!((records[0].cost - 0.001).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_anonymous_invoke_not_metered() {
        let h = harness(openai("Hi!", 10, 10), Some(1.0));
        let req = InvocationRequest::new("gpt-4o-mini", vec![Message::user("Hello")]);

        let outcome = h.client.invoke(req).await.unwrap();
        assert!(matches!(outcome, InvokeOutcome::Response(_)));
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert!(h.client.ledger().records_for_user(&h.user_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let h = harness(openai("Hi!", 1, 1), None);
        let mut req = request(&h.user_id);
        req.model = "nope".into();
        assert!(matches!(
            h.client.invoke(req).await.unwrap_err(),
            GatewayError::ModelNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_provider_error_status_surfaces() {
        let h = harness(openai("", 0, 0).failing(503), None);
        let err = h.client.invoke(request(&h.user_id)).await.unwrap_err();
        assert_eq!(err.status_code(), 503);
        assert!(h.client.ledger().records_for_user(&h.user_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_models() {
        let h = harness(openai("", 0, 0), None);
        let all = h.client.list_models(ListModelsFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        let none = h.client.list_models(ListModelsFilter::of_type("image")).await.unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_user_text_skips_assistant() {
        let mut req = InvocationRequest::new("m", vec![Message::user("one"), Message::assistant("two")]);
        req.messages.push(Message::user("three"));
        assert_eq!(user_text(&req), "one\nthree");
    }
}
