//! Deterministic in-process provider for unit tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;

use crate::providers::types::{
    ConverseRequest, ConverseResponse, Message, Metrics, Role, StopReason, TokenUsage,
};
use crate::providers::{ModelProvider, ProviderError, ProviderEventStream};
use crate::stream::StreamEvent;

/// Replays a fixed reply: the text is split into four-character deltas and
/// followed by message-stop and a metadata event with the configured usage.
pub(crate) struct ScriptedProvider {
    id: String,
    text: String,
    usage: TokenUsage,
    delay: Option<Duration>,
    fail_status: Option<u16>,
    metadata: bool,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(id: &str, text: &str, input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
            usage: TokenUsage::new(input_tokens, output_tokens),
            delay: None,
            fail_status: None,
            metadata: true,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sleep before yielding each stream event.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every call with an API error of the given status.
    pub fn failing(mut self, status: u16) -> Self {
        self.fail_status = Some(status);
        self
    }

    /// Streams end at message-stop with no metadata event.
    pub fn without_metadata(mut self) -> Self {
        self.metadata = false;
        self
    }

    /// Shared counter of converse / converse-stream calls.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// The exact event sequence a streaming call yields.
    pub fn events(&self) -> Vec<StreamEvent> {
        let mut events = vec![StreamEvent::MessageStart {
            role: Role::Assistant,
        }];
        let chars: Vec<char> = self.text.chars().collect();
        for chunk in chars.chunks(4) {
            events.push(StreamEvent::text_delta(0, chunk.iter().collect::<String>()));
        }
        events.push(StreamEvent::MessageStop {
            stop_reason: StopReason::EndTurn,
        });
        if self.metadata {
            events.push(StreamEvent::Metadata {
                usage: self.usage,
                metrics: Metrics::default(),
            });
        }
        events
    }

    fn start_call(&self) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_status {
            Some(status) => Err(ProviderError::Api {
                status,
                message: "scripted failure".into(),
            }),
            None => Ok(()),
        }
    }
}

impl ModelProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn converse(
        &self,
        _request: &ConverseRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ConverseResponse, ProviderError>> + Send + '_>> {
        Box::pin(async move {
            self.start_call()?;
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
        Box::pin(async move {
            self.start_call()?;
            let delay = self.delay;
            let stream = futures::stream::iter(self.events()).then(move |event| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, ProviderError>(event)
            });
            Ok(Box::pin(stream) as ProviderEventStream)
        })
    }
}
