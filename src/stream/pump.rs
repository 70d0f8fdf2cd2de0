//! Metered stream pump.
//!
//! A background task pulls the provider's event stream to completion and
//! forwards events through a bounded channel. The metering callback runs
//! when the metadata event arrives, before that event is forwarded. If the
//! consumer drops its end, forwarding stops but the task keeps pulling
//! until the metadata event has been seen. A stream that ends or fails
//! without metadata invokes the callback with no usage.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::GatewayError;
use crate::providers::ProviderEventStream;
use crate::providers::types::TokenUsage;

use super::events::StreamEvent;

/// Caller-facing event stream returned by both client modes.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, GatewayError>> + Send>>;

/// Invoked exactly once: with the usage from the metadata event, or with
/// `None` if the provider stream finished without one.
pub type MeterFn = Box<dyn FnOnce(Option<TokenUsage>) + Send>;

const CHANNEL_CAPACITY: usize = 32;

/// Spawn the pump and return the consumer side.
pub fn spawn_metered(upstream: ProviderEventStream, on_metadata: MeterFn) -> EventStream {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(pump(upstream, on_metadata, tx));
    Box::pin(ReceiverStream::new(rx))
}

async fn pump(
    mut upstream: ProviderEventStream,
    on_metadata: MeterFn,
    tx: mpsc::Sender<Result<StreamEvent, GatewayError>>,
) {
    let mut meter = Some(on_metadata);
    let mut forwarding = true;

    while let Some(item) = upstream.next().await {
        let item = match item {
            Ok(event) => {
                if let Some(usage) = event.usage() {
                    match meter.take() {
                        Some(meter) => meter(Some(*usage)),
                        None => {
                            tracing::warn!("Dropping duplicate metadata event");
                            continue;
                        }
                    }
                }
                Ok(event)
            }
            Err(e) => {
                tracing::error!(error = %e, "Provider stream failed");
                Err(GatewayError::from(e))
            }
        };

        let failed = item.is_err();
        if forwarding && tx.send(item).await.is_err() {
            forwarding = false;
            tracing::debug!("Stream consumer disconnected, draining provider stream");
        }
        if failed || (!forwarding && meter.is_none()) {
            break;
        }
    }

    if let Some(meter) = meter {
        tracing::warn!("Provider stream ended without usage metadata");
        meter(None);
    }
}
