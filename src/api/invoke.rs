use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;

use crate::AppState;
use crate::client::{InvocationRequest, InvokeOutcome};
use crate::error::AppError;
use crate::stream::{EventStream, encode_event};

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// POST /api/v1/model/invoke
///
/// Returns the `ConverseResponse` as JSON, or an NDJSON body of stream
/// events when `stream` is set. Quota rejection is a 429 with `{ "error" }`.
pub async fn invoke_model(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<InvocationRequest>,
) -> Result<Response, AppError> {
    if request.ip.is_none() {
        request.ip = forwarded_ip(&headers);
    }

    tracing::debug!(
        user_id = ?request.user_id,
        model = %request.model,
        stream = request.stream,
        "Invoke request"
    );

    match state.client.invoke(request).await? {
        InvokeOutcome::Response(response) => Ok(Json(response).into_response()),
        InvokeOutcome::Stream(events) => Ok(ndjson_response(events)),
        InvokeOutcome::Rejected { error, .. } => Err(AppError::BudgetExceeded(error)),
    }
}

/// Stream events as NDJSON. A failed event aborts the body so the caller
/// sees a truncated transfer rather than a clean end.
fn ndjson_response(events: EventStream) -> Response {
    let body = events.map(|item| {
        let event = item.map_err(|e| {
            tracing::warn!(error = %e, "Stream failed mid-response");
            std::io::Error::other(e.to_string())
        })?;
        encode_event(&event).map_err(std::io::Error::other)
    });

    (
        [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(body),
    )
        .into_response()
}

/// First address of `X-Forwarded-For`, if present.
fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(String::from)
}
