pub mod claude;
pub mod codex;
pub mod gemini;
pub mod openai;

pub use claude::ClaudeRouteState;
pub use codex::CodexRouteState;
pub use gemini::GeminiRouteState;
pub use openai::OpenAIRouteState;

use crate::db::{self, DbPool};
use crate::middleware::ClientApiKeyHash;
use crate::pricing;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use relay_core::UsageEvent;
use std::time::Duration;
use tracing::{debug, warn};

/// How long the stream forwarding loop waits for upstream data before
/// emitting an SSE comment line to keep intermediate proxies from timing
/// out the connection.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub fn heartbeat_bytes() -> Bytes {
    Bytes::from_static(b": keepalive\n\n")
}

/// Reads the client-supplied session id override, checked under both
/// header spellings the spec allows (`Session_id`, `Session-Id`).
pub fn extract_session_id_header(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("Session-Id")
        .or_else(|| headers.get("Session_id"))
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Serializes `response` and rewrites its client-visible token-count fields
/// by `price_rate` before returning it, so the client sees the same rate
/// applied to recorded billing (SPEC price-rate transform).
pub fn client_json_response<T: serde::Serialize>(response: &T, price_rate: f64) -> Response {
    let body = serde_json::to_string(response).unwrap_or_default();
    let body = pricing::rewrite_token_fields(&body, price_rate);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// Records a usage event, skipping requests that never accumulated any
/// token counts (the upstream call failed before usage could be parsed).
/// Token counts are rewritten through `price_rate` before being persisted.
#[allow(clippy::too_many_arguments)]
pub async fn record_usage_if_valid(
    pool: &DbPool,
    api_key_hash: &ClientApiKeyHash,
    account_id: &str,
    model: &str,
    input_tokens: u32,
    output_tokens: u32,
    cache_creation_tokens: u32,
    cache_read_tokens: u32,
    price_rate: f64,
) {
    if input_tokens == 0 && output_tokens == 0 && cache_creation_tokens == 0 && cache_read_tokens == 0 {
        return;
    }

    let usage = pricing::rewrite_usage(
        UsageEvent {
            account_id: account_id.to_string(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cache_creation_input_tokens: cache_creation_tokens,
            cache_read_input_tokens: cache_read_tokens,
        },
        price_rate,
    );

    match db::record_usage(
        pool,
        &usage.account_id,
        &usage.model,
        usage.input_tokens,
        usage.output_tokens,
        usage.cache_creation_input_tokens,
        usage.cache_read_input_tokens,
    )
    .await
    {
        Ok(()) => debug!(
            api_key_hash = %api_key_hash.0,
            account_id = account_id,
            model = model,
            input_tokens,
            output_tokens,
            "Recorded usage"
        ),
        Err(e) => warn!(error = %e, account_id = account_id, "Failed to record usage"),
    }
}
