use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use bytes::Bytes;
use futures::stream::StreamExt;
use relay_claude::{
    extract_usage_from_chunk, is_thinking_signature_error, strip_thinking_blocks, ClientHeaders,
    ClaudeRelay, MessagesRequest,
};
use relay_core::{ConcurrencyGate, Platform, RelayError};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use crate::admission::TenantPermit;
use crate::db::DbPool;
use crate::middleware::ClientApiKeyHash;
use crate::retry::RetryEngine;
use crate::routes::{client_json_response, heartbeat_bytes, record_usage_if_valid, HEARTBEAT_INTERVAL};
use crate::scheduler::UnifiedScheduler;

pub struct ClaudeRouteState {
    pub scheduler: Arc<UnifiedScheduler>,
    pub retry: Arc<RetryEngine>,
    pub concurrency: Arc<ConcurrencyGate>,
    pub relay: Arc<ClaudeRelay>,
    pub db_pool: DbPool,
    pub price_rate: f64,
}

const CLAUDE_CODE_HEADER_KEYS: &[&str] = &[
    "x-stainless-retry-count",
    "x-stainless-timeout",
    "x-stainless-lang",
    "x-stainless-package-version",
    "x-stainless-os",
    "x-stainless-arch",
    "x-stainless-runtime",
    "x-stainless-runtime-version",
    "anthropic-dangerous-direct-browser-access",
    "x-app",
    "user-agent",
    "accept-language",
    "sec-fetch-mode",
    "accept-encoding",
];

/// Anthropic rejects a retried request that replays an assistant `thinking`
/// block whose signature no longer validates (e.g. after a failover to a
/// different account). This is the one upstream error worth repairing and
/// resubmitting rather than treating as a plain failover case.
fn is_thinking_signature_failure(error: &RelayError) -> bool {
    matches!(error, RelayError::Upstream { message, .. } if is_thinking_signature_error(message))
}

fn extract_client_headers(headers: &HeaderMap) -> ClientHeaders {
    let mut client_headers = ClientHeaders::new();

    for key in CLAUDE_CODE_HEADER_KEYS {
        if let Some(value) = headers.get(*key) {
            if let Ok(v) = value.to_str() {
                client_headers.insert(key.to_string(), v.to_string());
            }
        }
    }

    if client_headers.is_empty() {
        return ClientHeaders::with_defaults();
    }

    client_headers
}

pub async fn messages(
    State(state): State<Arc<ClaudeRouteState>>,
    Extension(api_key_hash): Extension<ClientApiKeyHash>,
    headers: HeaderMap,
    Json(request): Json<MessagesRequest>,
) -> Result<Response, AppError> {
    let is_stream = request.stream;
    let model = request.model.clone();

    info!(model = %model, stream = is_stream, "Received Claude messages request");

    let _permit = TenantPermit::try_acquire(state.concurrency.clone(), &api_key_hash.0)
        .ok_or(AppError(RelayError::TenantConcurrencyLimited))?;

    let body_value = serde_json::to_value(&request).unwrap_or_default();
    let client_headers = extract_client_headers(&headers);
    let session_id_header = crate::routes::extract_session_id_header(&headers);

    if is_stream {
        let relay = state.relay.clone();
        let req = request.clone();
        let headers_for_executor = client_headers.clone();

        let stream_result = state
            .retry
            .execute_stream(
                Platform::Claude,
                &body_value,
                session_id_header.as_deref(),
                move |account| {
                    let relay = relay.clone();
                    let req = req.clone();
                    let headers = headers_for_executor.clone();
                    async move { relay.relay_stream_with_headers(account.as_ref(), req, &headers).await }
                },
            )
            .await;

        let (stream, account) = match stream_result {
            Ok(ok) => ok,
            Err(e) if is_thinking_signature_failure(&e) => {
                let mut stripped_req = request.clone();
                strip_thinking_blocks(&mut stripped_req);
                let stripped_body = serde_json::to_value(&stripped_req).unwrap_or_default();
                info!("Retrying Claude stream with thinking blocks stripped after signature mismatch");

                let relay = state.relay.clone();
                let headers_for_executor = client_headers.clone();
                state
                    .retry
                    .execute_stream(
                        Platform::Claude,
                        &stripped_body,
                        session_id_header.as_deref(),
                        move |account| {
                            let relay = relay.clone();
                            let req = stripped_req.clone();
                            let headers = headers_for_executor.clone();
                            async move {
                                relay.relay_stream_with_headers(account.as_ref(), req, &headers).await
                            }
                        },
                    )
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        let account_id = account.id().to_string();
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(32);

        let db_pool = state.db_pool.clone();
        let model_clone = model.clone();
        let price_rate = state.price_rate;

        tokio::spawn(async move {
            let _permit = _permit;
            let mut stream = stream;
            let mut total_input = 0u32;
            let mut total_output = 0u32;
            let mut cache_creation = 0u32;
            let mut cache_read = 0u32;

            loop {
                tokio::select! {
                    chunk = stream.next() => {
                        match chunk {
                            Some(Ok(bytes)) => {
                                if let Some(usage) = extract_usage_from_chunk(&bytes) {
                                    total_input = total_input.max(usage.input_tokens);
                                    total_output = total_output.max(usage.output_tokens);
                                    if let Some(cc) = usage.cache_creation_input_tokens {
                                        cache_creation = cache_creation.max(cc);
                                    }
                                    if let Some(cr) = usage.cache_read_input_tokens {
                                        cache_read = cache_read.max(cr);
                                    }
                                }

                                let bytes = crate::pricing::rewrite_sse_bytes(bytes, price_rate);
                                if tx.send(Ok(bytes)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                error!(error = %e, "Stream error");
                                break;
                            }
                            None => break,
                        }
                    }
                    _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                        if tx.send(Ok(heartbeat_bytes())).await.is_err() {
                            break;
                        }
                    }
                }
            }

            record_usage_if_valid(
                &db_pool,
                &api_key_hash,
                &account_id,
                &model_clone,
                total_input,
                total_output,
                cache_creation,
                cache_read,
                price_rate,
            )
            .await;
        });

        let body = Body::from_stream(ReceiverStream::new(rx));

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header("X-Accel-Buffering", "no")
            .body(body)
            .unwrap())
    } else {
        let relay = state.relay.clone();
        let req = request.clone();
        let headers_for_executor = client_headers.clone();

        let exec_result = state
            .retry
            .execute(
                Platform::Claude,
                &body_value,
                session_id_header.as_deref(),
                move |account| {
                    let relay = relay.clone();
                    let req = req.clone();
                    let headers = headers_for_executor.clone();
                    async move { relay.relay_with_headers(account.as_ref(), req, &headers).await }
                },
            )
            .await;

        let (response, account) = match exec_result {
            Ok(ok) => ok,
            Err(e) if is_thinking_signature_failure(&e) => {
                let mut stripped_req = request.clone();
                strip_thinking_blocks(&mut stripped_req);
                let stripped_body = serde_json::to_value(&stripped_req).unwrap_or_default();
                info!("Retrying Claude request with thinking blocks stripped after signature mismatch");

                let relay = state.relay.clone();
                let headers_for_executor = client_headers.clone();
                state
                    .retry
                    .execute(
                        Platform::Claude,
                        &stripped_body,
                        session_id_header.as_deref(),
                        move |account| {
                            let relay = relay.clone();
                            let req = stripped_req.clone();
                            let headers = headers_for_executor.clone();
                            async move { relay.relay_with_headers(account.as_ref(), req, &headers).await }
                        },
                    )
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        record_usage_if_valid(
            &state.db_pool,
            &api_key_hash,
            account.id(),
            &model,
            response.usage.input_tokens,
            response.usage.output_tokens,
            response.usage.cache_creation_input_tokens.unwrap_or(0),
            response.usage.cache_read_input_tokens.unwrap_or(0),
            state.price_rate,
        )
        .await;

        Ok(client_json_response(&response, state.price_rate))
    }
}

pub async fn models() -> impl IntoResponse {
    Json(serde_json::json!({
        "object": "list",
        "data": [
            {"id": "claude-sonnet-4-20250514", "object": "model", "created": 1704067200, "owned_by": "anthropic"},
            {"id": "claude-3-5-sonnet-20241022", "object": "model", "created": 1704067200, "owned_by": "anthropic"},
            {"id": "claude-3-5-haiku-20241022", "object": "model", "created": 1704067200, "owned_by": "anthropic"},
            {"id": "claude-3-opus-20240229", "object": "model", "created": 1704067200, "owned_by": "anthropic"},
            {"id": "claude-opus-4-20250514", "object": "model", "created": 1704067200, "owned_by": "anthropic"}
        ]
    }))
}

pub struct AppError(pub RelayError);

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (code, _kind) = self.0.client_status_and_type();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        error!(error = %self.0, "Request error");

        (status, Json(self.0.to_json_error())).into_response()
    }
}
