use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use bytes::Bytes;
use futures::stream::StreamExt;
use relay_core::{ConcurrencyGate, Platform, RelayError};
use relay_openai::{extract_usage_from_chunk, ChatCompletionRequest, OpenAIRelay};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use super::claude::AppError;
use crate::admission::TenantPermit;
use crate::db::DbPool;
use crate::middleware::ClientApiKeyHash;
use crate::retry::RetryEngine;
use crate::routes::{client_json_response, heartbeat_bytes, record_usage_if_valid, HEARTBEAT_INTERVAL};
use crate::scheduler::UnifiedScheduler;

pub struct OpenAIRouteState {
    pub scheduler: Arc<UnifiedScheduler>,
    pub retry: Arc<RetryEngine>,
    pub concurrency: Arc<ConcurrencyGate>,
    pub relay: Arc<OpenAIRelay>,
    pub db_pool: DbPool,
    pub price_rate: f64,
}

/// Standard `/v1/chat/completions`, forwarded opaquely to a real
/// OpenAI-compatible account — no cross-family translation.
pub async fn chat_completions(
    State(state): State<Arc<OpenAIRouteState>>,
    Extension(api_key_hash): Extension<ClientApiKeyHash>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, AppError> {
    let is_stream = request.stream;
    let model = request.model.clone();

    info!(model = %model, stream = is_stream, "Received OpenAI chat/completions request");

    let _permit = TenantPermit::try_acquire(state.concurrency.clone(), &api_key_hash.0)
        .ok_or(AppError(RelayError::TenantConcurrencyLimited))?;

    let body_value = serde_json::to_value(&request).unwrap_or_default();
    let session_id_header = crate::routes::extract_session_id_header(&headers);

    if is_stream {
        let relay = state.relay.clone();
        let req = request.clone();

        let (stream, account) = state
            .retry
            .execute_stream(
                Platform::OpenAI,
                &body_value,
                session_id_header.as_deref(),
                move |account| {
                    let relay = relay.clone();
                    let req = req.clone();
                    async move { relay.relay_stream(account.as_ref(), req).await }
                },
            )
            .await?;

        let account_id = account.id().to_string();
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(32);

        let db_pool = state.db_pool.clone();
        let model_clone = model.clone();
        let price_rate = state.price_rate;

        tokio::spawn(async move {
            let _permit = _permit;
            let mut stream = stream;
            let mut prompt_tokens = 0u32;
            let mut completion_tokens = 0u32;
            let mut cached_tokens = 0u32;

            loop {
                tokio::select! {
                    chunk = stream.next() => {
                        match chunk {
                            Some(Ok(bytes)) => {
                                if let Some(usage) = extract_usage_from_chunk(&bytes) {
                                    prompt_tokens = prompt_tokens.max(usage.prompt_tokens);
                                    completion_tokens = completion_tokens.max(usage.completion_tokens);
                                    if let Some(details) = usage.prompt_tokens_details {
                                        cached_tokens = cached_tokens.max(details.cached_tokens);
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
                prompt_tokens,
                completion_tokens,
                0,
                cached_tokens,
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

        let (response, account) = state
            .retry
            .execute(
                Platform::OpenAI,
                &body_value,
                session_id_header.as_deref(),
                move |account| {
                    let relay = relay.clone();
                    let req = req.clone();
                    async move { relay.relay(account.as_ref(), req).await }
                },
            )
            .await?;

        if let Some(ref usage) = response.usage {
            record_usage_if_valid(
                &state.db_pool,
                &api_key_hash,
                account.id(),
                &model,
                usage.prompt_tokens,
                usage.completion_tokens,
                0,
                usage
                    .prompt_tokens_details
                    .as_ref()
                    .map(|d| d.cached_tokens)
                    .unwrap_or(0),
                state.price_rate,
            )
            .await;
        }

        Ok(client_json_response(&response, state.price_rate))
    }
}

pub async fn models() -> impl IntoResponse {
    Json(serde_json::json!({
        "object": "list",
        "data": [
            {"id": "gpt-4o", "object": "model", "created": 1704067200, "owned_by": "openai"},
            {"id": "gpt-4o-mini", "object": "model", "created": 1704067200, "owned_by": "openai"},
            {"id": "gpt-4-turbo", "object": "model", "created": 1704067200, "owned_by": "openai"},
            {"id": "gpt-3.5-turbo", "object": "model", "created": 1704067200, "owned_by": "openai"}
        ]
    }))
}
