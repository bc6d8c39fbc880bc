use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use bytes::Bytes;
use futures::stream::StreamExt;
use relay_core::{ConcurrencyGate, Platform, RelayError};
use relay_gemini::{extract_usage_from_chunk, GeminiRelay, GeminiRequest, GenerateContentRequest};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::error;

use super::claude::AppError;
use super::{client_json_response, record_usage_if_valid};
use crate::admission::TenantPermit;
use crate::db::DbPool;
use crate::middleware::ClientApiKeyHash;
use crate::retry::RetryEngine;
use crate::routes::{heartbeat_bytes, HEARTBEAT_INTERVAL};
use crate::scheduler::UnifiedScheduler;

pub struct GeminiRouteState {
    pub scheduler: Arc<UnifiedScheduler>,
    pub retry: Arc<RetryEngine>,
    pub concurrency: Arc<ConcurrencyGate>,
    pub relay: Arc<GeminiRelay>,
    pub db_pool: DbPool,
    pub price_rate: f64,
}

fn parse_model_and_method(path: &str) -> Result<(String, String), RelayError> {
    if let Some(colon_pos) = path.rfind(':') {
        let model = path[..colon_pos].to_string();
        let method = path[colon_pos + 1..].to_string();
        Ok((model, method))
    } else {
        Err(RelayError::InvalidRequest(format!(
            "Invalid path format: {}. Expected format: model:method",
            path
        )))
    }
}

pub async fn generate_content(
    State(state): State<Arc<GeminiRouteState>>,
    Extension(api_key_hash): Extension<ClientApiKeyHash>,
    Path(model_method): Path<String>,
    headers: HeaderMap,
    Json(body): Json<GenerateContentRequest>,
) -> Result<Response, AppError> {
    let (model, method) = parse_model_and_method(&model_method)?;
    let is_stream = method == "streamGenerateContent";

    let _permit = TenantPermit::try_acquire(state.concurrency.clone(), &api_key_hash.0)
        .ok_or(AppError(RelayError::TenantConcurrencyLimited))?;

    let body_value = serde_json::to_value(&body).unwrap_or_default();
    let session_id_header = crate::routes::extract_session_id_header(&headers);

    if is_stream {
        let relay = state.relay.clone();
        let model_for_executor = model.clone();
        let body_for_executor = body.clone();

        let (stream, account) = state
            .retry
            .execute_stream(
                Platform::Gemini,
                &body_value,
                session_id_header.as_deref(),
                move |account| {
                    let relay = relay.clone();
                    let request = GeminiRequest {
                        model: model_for_executor.clone(),
                        body: body_for_executor.clone(),
                        stream: true,
                    };
                    async move { relay.relay_stream(account.as_ref(), request).await }
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
            let mut candidates_tokens = 0u32;

            loop {
                tokio::select! {
                    chunk = stream.next() => {
                        match chunk {
                            Some(Ok(bytes)) => {
                                if let Some(usage) = extract_usage_from_chunk(&bytes) {
                                    prompt_tokens = prompt_tokens.max(usage.prompt_token_count);
                                    candidates_tokens = candidates_tokens.max(usage.candidates_token_count);
                                }

                                let bytes = crate::pricing::rewrite_sse_bytes(bytes, price_rate);
                                if tx.send(Ok(bytes)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                error!(error = %e, "Gemini stream error");
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
                candidates_tokens,
                0,
                0,
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
        let model_for_executor = model.clone();
        let body_for_executor = body.clone();

        let (response, account) = state
            .retry
            .execute(
                Platform::Gemini,
                &body_value,
                session_id_header.as_deref(),
                move |account| {
                    let relay = relay.clone();
                    let request = GeminiRequest {
                        model: model_for_executor.clone(),
                        body: body_for_executor.clone(),
                        stream: false,
                    };
                    async move { relay.relay(account.as_ref(), request).await }
                },
            )
            .await?;

        if let Some(ref usage) = response.usage_metadata {
            record_usage_if_valid(
                &state.db_pool,
                &api_key_hash,
                account.id(),
                &model,
                usage.prompt_token_count,
                usage.candidates_token_count,
                0,
                0,
                state.price_rate,
            )
            .await;
        }

        Ok(client_json_response(&response, state.price_rate))
    }
}

pub async fn models() -> impl IntoResponse {
    Json(serde_json::json!({
        "models": [
            {"name": "models/gemini-2.0-flash-exp", "displayName": "Gemini 2.0 Flash"},
            {"name": "models/gemini-1.5-pro", "displayName": "Gemini 1.5 Pro"},
            {"name": "models/gemini-1.5-flash", "displayName": "Gemini 1.5 Flash"}
        ]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_model_and_method_from_path() {
        let (model, method) = parse_model_and_method("gemini-1.5-pro:streamGenerateContent").unwrap();
        assert_eq!(model, "gemini-1.5-pro");
        assert_eq!(method, "streamGenerateContent");
    }

    #[test]
    fn rejects_path_without_colon() {
        assert!(parse_model_and_method("gemini-1.5-pro").is_err());
    }
}
