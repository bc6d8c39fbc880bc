use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use bytes::Bytes;
use futures::stream::StreamExt;
use relay_codex::{CodexRelay, ResponsesRequest};
use relay_core::{ConcurrencyGate, Platform, RelayError};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use super::claude::AppError;
use super::client_json_response;
use crate::admission::TenantPermit;
use crate::db::DbPool;
use crate::middleware::ClientApiKeyHash;
use crate::retry::RetryEngine;
use crate::scheduler::UnifiedScheduler;

pub struct CodexRouteState {
    pub scheduler: Arc<UnifiedScheduler>,
    pub retry: Arc<RetryEngine>,
    pub concurrency: Arc<ConcurrencyGate>,
    pub relay: Arc<CodexRelay>,
    #[allow(dead_code)] // Reserved for future usage tracking when Codex API exposes token counts
    pub db_pool: DbPool,
    pub price_rate: f64,
}

pub async fn responses(
    State(state): State<Arc<CodexRouteState>>,
    Extension(api_key_hash): Extension<ClientApiKeyHash>,
    headers: HeaderMap,
    Json(request): Json<ResponsesRequest>,
) -> Result<Response, AppError> {
    let is_stream = request.stream;
    let model = request.model.clone();
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    info!(model = %model, stream = is_stream, "Received OpenAI Responses request");

    let _permit = TenantPermit::try_acquire(state.concurrency.clone(), &api_key_hash.0)
        .ok_or(AppError(RelayError::TenantConcurrencyLimited))?;

    let body_value = serde_json::to_value(&request).unwrap_or_default();
    let session_id_header = crate::routes::extract_session_id_header(&headers);

    if is_stream {
        let relay = state.relay.clone();
        let req = request.clone();
        let ua = user_agent.clone();

        let (stream, _account) = state
            .retry
            .execute_stream(
                Platform::Codex,
                &body_value,
                session_id_header.as_deref(),
                move |account| {
                    let relay = relay.clone();
                    let req = req.clone();
                    let ua = ua.clone();
                    async move { relay.relay_stream(account.as_ref(), req, "/responses", ua.as_deref()).await }
                },
            )
            .await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(32);
        let price_rate = state.price_rate;

        tokio::spawn(async move {
            let _permit = _permit;
            let mut stream = stream;
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        let bytes = crate::pricing::rewrite_sse_bytes(bytes, price_rate);
                        if tx.send(Ok(bytes)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Codex stream error");
                        break;
                    }
                }
            }
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
        let ua = user_agent.clone();

        let (response, _account) = state
            .retry
            .execute(
                Platform::Codex,
                &body_value,
                session_id_header.as_deref(),
                move |account| {
                    let relay = relay.clone();
                    let req = req.clone();
                    let ua = ua.clone();
                    async move { relay.relay(account.as_ref(), req, "/responses", ua.as_deref()).await }
                },
            )
            .await?;

        Ok(client_json_response(&response, state.price_rate))
    }
}
