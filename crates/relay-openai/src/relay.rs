use async_stream::try_stream;
use bytes::Bytes;
use futures::StreamExt;
use relay_core::{
    read_error_response_body, AccountProvider, BoxStream, ProxyConfig, RelayError, Result,
};
use reqwest::Client;
use tracing::{debug, info};

use crate::types::{ChatCompletionRequest, ChatCompletionResponse, Usage};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1";

/// Standard OpenAI Chat Completions pass-through: the request body is
/// forwarded opaquely to whatever OpenAI-compatible endpoint the account
/// points at, with no translation to another provider's wire format.
pub struct OpenAIRelay {
    default_client: Client,
}

impl OpenAIRelay {
    pub fn new() -> Self {
        Self {
            default_client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Azure deployments carry their full per-deployment URL (with
    /// `api-version`) in `account.api_url()` already; every other account
    /// type gets `<base>/chat/completions` appended.
    fn build_url(&self, account: &dyn AccountProvider) -> String {
        if account.account_type() == "azure-openai" {
            return account
                .api_url()
                .expect("azure-openai account always carries a full url")
                .to_string();
        }

        let base = account.api_url().unwrap_or(DEFAULT_API_URL);
        let base = base.trim_end_matches('/');
        format!("{}/chat/completions", base)
    }

    /// Azure authenticates with a plain `api-key` header; every other
    /// account type here is bearer-token OpenAI-compatible auth.
    fn apply_auth(&self, builder: reqwest::RequestBuilder, account: &dyn AccountProvider, api_key: &str) -> reqwest::RequestBuilder {
        if account.account_type() == "azure-openai" {
            builder.header("api-key", api_key)
        } else {
            builder.header("Authorization", format!("Bearer {}", api_key))
        }
    }

    fn build_client(&self, proxy_config: Option<&ProxyConfig>) -> Result<Client> {
        if proxy_config.is_none() || proxy_config.map(|p| p.is_none()).unwrap_or(true) {
            return Ok(self.default_client.clone());
        }

        let proxy = proxy_config.unwrap();
        let mut builder = Client::builder().timeout(std::time::Duration::from_secs(600));

        if let Some(proxy_url) = proxy.to_url() {
            let proxy = reqwest::Proxy::all(&proxy_url)
                .map_err(|e| RelayError::Config(format!("Invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {}", e)))
    }

    pub async fn relay(
        &self,
        account: &dyn AccountProvider,
        mut request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        request.stream = false;

        let credentials = account.get_credentials().await?;
        let client = self.build_client(account.proxy_config())?;
        let api_url = self.build_url(account);

        debug!(
            account_id = account.id(),
            model = request.model,
            api_url = %api_url,
            "Relaying non-streaming OpenAI chat completions request"
        );

        let api_key = credentials.as_api_key().ok_or_else(|| {
            RelayError::Unauthorized("Expected API key credentials".to_string())
        })?;

        let response = self
            .apply_auth(client.post(&api_url), account, api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, body) = read_error_response_body(response).await;
            return Err(RelayError::from_response_body(status, &body));
        }

        let resp: ChatCompletionResponse = response.json().await?;

        info!(
            account_id = account.id(),
            response_id = resp.id,
            "OpenAI chat completions request completed"
        );

        Ok(resp)
    }

    pub async fn relay_stream(
        &self,
        account: &dyn AccountProvider,
        mut request: ChatCompletionRequest,
    ) -> Result<BoxStream<Result<Bytes>>> {
        request.stream = true;

        let credentials = account.get_credentials().await?;
        let client = self.build_client(account.proxy_config())?;
        let api_url = self.build_url(account);

        debug!(
            account_id = account.id(),
            model = request.model,
            api_url = %api_url,
            "Relaying streaming OpenAI chat completions request"
        );

        let api_key = credentials.as_api_key().ok_or_else(|| {
            RelayError::Unauthorized("Expected API key credentials".to_string())
        })?;

        let response = self
            .apply_auth(client.post(&api_url), account, api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, body) = read_error_response_body(response).await;
            return Err(RelayError::from_response_body(status, &body));
        }

        let account_id = account.id().to_string();

        let stream = try_stream! {
            let mut byte_stream = response.bytes_stream();

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = chunk_result?;
                yield chunk;
            }

            info!(
                account_id = account_id,
                "OpenAI chat completions streaming request completed"
            );
        };

        Ok(Box::pin(stream))
    }
}

impl Default for OpenAIRelay {
    fn default() -> Self {
        Self::new()
    }
}

/// The last chunk of a Chat Completions stream carries the `usage` block
/// only when the caller asked for it; every other chunk's `usage` is null.
pub fn extract_usage_from_chunk(chunk: &Bytes) -> Option<Usage> {
    let text = std::str::from_utf8(chunk).ok()?;

    for line in text.lines() {
        let Some(json_str) = line.strip_prefix("data: ") else {
            continue;
        };
        if json_str == "[DONE]" {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(json_str) {
            if let Some(usage) = value.get("usage").filter(|u| !u.is_null()) {
                if let Ok(usage) = serde_json::from_value::<Usage>(usage.clone()) {
                    return Some(usage);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_usage_from_final_chunk() {
        let chunk = Bytes::from(
            "data: {\"id\":\"1\",\"choices\":[],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":5,\"total_tokens\":15}}\n\n",
        );
        let usage = extract_usage_from_chunk(&chunk).unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
    }

    #[test]
    fn ignores_chunk_with_null_usage() {
        let chunk = Bytes::from("data: {\"id\":\"1\",\"choices\":[],\"usage\":null}\n\n");
        assert!(extract_usage_from_chunk(&chunk).is_none());
    }

    #[test]
    fn ignores_done_marker() {
        let chunk = Bytes::from("data: [DONE]\n\n");
        assert!(extract_usage_from_chunk(&chunk).is_none());
    }
}
