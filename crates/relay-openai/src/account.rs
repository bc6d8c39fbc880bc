use async_trait::async_trait;
use parking_lot::RwLock;
use relay_core::{AccountProvider, Credentials, Platform, ProxyConfig, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub struct OpenAIAccount {
    id: String,
    name: String,
    priority: u32,
    enabled: AtomicBool,
    api_key: String,
    api_url: Option<String>,
    proxy: Option<ProxyConfig>,
    unavailable_until: RwLock<Option<Instant>>,
}

impl OpenAIAccount {
    pub fn new(
        id: String,
        name: String,
        priority: u32,
        enabled: bool,
        api_key: String,
        api_url: Option<String>,
        proxy: Option<ProxyConfig>,
    ) -> Self {
        Self {
            id,
            name,
            priority,
            enabled: AtomicBool::new(enabled),
            api_key,
            api_url,
            proxy,
            unavailable_until: RwLock::new(None),
        }
    }
}

#[async_trait]
impl AccountProvider for OpenAIAccount {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> Platform {
        Platform::OpenAI
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn is_available(&self) -> bool {
        if !self.enabled.load(Ordering::Relaxed) {
            return false;
        }

        if let Some(until) = *self.unavailable_until.read() {
            if Instant::now() < until {
                return false;
            }
        }

        true
    }

    async fn get_credentials(&self) -> Result<Credentials> {
        Ok(Credentials::ApiKey(self.api_key.clone()))
    }

    fn proxy_config(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    fn api_url(&self) -> Option<&str> {
        self.api_url.as_deref()
    }

    fn mark_unavailable(&self, duration: Duration, _reason: &str) {
        let mut until = self.unavailable_until.write();
        *until = Some(Instant::now() + duration);
    }

    fn mark_available(&self) {
        let mut until = self.unavailable_until.write();
        *until = None;
    }

    fn account_type(&self) -> &str {
        "openai-chat"
    }
}

/// Azure OpenAI deployment: same Chat Completions wire shape as
/// `OpenAIAccount`, but the endpoint is a per-deployment URL with an
/// `api-version` query param, and auth is an `api-key` header rather than
/// `Authorization: Bearer`.
pub struct AzureOpenAIAccount {
    id: String,
    name: String,
    priority: u32,
    enabled: AtomicBool,
    api_key: String,
    full_url: String,
    proxy: Option<ProxyConfig>,
    unavailable_until: RwLock<Option<Instant>>,
}

impl AzureOpenAIAccount {
    pub fn new(
        id: String,
        name: String,
        priority: u32,
        enabled: bool,
        api_key: String,
        endpoint: String,
        deployment: String,
        api_version: String,
        proxy: Option<ProxyConfig>,
    ) -> Self {
        let full_url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.trim_end_matches('/'),
            deployment,
            api_version
        );
        Self {
            id,
            name,
            priority,
            enabled: AtomicBool::new(enabled),
            api_key,
            full_url,
            proxy,
            unavailable_until: RwLock::new(None),
        }
    }
}

#[async_trait]
impl AccountProvider for AzureOpenAIAccount {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> Platform {
        Platform::OpenAI
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn is_available(&self) -> bool {
        if !self.enabled.load(Ordering::Relaxed) {
            return false;
        }

        if let Some(until) = *self.unavailable_until.read() {
            if Instant::now() < until {
                return false;
            }
        }

        true
    }

    async fn get_credentials(&self) -> Result<Credentials> {
        Ok(Credentials::ApiKey(self.api_key.clone()))
    }

    fn proxy_config(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    fn api_url(&self) -> Option<&str> {
        Some(&self.full_url)
    }

    fn mark_unavailable(&self, duration: Duration, _reason: &str) {
        let mut until = self.unavailable_until.write();
        *until = Some(Instant::now() + duration);
    }

    fn mark_available(&self) {
        let mut until = self.unavailable_until.write();
        *until = None;
    }

    fn account_type(&self) -> &str {
        "azure-openai"
    }
}
