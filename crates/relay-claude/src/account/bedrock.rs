use async_trait::async_trait;
use parking_lot::RwLock;
use relay_core::{AccountProvider, Credentials, Platform, ProxyConfig, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub struct ClaudeBedrockAccount {
    id: String,
    name: String,
    priority: u32,
    enabled: AtomicBool,
    access_key_id: String,
    secret_access_key: String,
    region: String,
    model_id: Option<String>,
    proxy: Option<ProxyConfig>,
    unavailable_until: RwLock<Option<Instant>>,
}

impl ClaudeBedrockAccount {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        name: String,
        priority: u32,
        enabled: bool,
        access_key_id: String,
        secret_access_key: String,
        region: String,
        model_id: Option<String>,
        proxy: Option<ProxyConfig>,
    ) -> Self {
        Self {
            id,
            name,
            priority,
            enabled: AtomicBool::new(enabled),
            access_key_id,
            secret_access_key,
            region,
            model_id,
            proxy,
            unavailable_until: RwLock::new(None),
        }
    }

    /// The Bedrock model id to invoke when the request doesn't name one
    /// directly (Bedrock model ids don't match Anthropic's own naming).
    pub fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

#[async_trait]
impl AccountProvider for ClaudeBedrockAccount {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> Platform {
        Platform::Claude
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
        Ok(Credentials::AwsSigV4 {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            region: self.region.clone(),
        })
    }

    fn proxy_config(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
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
        "claude-bedrock"
    }
}
