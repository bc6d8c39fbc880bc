use crate::{AccountStatus, ModelMapping, Platform, ProxyConfig, Result};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Credentials {
    Bearer(String),
    ApiKey(String),
    AwsSigV4 {
        access_key_id: String,
        secret_access_key: String,
        region: String,
    },
}

impl Credentials {
    pub fn as_bearer(&self) -> Option<&str> {
        match self {
            Credentials::Bearer(token) => Some(token),
            _ => None,
        }
    }

    pub fn as_api_key(&self) -> Option<&str> {
        match self {
            Credentials::ApiKey(key) => Some(key),
            _ => None,
        }
    }

    pub fn as_aws_sigv4(&self) -> Option<(&str, &str, &str)> {
        match self {
            Credentials::AwsSigV4 {
                access_key_id,
                secret_access_key,
                region,
            } => Some((access_key_id, secret_access_key, region)),
            _ => None,
        }
    }
}

#[async_trait]
pub trait AccountProvider: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn platform(&self) -> Platform;

    fn priority(&self) -> u32;

    fn is_available(&self) -> bool;

    async fn get_credentials(&self) -> Result<Credentials>;

    fn proxy_config(&self) -> Option<&ProxyConfig>;

    fn api_url(&self) -> Option<&str> {
        None
    }

    fn mark_unavailable(&self, duration: Duration, reason: &str);

    fn mark_available(&self);

    /// Distinguishes accounts that share a platform but speak a different
    /// wire protocol or auth scheme, e.g. "claude-oauth" vs "claude-bedrock".
    /// Used by the scheduler's `type,model` candidate-set resolution.
    fn account_type(&self) -> &str {
        "default"
    }

    /// Relative selection weight within accounts of equal priority.
    fn weight(&self) -> u32 {
        1
    }

    fn allowed_models(&self) -> Option<&[String]> {
        None
    }

    fn model_mapping(&self) -> Option<&ModelMapping> {
        None
    }

    fn max_concurrency(&self) -> Option<u32> {
        None
    }

    fn status(&self) -> AccountStatus {
        if self.is_available() {
            AccountStatus::Valid
        } else {
            AccountStatus::Unavailable
        }
    }

    /// Time remaining until the cached access token expires, for accounts
    /// that have one cached. `None` for accounts without an expiring token
    /// (API-key accounts) or with nothing cached yet.
    fn token_expires_in(&self) -> Option<Duration> {
        None
    }
}
