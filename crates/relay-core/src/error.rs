use crate::types::Platform;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("No available account for platform {0:?}")]
    NoAccount(Platform),

    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("Upstream API error: {status} - {message}")]
    Upstream { status: u16, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Organization disabled: {0}")]
    OrganizationDisabled(String),

    #[error("API overloaded, retry after {retry_after_minutes} minutes")]
    Overloaded { retry_after_minutes: u32 },

    #[error("Opus weekly limit reached")]
    OpusWeeklyLimit,

    #[error("Insufficient balance. Please check your daily limit and total quota.")]
    InsufficientQuota,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Content filtered: {0}")]
    ContentFiltered(String),

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("No available account for tenant, concurrency limit reached")]
    TenantConcurrencyLimited,
}

impl RelayError {
    pub fn from_response_body(status: u16, body: &str) -> Self {
        match status {
            401 => RelayError::Unauthorized(body.to_string()),
            402 => RelayError::InsufficientQuota,
            403 if body.contains("organization has been disabled") => {
                RelayError::OrganizationDisabled(body.to_string())
            }
            403 => RelayError::Unauthorized(body.to_string()),
            400 if body.to_lowercase().contains("content_filter")
                || body.to_lowercase().contains("content filtered") =>
            {
                RelayError::ContentFiltered(body.to_string())
            }
            429 if body.contains("weekly usage limit") && body.to_lowercase().contains("opus") => {
                RelayError::OpusWeeklyLimit
            }
            429 => RelayError::RateLimited(60),
            529 => RelayError::Overloaded {
                retry_after_minutes: 5,
            },
            _ => RelayError::Upstream {
                status,
                message: body.to_string(),
            },
        }
    }

    /// HTTP status and client-facing `type` string for this error, per the
    /// fixed vocabulary (`auth_failed`, `key_disabled`, `key_expired`,
    /// `key_invalid`, `client_not_allowed`, `user_concurrency_limit`,
    /// `no_available_account`, `upstream_error`, `upstream_connection_failed`,
    /// `model_disabled`, `internal_error`). `key_disabled`/`key_expired`/
    /// `key_invalid` are reserved for the API-key validator, not produced
    /// from this enum.
    pub fn client_status_and_type(&self) -> (u16, &'static str) {
        match self {
            RelayError::Unauthorized(_) => (401, "auth_failed"),
            RelayError::OrganizationDisabled(_) => (403, "client_not_allowed"),
            RelayError::ContentFiltered(_) => (400, "client_not_allowed"),
            RelayError::UnsupportedModel(_) => (403, "model_disabled"),
            RelayError::TenantConcurrencyLimited => (429, "user_concurrency_limit"),
            RelayError::NoAccount(_) => (503, "no_available_account"),
            RelayError::Network(_) => (502, "upstream_connection_failed"),
            RelayError::Upstream { status, .. } => (*status, "upstream_error"),
            RelayError::RateLimited(_) => (429, "upstream_error"),
            RelayError::Overloaded { .. } => (529, "upstream_error"),
            RelayError::OpusWeeklyLimit => (429, "upstream_error"),
            RelayError::InsufficientQuota => (402, "upstream_error"),
            RelayError::OAuth(_) => (502, "upstream_error"),
            RelayError::InvalidRequest(_) => (400, "internal_error"),
            RelayError::Database(_) | RelayError::Config(_) | RelayError::Internal(_) => {
                (500, "internal_error")
            }
        }
    }

    pub fn client_message(&self) -> String {
        self.to_string()
    }

    /// Builds the client-facing error envelope: `{ code, message, type }`.
    pub fn to_json_error(&self) -> serde_json::Value {
        let (code, kind) = self.client_status_and_type();
        serde_json::json!({
            "code": code,
            "message": self.client_message(),
            "type": kind,
        })
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Internal(e.to_string())
    }
}
