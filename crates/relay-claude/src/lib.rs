mod account;
mod oauth;
mod relay;
mod sigv4;
mod types;

pub use account::{ClaudeApiAccount, ClaudeBedrockAccount, ClaudeOAuthAccount};
pub use oauth::ClaudeOAuth;
pub use relay::{
    chunk_is_error_event, extract_usage_from_chunk, is_thinking_signature_error,
    strip_thinking_blocks, ClaudeRelay,
};
pub use sigv4::SigV4Signer;
pub use types::*;
