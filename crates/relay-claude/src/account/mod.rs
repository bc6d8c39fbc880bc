mod api;
mod bedrock;
mod oauth;

pub use api::ClaudeApiAccount;
pub use bedrock::ClaudeBedrockAccount;
pub use oauth::ClaudeOAuthAccount;
