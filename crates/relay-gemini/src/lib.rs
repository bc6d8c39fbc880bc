mod account;
mod oauth;
mod relay;
mod types;

pub use account::GeminiAccount;
pub use oauth::GeminiOAuth;
pub use relay::{extract_usage_from_chunk, gemini_chunk_to_openai_chunk, GeminiRelay, GeminiRequest};
pub use types::*;
