mod account;
mod relay;
mod types;

pub use account::{AzureOpenAIAccount, OpenAIAccount};
pub use relay::{extract_usage_from_chunk, OpenAIRelay};
pub use types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Usage};
