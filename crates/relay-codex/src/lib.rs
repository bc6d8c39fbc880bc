mod account;
mod relay;
mod types;

pub use account::CodexAccount;
pub use relay::{is_codex_cli_user_agent, CodexRelay};
pub use types::{ResponsesRequest, ResponsesResponse};
