mod account_index;
mod classifier;
mod concurrency;
mod error;
mod http;
mod provider;
mod relay;
mod session;
mod types;

pub use account_index::AccountIndex;
pub use classifier::{ErrorClassifier, ErrorRule};
pub use concurrency::{ConcurrencyGate, ConcurrencyPermit};
pub use error::{RelayError, Result};
pub use http::read_error_response_body;
pub use provider::{AccountProvider, Credentials};
pub use relay::{BoxStream, Relay};
pub use session::generate_session_hash;
pub use types::*;
