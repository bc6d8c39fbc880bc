use crate::RelayError;

/// One entry in an [`ErrorClassifier`]'s ordered rule list. Rules are tried
/// in order; the first match wins, mirroring the waterfall shape of
/// `RelayError::from_response_body`.
pub struct ErrorRule {
    pub name: String,
    pub keyword: String,
    pub retryable: bool,
}

/// Decides whether a [`RelayError`] should trigger a retry against another
/// account. Distinct from `RelayError::from_response_body`, which classifies
/// a raw HTTP response into an error variant; this classifies an already
/// constructed error for the retry loop.
pub struct ErrorClassifier {
    rules: Vec<ErrorRule>,
}

impl ErrorClassifier {
    pub fn new(rules: Vec<ErrorRule>) -> Self {
        Self { rules }
    }

    /// The substrings a retry engine checks for by default: transport-level
    /// hiccups and the handful of upstream status codes worth trying a
    /// different account for.
    pub fn retry_default() -> Self {
        Self::new(vec![
            ErrorRule { name: "timeout".into(), keyword: "timeout".into(), retryable: true },
            ErrorRule { name: "connection".into(), keyword: "connection".into(), retryable: true },
            ErrorRule { name: "forbidden".into(), keyword: "403".into(), retryable: true },
            ErrorRule { name: "rate_limited".into(), keyword: "429".into(), retryable: true },
            ErrorRule { name: "bad_gateway".into(), keyword: "502".into(), retryable: true },
            ErrorRule { name: "unavailable".into(), keyword: "503".into(), retryable: true },
            ErrorRule { name: "overloaded".into(), keyword: "529".into(), retryable: true },
        ])
    }

    /// Builds a classifier from a flat list of keyword substrings, e.g. the
    /// ConfigStore's `retryableErrorSubstrings` field. Every substring is
    /// treated as its own retryable rule, keyed by itself.
    pub fn from_substrings(substrings: &[String]) -> Self {
        Self::new(
            substrings
                .iter()
                .map(|s| ErrorRule {
                    name: s.clone(),
                    keyword: s.to_lowercase(),
                    retryable: true,
                })
                .collect(),
        )
    }

    pub fn is_retryable(&self, error: &RelayError) -> bool {
        match error {
            RelayError::RateLimited(_)
            | RelayError::Overloaded { .. }
            | RelayError::OpusWeeklyLimit
            | RelayError::Unauthorized(_)
            | RelayError::OrganizationDisabled(_)
            | RelayError::InsufficientQuota
            | RelayError::Network(_) => return true,
            RelayError::ContentFiltered(_) => return false,
            _ => {}
        }

        let message = error.to_string().to_lowercase();
        self.rules
            .iter()
            .find(|rule| message.contains(rule.keyword))
            .map(|rule| rule.retryable)
            .unwrap_or(false)
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::retry_default()
    }
}
