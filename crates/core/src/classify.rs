//! Failure classification.
//!
//! The remote service reports problems as free text, so the only signal
//! available is the message itself. Matching is case-insensitive substring
//! search against two phrase lists; anything unrecognised is permanent.

use serde::{Deserialize, Serialize};

/// Phrases the remote service uses for rate limiting and saturation.
pub const DEFAULT_RATE_LIMIT_PHRASES: &[&str] = &[
    "concurrent limit",
    "too many requests",
    "rate limit",
    "队列已满",
    "并发限制",
    "服务忙碌",
    "service busy",
    "server busy",
    "concurrency exceeded",
    "concurrency limit",
    "CONCURRENT_LIMIT_EXCEEDED",
    "TOO_MANY_REQUESTS",
];

/// Phrases produced by timeouts at any layer.
pub const DEFAULT_TIMEOUT_PHRASES: &[&str] =
    &["read timed out", "connection timeout", "timeout", "timed out"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The service is congested; back off exponentially and retry.
    RateLimited,
    /// A call exceeded its deadline; back off per job and retry.
    Timeout,
    /// Retrying will not help.
    Permanent,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Permanent => "permanent",
        }
    }

    pub fn is_transient(&self) -> bool {
        !matches!(self, ErrorClass::Permanent)
    }
}

/// Maps an error message to an [`ErrorClass`].
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rate_limit_phrases: Vec<String>,
    timeout_phrases: Vec<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT_PHRASES, DEFAULT_TIMEOUT_PHRASES)
    }
}

impl ErrorClassifier {
    pub fn new<S: AsRef<str>>(rate_limit_phrases: &[S], timeout_phrases: &[S]) -> Self {
        let lower = |phrases: &[S]| -> Vec<String> {
            phrases
                .iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect()
        };
        Self {
            rate_limit_phrases: lower(rate_limit_phrases),
            timeout_phrases: lower(timeout_phrases),
        }
    }

    /// Rate-limit phrases win over timeout phrases when both match.
    pub fn classify(&self, message: &str) -> ErrorClass {
        let message = message.to_lowercase();
        if self.rate_limit_phrases.iter().any(|p| message.contains(p)) {
            ErrorClass::RateLimited
        } else if self.timeout_phrases.iter().any(|p| message.contains(p)) {
            ErrorClass::Timeout
        } else {
            ErrorClass::Permanent
        }
    }

    pub fn is_timeout(&self, message: &str) -> bool {
        self.classify(message) == ErrorClass::Timeout
    }
}
