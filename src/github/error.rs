use tracing::warn;

/// Classification of API errors for retry handling
#[derive(Debug, Clone, PartialEq)]
pub enum ApiRetryableError {
    /// Transient failures worth retrying (5xx, network trouble, timeouts)
    Retryable(String),
    /// Primary or secondary rate limiting, retryable after a pause
    RateLimit,
    /// Failures a retry cannot fix (auth, bad request, not found)
    NonRetryable(String),
}

impl ApiRetryableError {
    /// Maps an octocrab transport error into a retry category.
    pub fn from_octocrab_error(error: octocrab::Error) -> Self {
        match &error {
            octocrab::Error::GitHub { source, .. } => {
                let status = source.status_code.as_u16();
                let detail = format!("GitHub API error {}: {}", status, source.message);
                match status {
                    429 => {
                        warn!("Rate limit (429) reported by the API");
                        Self::RateLimit
                    }
                    403 if source.message.contains("rate limit")
                        || source.message.contains("secondary rate limit") =>
                    {
                        warn!("Rate limit (403) reported by the API: {}", source.message);
                        Self::RateLimit
                    }
                    401 | 403 => {
                        Self::NonRetryable(format!("authentication or permission failure: {}", detail))
                    }
                    400..=499 => Self::NonRetryable(detail),
                    500..=599 => Self::Retryable(detail),
                    _ => Self::NonRetryable(detail),
                }
            }
            octocrab::Error::Http { .. } | octocrab::Error::Hyper { .. } => {
                Self::Retryable(format!("transport error: {}", error))
            }
            octocrab::Error::Json { .. } => {
                Self::NonRetryable(format!("response decoding error: {}", error))
            }
            octocrab::Error::Uri { .. } => Self::NonRetryable(format!("URI error: {}", error)),
            _ => Self::NonRetryable(format!("unexpected error: {}", error)),
        }
    }
}

impl std::fmt::Display for ApiRetryableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retryable(msg) => write!(f, "Retryable error: {}", msg),
            Self::RateLimit => write!(f, "Rate limit error"),
            Self::NonRetryable(msg) => write!(f, "Non-retryable error: {}", msg),
        }
    }
}

impl std::error::Error for ApiRetryableError {}
