//! Errors raised while talking to the cloud provider.

use blockvault_core::error::AppError;
use thiserror::Error;

/// Failure of a single provider call.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The request never produced an HTTP response.
    #[error("Transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// Response status code.
        status: u16,
        /// Response body, shortened.
        message: String,
    },

    /// The addressed resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The response body did not have the expected shape.
    #[error("Malformed provider response: {0}")]
    Decode(String),

    /// Transient failures continued until the retry budget ran out.
    #[error("{operation} gave up after {attempts} attempts: {last}")]
    RetryBudgetExhausted {
        /// Name of the retried call.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last transient failure.
        last: Box<CloudError>,
    },
}

impl CloudError {
    /// Whether retrying the same call may succeed.
    ///
    /// Transport failures, 5xx answers and 429 throttling are transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::NotFound(_) | Self::Decode(_) | Self::RetryBudgetExhausted { .. } => false,
        }
    }

    /// Whether the provider certainly did not act on the request, so that
    /// a non-idempotent call can be sent again.
    ///
    /// Only failed connections and 429 throttling qualify.
    pub fn is_safe_to_resend(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_connect(),
            Self::Http { status, .. } => *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err)
        }
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<CloudError> for AppError {
    fn from(err: CloudError) -> Self {
        match &err {
            CloudError::NotFound(_) => AppError::not_found(err.to_string()),
            CloudError::RetryBudgetExhausted { .. } => {
                AppError::service_unavailable(err.to_string())
            }
            e if e.is_transient() => AppError::service_unavailable(err.to_string()),
            _ => AppError::external_service(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockvault_core::error::ErrorKind;

    fn http(status: u16) -> CloudError {
        CloudError::Http {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn test_transient_statuses() {
        assert!(http(500).is_transient());
        assert!(http(503).is_transient());
        assert!(http(429).is_transient());
        assert!(!http(400).is_transient());
        assert!(!http(413).is_transient());
        assert!(!CloudError::NotFound("b".into()).is_transient());
    }

    #[test]
    fn test_safe_to_resend() {
        assert!(http(429).is_safe_to_resend());
        assert!(!http(503).is_safe_to_resend());
        assert!(!http(500).is_safe_to_resend());
        assert!(!CloudError::Decode("x".into()).is_safe_to_resend());
    }

    #[test]
    fn test_app_error_mapping() {
        assert_eq!(AppError::from(CloudError::NotFound("x".into())).kind, ErrorKind::NotFound);
        assert_eq!(AppError::from(http(502)).kind, ErrorKind::ServiceUnavailable);
        assert_eq!(AppError::from(http(403)).kind, ErrorKind::ExternalService);
        let exhausted = CloudError::RetryBudgetExhausted {
            operation: "get_backup".into(),
            attempts: 4,
            last: Box::new(http(503)),
        };
        assert!(AppError::from(exhausted).is_transient());
    }
}
