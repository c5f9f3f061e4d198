//! Error types for Assistline core

use thiserror::Error;

/// Main error type for Assistline operations
#[derive(Debug, Error)]
pub enum AssistlineError {
    /// Remote assistant API call failed (network, auth or API error)
    #[error("Remote call error: {0}")]
    Remote(String),

    /// Network/HTTP error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Run reached a terminal status other than `completed`
    #[error("Run {run_id} ended with status '{status}': {reason}")]
    RunFailed {
        /// Remote run id
        run_id: String,
        /// Terminal status reported by the API
        status: String,
        /// Vendor error message, or a generic description
        reason: String,
    },

    /// Downloading a remote file failed
    #[error("Could not fetch file '{file_id}': {message}")]
    FileFetch {
        /// Remote file id
        file_id: String,
        /// What went wrong
        message: String,
    },

    /// Polling exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Caller cancelled the operation
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenient Result type using AssistlineError
pub type Result<T> = std::result::Result<T, AssistlineError>;

impl AssistlineError {
    /// Create a remote call error
    pub fn remote(msg: impl Into<String>) -> Self {
        AssistlineError::Remote(msg.into())
    }

    /// Create a run failed error
    pub fn run_failed(
        run_id: impl Into<String>,
        status: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        AssistlineError::RunFailed {
            run_id: run_id.into(),
            status: status.into(),
            reason: reason.into(),
        }
    }

    /// Create a file fetch error
    pub fn file_fetch(file_id: impl Into<String>, message: impl Into<String>) -> Self {
        AssistlineError::FileFetch {
            file_id: file_id.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        AssistlineError::Timeout(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        AssistlineError::Cancelled(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        AssistlineError::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        AssistlineError::Validation(msg.into())
    }

    /// Whether polling stopped before the run reached a terminal status
    pub fn is_abandoned_run(&self) -> bool {
        matches!(
            self,
            AssistlineError::Timeout(_) | AssistlineError::Cancelled(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = AssistlineError::remote("401 unauthorized");
        assert_eq!(err.to_string(), "Remote call error: 401 unauthorized");

        let err = AssistlineError::file_fetch("file-1", "not found");
        assert_eq!(err.to_string(), "Could not fetch file 'file-1': not found");

        let err = AssistlineError::run_failed("run_1", "failed", "rate limited");
        assert_eq!(
            err.to_string(),
            "Run run_1 ended with status 'failed': rate limited"
        );
    }

    #[test]
    fn test_abandoned_run_classification() {
        assert!(AssistlineError::timeout("10s").is_abandoned_run());
        assert!(AssistlineError::cancelled("user").is_abandoned_run());
        assert!(!AssistlineError::remote("boom").is_abandoned_run());
    }

    #[test]
    fn test_result_type() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }

        assert_eq!(returns_result().unwrap(), 42);
    }
}
