//! Error types for coach-deploy
//!
//! Errors carry structured context (the resource or store involved) so log lines
//! and teardown reports say what failed without extra bookkeeping.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for coach-deploy operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Invalid job or manifest input
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "runs[0].image")
        field: Option<String>,
    },

    /// Cluster connection or job configuration could not be loaded
    #[error("configuration error [{context}]: {message}")]
    Config {
        /// Description of what failed
        message: String,
        /// Where the configuration came from (e.g., "kubeconfig", "job-file")
        context: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource or parameter set being serialized (if known)
        kind: Option<String>,
    },

    /// Memory backend or data store lifecycle error
    #[error("store error [{store}]: {message}")]
    Store {
        /// Store kind (e.g., "nfs", "s3", "redispubsub")
        store: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "tail", "poll_until")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a configuration error with context
    pub fn config(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a retryable store error
    pub fn store(store: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Store {
            store: store.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable store error (e.g., a missing claim)
    pub fn store_permanent(store: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Store {
            store: store.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Kubernetes client errors (4xx) are permanent except request timeouts and
    /// throttling; transport failures and 5xx responses are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 408 && ae.code != 429
            ),
            Error::Validation { .. } => false,
            Error::Config { .. } => false,
            Error::Serialization { .. } => false,
            Error::Store { retryable, .. } => *retryable,
            Error::Internal { .. } => true,
        }
    }

    /// True when the error is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }

    /// True when the error is a Kubernetes 409 (object already exists)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Config { context, .. } => Some(context),
            Error::Internal { context, .. } => Some(context),
            Error::Store { store, .. } => Some(store),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: "Test".to_string(),
            code,
        }))
    }

    /// Story: the tail loop keeps going on transient faults but stops on
    /// permanent ones, so the classification has to be right.
    #[test]
    fn story_api_errors_are_classified_by_status_code() {
        assert!(!api_error(404).is_retryable());
        assert!(!api_error(403).is_retryable());
        assert!(!api_error(422).is_retryable());

        // Timeouts and throttling clear up on their own
        assert!(api_error(408).is_retryable());
        assert!(api_error(429).is_retryable());

        // Server-side faults are transient
        assert!(api_error(500).is_retryable());
        assert!(api_error(503).is_retryable());
    }

    #[test]
    fn not_found_and_conflict_helpers() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(404).is_conflict());
        assert!(api_error(409).is_conflict());
        assert!(!Error::internal("boom").is_not_found());
    }

    /// Story: configuration faults require a fix, not a retry
    #[test]
    fn story_configuration_faults_are_permanent() {
        assert!(!Error::validation("image must not be empty").is_retryable());
        assert!(!Error::config("kubeconfig", "no current context").is_retryable());
        assert!(!Error::serialization("bad json").is_retryable());
    }

    #[test]
    fn store_errors_carry_retryability() {
        let err = Error::store("nfs", "claim not bound yet");
        assert!(err.is_retryable());
        assert_eq!(err.context(), Some("nfs"));
        assert!(err.to_string().contains("[nfs]"));

        let err = Error::store_permanent("nfs", "claim checkpoints not found");
        assert!(!err.is_retryable());
    }

    #[test]
    fn validation_field_is_recorded() {
        let err = Error::validation_for_field("runs[0].image", "must not be empty");
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("runs[0].image"));
            }
            _ => panic!("Expected Validation variant"),
        }
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));
        assert!(err.is_retryable());
    }

    #[test]
    fn json_errors_become_serialization_errors() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
