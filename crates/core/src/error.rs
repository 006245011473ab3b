//! Error types for the deployment engine.

use snafu::Snafu;

use depot_storage::StorageError;

/// Result alias for engine operations.
pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// Failure of a service operation, as surfaced to callers and mapped to the
/// HTTP taxonomy by the server crate.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ServiceError {
    /// The deployment was rejected; every collected reason is listed.
    #[snafu(display("Deployment failed: {}", errors.join("\n")))]
    Validation {
        /// All predicate failures, in evaluation order.
        errors: Vec<String>,
    },

    /// The requested entity, content, or audit record does not exist.
    #[snafu(display("Not found: {what}"))]
    NotFound {
        /// Description of what was looked up.
        what: String,
    },

    /// The target exists but is hidden by the blacklist overlay.
    #[snafu(display("Blacklisted: {target}"))]
    Blacklisted {
        /// The hidden target.
        target: String,
    },

    /// The storage driver failed.
    #[snafu(display("Storage failure: {source}"))]
    Storage {
        /// Underlying driver error.
        source: StorageError,
    },

    /// The history ledger could not be read or appended.
    #[snafu(display("History ledger failure: {message}"))]
    History {
        /// Error description.
        message: String,
    },

    /// Unexpected internal state.
    #[snafu(display("Internal error: {message}"))]
    Internal {
        /// Error description.
        message: String,
    },
}

impl ServiceError {
    /// Convenience constructor for a single-reason validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation { errors: vec![message.into()] }
    }
}

impl From<StorageError> for ServiceError {
    fn from(source: StorageError) -> Self {
        ServiceError::Storage { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display_joins_errors() {
        let err = ServiceError::Validation {
            errors: vec!["first".to_string(), "second".to_string()],
        };
        assert_eq!(err.to_string(), "Deployment failed: first\nsecond");
    }
}
