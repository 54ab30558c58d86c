//! Error types for the remediation engine.
//!
//! Only setup failures travel as [`RemediationError`]. A failure that
//! concerns a single object is turned into a [`crate::RenameOutcome`] by the
//! rename protocol and never aborts a run.

/// Run-level error type.
#[derive(Debug, thiserror::Error)]
pub enum RemediationError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The lookup input could not be loaded.
    #[error("failed to load lookup input {path}: {source}")]
    LookupLoad {
        /// Path of the lookup input.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The lookup line pattern is not a valid regular expression.
    #[error("invalid lookup pattern: {0}")]
    LookupPattern(#[from] regex::Error),
}

/// Convenience result type for remediation setup.
pub type RemediationResult<T> = Result<T, RemediationError>;

/// Error raised by a storage client call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The store or transport rejected the request.
    #[error("{operation} failed: {message}")]
    Client {
        /// The wire operation that failed (e.g. `CopyObject`).
        operation: &'static str,
        /// Error code and message reported by the store.
        message: String,
    },

    /// A successful response did not carry a field the protocol relies on.
    #[error("{operation} response is missing {field}")]
    MissingField {
        /// The wire operation.
        operation: &'static str,
        /// The missing field name.
        field: &'static str,
    },

    /// The parts of a multipart upload were not in ascending order.
    #[error("The list of parts was not in ascending order")]
    InvalidPartOrder,

    /// One or more of the specified parts could not be found.
    #[error("One or more of the specified parts could not be found")]
    InvalidPart,

    /// The specified key does not exist.
    #[error("The specified key does not exist: {key}")]
    NoSuchKey {
        /// The key that was not found.
        key: String,
    },

    /// The specified multipart upload does not exist.
    #[error("The specified upload does not exist: {upload_id}")]
    NoSuchUpload {
        /// The upload ID that was not found.
        upload_id: String,
    },

    /// The store handle was closed.
    #[error("store handle is closed")]
    Closed,
}

impl StoreError {
    /// Build a client error for the given operation.
    #[must_use]
    pub fn client(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Client {
            operation,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_format_client_error() {
        let err = StoreError::client("CopyObject", "AccessDenied: denied");
        assert_eq!(err.to_string(), "CopyObject failed: AccessDenied: denied");
    }

    #[test]
    fn test_should_wrap_store_error_transparently() {
        let err: RemediationError = StoreError::Closed.into();
        assert_eq!(err.to_string(), "store handle is closed");
    }
}
