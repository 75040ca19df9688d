// ============================================================
// Layer 3 - Error Taxonomy
// ============================================================
// Every core layer (domain, data, ml, infra) returns this
// typed error. The application and CLI layers wrap it in
// anyhow with extra context.
//
// Propagation policy:
//   InvalidArgument  - fatal at construction, never retried
//   NotFound         - fatal to the operation that asked
//   InvalidInput     - local to one prediction request
//   StorageFailure   - registry / cache / checkpoint I/O
//   SchemaMismatch   - registry document failed to parse
//   Model            - tensor or record failure inside burn
//
// Only InvalidInput is survivable on the serving path.

use thiserror::Error;

/// Result alias used by every core layer.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad architecture name, bad metric name, bad config value
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No matching runs, unresolved alias, missing data version
    #[error("not found: {0}")]
    NotFound(String),

    /// Undecodable or unsupported image submitted for prediction
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Registry, checkpoint or cache storage could not be read or written
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// A registry document did not match the typed schema
    #[error("schema mismatch in '{context}': {reason}")]
    SchemaMismatch { context: String, reason: String },

    /// Tensor, record or shape failure inside the ML backend
    #[error("model error: {0}")]
    Model(String),
}

impl Error {
    /// Wrap an I/O error with the path or operation that produced it.
    pub fn storage(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        Error::StorageFailure(format!("{context}: {err}"))
    }

    pub fn schema(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::SchemaMismatch { context: context.into(), reason: reason.to_string() }
    }

    /// True when the failure belongs to a single request and the
    /// serving process can keep going.
    pub fn is_request_local(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StorageFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_invalid_input_is_request_local() {
        assert!(Error::InvalidInput("bad png".into()).is_request_local());
        assert!(!Error::NotFound("alias".into()).is_request_local());
        assert!(!Error::StorageFailure("disk".into()).is_request_local());
        assert!(!Error::InvalidArgument("vgg".into()).is_request_local());
    }

    #[test]
    fn io_errors_become_storage_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: Error = io.into();
        assert!(matches!(err, Error::StorageFailure(_)));
    }
}
