use thiserror::Error;

/// Failure of a single request against the object store or the document store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The addressed object does not exist (possibly deleted after listing)
    #[error("object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// The object store rejected or failed the request
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    /// The document store rejected or failed the request
    #[error("document store error: {0}")]
    Document(String),
}

/// A remote operation kept failing until its attempt budget ran out.
#[derive(Error, Debug)]
#[error("{description} failed after {attempts} attempt(s)")]
pub struct RetryExhausted {
    pub description: String,
    pub attempts: u32,
    #[source]
    pub source: StoreError,
}

/// Errors surfaced by the migration engine.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Pagination gave up; nothing was migrated.
    #[error("listing s3://{bucket}/{prefix} failed")]
    List {
        bucket: String,
        prefix: String,
        #[source]
        source: RetryExhausted,
    },

    /// A copy, put, head, delete or upsert of one task gave up.
    #[error(transparent)]
    RetryExhausted(#[from] RetryExhausted),

    /// The transform policy could not plan an in-scope object.
    #[error("cannot transform '{key}': {reason}")]
    Transform { key: String, reason: String },

    /// A worker task ended without producing an outcome.
    #[error("worker for '{key}' stopped unexpectedly: {reason}")]
    Worker { key: String, reason: String },

    /// At least one task failed; committed migrations are kept.
    #[error("{failed} of {total} task(s) failed, {cancelled} cancelled")]
    PartialBatchFailure {
        failed: usize,
        cancelled: usize,
        total: usize,
    },
}

impl MigrationError {
    pub fn transform(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transform {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Environment configuration problems, always fatal at startup.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Environment variable {0} is missing or empty!")]
    MissingVariable(String),

    #[error("Environment name must not be empty")]
    EmptyEnvironment,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The exhausted error keeps the underlying store error as its source.
    #[test]
    fn retry_exhausted_exposes_cause() {
        let err = RetryExhausted {
            description: "COPY a -> b".to_string(),
            attempts: 5,
            source: StoreError::Request {
                operation: "CopyObject",
                message: "SlowDown".to_string(),
            },
        };
        assert_eq!(err.to_string(), "COPY a -> b failed after 5 attempt(s)");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("CopyObject failed: SlowDown"));
    }

    #[test]
    fn transform_error_names_the_key() {
        let err = MigrationError::transform("document-media/x/a.png", "document 'x' not found");
        assert_eq!(
            err.to_string(),
            "cannot transform 'document-media/x/a.png': document 'x' not found"
        );
    }
}
