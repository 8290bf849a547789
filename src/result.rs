use thiserror::Error;

/// Main error type for the sqlconduit library
#[derive(Error, Debug)]
pub enum ConduitError {
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[cfg(feature = "postgresql")]
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("row decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("parameter not provided: {0}")]
    ParameterNotProvided(String),
    #[error("parameter type mismatch: expected {expected}, got {got}")]
    ParameterTypeMismatch { expected: String, got: String },
    #[error("split column not found: {0}")]
    SplitColumnNotFound(String),
    #[error("result set count mismatch: expected {expected}, got {got}")]
    ResultSetCountMismatch { expected: usize, got: usize },
    #[error("stored procedures are not supported by this backend: {0}")]
    ProcedureNotSupported(String),
    #[error(
        "transaction operations returning deferred work are not supported \
         (got {0}); use the suspending executor and await the work instead"
    )]
    DeferredOperationNotSupported(String),
    #[error("explicit transaction control conflicts with the transactional executor: {0}")]
    ExplicitTransactionControl(String),
}

impl ConduitError {
    pub fn new_parameter_not_provided(name: impl Into<String>) -> Self {
        ConduitError::ParameterNotProvided(name.into())
    }

    pub fn new_type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        ConduitError::ParameterTypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }
}

/// Type alias for Results using ConduitError
pub type Result<T> = std::result::Result<T, ConduitError>;
