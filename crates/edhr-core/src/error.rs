use thiserror::Error;

/// Errors surfaced by the workflow engine, provisioner, and store.
///
/// Every variant aborts the enclosing unit of work; nothing is committed
/// partially. Audit append failures never surface through this type.
#[derive(Debug, Error)]
pub enum HrError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Already final: {0}")]
    AlreadyFinal(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl HrError {
    /// Stable machine-readable kind for wire error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidState(_) => "invalid_state",
            Self::AlreadyFinal(_) => "already_final",
            Self::Forbidden(_) => "forbidden",
            Self::Timeout(_) => "timeout",
            Self::Storage(_) => "storage_failure",
        }
    }

    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{entity} '{id}' does not exist"))
    }
}

impl From<sqlx::Error> for HrError {
    fn from(err: sqlx::Error) -> Self {
        // Generic message on the wire; the cause goes to the log only.
        tracing::error!(error = %err, "storage backend failure");
        Self::Storage("underlying store unavailable".to_string())
    }
}
