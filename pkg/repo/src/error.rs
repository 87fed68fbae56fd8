use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("codebase {0} not found")]
    NotFound(String),

    #[error("conflict on {path}: {message}")]
    Conflict { path: String, message: String },

    #[error("repo rejected {path} with status {status}: {message}")]
    Rejected {
        path: String,
        status: u16,
        message: String,
    },

    #[error("transient failure on {path}: {message}")]
    Transient { path: String, message: String },

    #[error("invalid repo address '{0}'")]
    InvalidAddress(String),
}

impl RepoError {
    /// Network errors and 5xx answers; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepoError::Transient { .. })
    }
}
