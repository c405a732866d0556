use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
pub enum GatorError {
    #[error("invalid accession: {0:?}")]
    InvalidAccession(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("service already registered: {0}")]
    DuplicateService(String),

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("Zero return status from server, possibly a cross-origin or aborted request: {0}")]
    ZeroStatus(String),

    #[error("server returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("service reported an error: {0}")]
    Remote(String),

    #[error("failed to build result: {0}")]
    ResultConstruction(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("a bulk cache operation is already in progress")]
    BulkInProgress,

    #[error("retrieval superseded by a newer request")]
    Superseded,

    #[error("missing config file gator.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl GatorError {
    /// True for failures raised by the network layer rather than by parsing
    /// or result construction.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            GatorError::Transport(_)
                | GatorError::Timeout(_)
                | GatorError::ZeroStatus(_)
                | GatorError::Status { .. }
        )
    }
}

impl From<rusqlite::Error> for GatorError {
    fn from(err: rusqlite::Error) -> Self {
        GatorError::Cache(err.to_string())
    }
}
