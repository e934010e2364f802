use thiserror::Error;

use crate::jobs::JobKind;

/// Failure taxonomy shared by the engine's jobs and the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Network failure, timeout, auth rejection or non-2xx from the media server.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("store failure: {0}")]
    StoreFailure(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} job is already running")]
    ConcurrentRunRejected(JobKind),
}

impl EngineError {
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        Self::UpstreamUnavailable(err.to_string())
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::StoreFailure(err.to_string())
    }
}
