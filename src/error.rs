use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("assistant backend is not configured: {0}")]
    Configuration(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("assistant run failed: {0}")]
    RunFailed(String),

    #[error("assistant run did not reach a terminal state within {0:?}")]
    RunTimedOut(Duration),

    #[error("assistant run completed without an assistant message")]
    NoResponse,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
