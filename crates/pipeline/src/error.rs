//! Pipeline error types

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failures from the analysis pipeline collaborator.
///
/// The retry policy is keyed on [`PipelineError::is_transient`]: transport
/// failures, server errors and rate limits may succeed on retry; a 4xx or a
/// response the model produced in the wrong shape will not, and retrying
/// those only burns latency and tokens.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Connection, TLS or timeout failure before a response arrived.
    #[error("pipeline transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The model API answered with a non-success status.
    #[error("pipeline api returned {status}: {message}")]
    Api { status: u16, message: String },

    /// 429 from the model API.
    #[error("pipeline api rate limited the request")]
    RateLimited,

    /// The response arrived but could not be decoded into the expected
    /// structure. Permanent: the same request yields the same shape.
    #[error("malformed pipeline response: {0}")]
    MalformedResponse(String),

    /// Required configuration missing.
    #[error("pipeline configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// True when a retry of the identical request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Transport(_) => true,
            PipelineError::RateLimited => true,
            PipelineError::Api { status, .. } => *status >= 500,
            PipelineError::MalformedResponse(_) => false,
            PipelineError::Config(_) => false,
        }
    }
}
