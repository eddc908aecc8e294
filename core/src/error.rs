use thiserror::Error;

/// Failure kinds surfaced by the probing core.
///
/// `Validation` and `Internal` are raised immediately. `Request` and
/// `Timeout` only become visible once the executor's retry budget is spent.
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// Reserved for security-policy violations. Nothing raises it yet.
    #[error("security policy violation: {0}")]
    Security(String),

    #[error("unexpected error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ReconError>;
