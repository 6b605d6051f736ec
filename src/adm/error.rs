use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdmError {
    #[error("state store io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid user id: {0:?}")]
    InvalidUserId(String),
    #[error("adaptation service closed")]
    ServiceClosed,
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type AdmResult<T> = Result<T, AdmError>;
