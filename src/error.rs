use thiserror::Error;

pub type QuartzDBResult<T, E = QuartzDBError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum QuartzDBError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}
