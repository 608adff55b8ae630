use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt vector blob for {0}")]
    CorruptVector(String),
    #[error("not found: {0}")]
    NotFound(String),
}
