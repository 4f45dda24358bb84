use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Identity resolution failed: {message}")]
    Resolution { message: String },

    #[error("Template error: {message}")]
    Template { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Processing timed out after {seconds}s (retryable)")]
    Timeout { seconds: u64 },

    #[error("Invariant violation: {message}")]
    Invariant { message: String },
}

pub type Result<T> = std::result::Result<T, TrackerError>;
