use thiserror::Error;

/// Failures of the result store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt store file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no scan result to delete for {0}")]
    NotFound(String),
}

/// Admission refused because the queue is at capacity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("scan queue is full ({limit} entries)")]
    QueueFull { limit: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
