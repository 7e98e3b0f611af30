use thiserror::Error;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store: camera {0} not found")]
    CameraNotFound(i64),

    #[error("store: person {0} not found")]
    PersonNotFound(String),

    #[error("store: transaction already finished")]
    TxFinished,

    #[error("store: storage error: {0}")]
    Storage(String),
}
