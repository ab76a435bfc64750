use thiserror::Error;

/// Errors surfaced by the macrotape library.
#[derive(Error, Debug)]
pub enum MacrotapeError {
    #[error("nothing to undo")]
    NothingToUndo,

    #[error("nothing to redo")]
    NothingToRedo,

    #[error("a macro is already running")]
    AlreadyRunning,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("input injection failed: {0}")]
    Injection(String),

    #[error("input hook error: {0}")]
    Hook(String),

    #[error("screen capture failed: {0}")]
    Capture(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MacrotapeError>;
