use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedMessage,
    LinkLost,
    InvalidLocalState,
    CommandTimeout,
    CommandRejected,
    InvariantViolation,
}

/// Everything the engine surfaces to callers. None of these stop the engine;
/// `InvariantViolation` makes it rebuild from an empty snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("link lost")]
    LinkLost,
    #[error("invalid local state: {0}")]
    InvalidLocalState(String),
    #[error("command timed out")]
    CommandTimeout,
    #[error("command rejected: {0}")]
    CommandRejected(String),
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::MalformedMessage(_) => ErrorKind::MalformedMessage,
            SyncError::LinkLost => ErrorKind::LinkLost,
            SyncError::InvalidLocalState(_) => ErrorKind::InvalidLocalState,
            SyncError::CommandTimeout => ErrorKind::CommandTimeout,
            SyncError::CommandRejected(_) => ErrorKind::CommandRejected,
            SyncError::InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SyncError::InvalidLocalState(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
}

impl From<CodecError> for SyncError {
    fn from(e: CodecError) -> Self {
        SyncError::MalformedMessage(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("link thread spawn failed: {0}")]
    Spawn(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse failed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
