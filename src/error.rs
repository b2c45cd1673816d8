use thiserror::Error;

/// The full error taxonomy surfaced to callers of the storage core.
///
/// Each variant is a distinct kind rather than a wrapped string so callers can
/// pattern-match on propagation policy instead of parsing messages.
#[derive(Debug, Error)]
pub enum DecentError {
    #[error("not found")]
    NotFound,

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("malformed: {0}")]
    Malformed(String),

    #[error("corrupted: {0}")]
    Corrupted(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("durability failed: {0}")]
    DurabilityFailed(String),

    #[error("snapshot expired")]
    SnapshotExpired,

    #[error("not selective: {0}")]
    NotSelective(String),

    #[error("incompatible format: {0}")]
    IncompatibleFormat(String),

    #[error("busy: writer lock not acquired within deadline")]
    Busy,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DecentError>;

impl DecentError {
    /// True once a write transaction encountering this error must be rolled
    /// back rather than left open for the caller to retry the statement.
    pub fn is_transaction_fatal(&self) -> bool {
        matches!(
            self,
            DecentError::Malformed(_)
                | DecentError::Corrupted(_)
                | DecentError::ResourceExhausted(_)
                | DecentError::DurabilityFailed(_)
        )
    }
}
