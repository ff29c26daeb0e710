use thiserror::Error;

pub type Result<T> = std::result::Result<T, VerificationError>;

/// Hard failures. Refusals that are part of normal operation (unknown id,
/// wrong actor, blocked pair, unknown group) are reported through return
/// values instead.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("parties cannot verify themselves")]
    SelfVerification,

    #[error("verification message cannot exceed {max} characters (got {actual})")]
    MessageTooLong { max: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cursor does not belong to this listing")]
    InvalidCursor,

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
