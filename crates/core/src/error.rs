use thiserror::Error;

pub type JourneyResult<T> = Result<T, JourneyError>;

/// Fatal journey errors. Anything here is a configuration or programming
/// mistake surfaced immediately to the caller; recoverable conditions
/// (lookup misses, transport failures, expired nonces) are expressed as
/// `Option`/`bool` results instead.
#[derive(Error, Debug)]
pub enum JourneyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Duplicated data id <<{kind}: {id}>>")]
    DuplicateId { kind: &'static str, id: String },

    #[error("Unknown step id provided: {0}")]
    UnknownStep(String),

    #[error("Cant find given path >>{0}<< in any path collection")]
    UnknownPath(String),

    #[error("Cant create nonce without an active session")]
    SessionInactive,

    #[error("Model extraction requires at least one schema property")]
    EmptyModelSchema,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
