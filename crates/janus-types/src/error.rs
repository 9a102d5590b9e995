use thiserror::Error;

/// Failures surfaced by the auth, counter and realtime layers.
///
/// Credential and token variants are deliberately coarse: callers facing a
/// client collapse them into one generic failure.
#[derive(Debug, Error)]
pub enum JanusError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token not found or expired")]
    TokenNotFoundOrExpired,

    #[error("event not found")]
    EventNotFound,

    #[error("participant not found")]
    ParticipantNotFound,

    #[error("event is not open for updates")]
    EventNotOpen,

    #[error("invalid update value {0}, expected +1 or -1")]
    InvalidUpdateValue(i64),

    #[error("event end must be after start, and both or neither must be set")]
    InvalidEventWindow,

    #[error("limit reached: {0}")]
    LimitReached(&'static str),

    #[error("random key collided {attempts} times in a row")]
    DuplicateKeyCollision { attempts: u32 },

    #[error(transparent)]
    StorageCommitFailure(anyhow::Error),
}

/// Storage calls return `anyhow::Error`. Typed failures raised inside a
/// transaction travel through it and are recovered here; everything else is a
/// storage failure.
impl From<anyhow::Error> for JanusError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<JanusError>() {
            Ok(typed) => typed,
            Err(other) => Self::StorageCommitFailure(other),
        }
    }
}

impl JanusError {
    /// Caller mistakes are reported as-is and never retried.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::EventNotOpen
                | Self::InvalidUpdateValue(_)
                | Self::InvalidEventWindow
                | Self::LimitReached(_)
        )
    }
}

pub type JanusResult<T> = Result<T, JanusError>;
