use thiserror::Error;

/// Error taxonomy for the auth/session core and the user replica.
///
/// Token and session errors surface to the caller as access denial; quota
/// errors as a rejection of the requested action. Event delivery and
/// replication failures never reach here; they are logged and dropped at
/// the bus/replicator boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token")]
    TokenInvalid,

    #[error("token expired")]
    TokenExpired,

    #[error("session not found")]
    SessionNotFound,

    #[error("session expired")]
    SessionExpired,

    #[error("quota exceeded")]
    QuotaExceeded,

    #[error("user not found")]
    UserNotFound,

    #[error("email already registered")]
    EmailTaken,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("weak password: {0}")]
    WeakPassword(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
