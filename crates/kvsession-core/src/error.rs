use thiserror::Error;

/// A convenience `Result` alias using [`SessionError`].
pub type SessionResult<T> = Result<T, SessionError>;

/// Every failure the session layer can surface to a caller.
///
/// None of these are retried internally; transient variants are left to the
/// caller's retry policy.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A data access or `end` was attempted before `start` completed.
    #[error("session not started")]
    NotStarted,

    /// No backend is registered under the requested name.
    #[error("unknown session backend: {0}")]
    UnknownBackend(String),

    /// The underlying store could not be reached or refused the operation.
    #[error("session backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Stored bytes could not be decoded into session data.
    #[error("corrupt session data: {0}")]
    CorruptSessionData(String),

    /// The id cannot be used as a key by the selected backend.
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// Pool bounds were inconsistent.
    #[error("invalid pool size: min {min} > max {max}")]
    InvalidPoolSize {
        /// Requested floor.
        min: usize,
        /// Requested ceiling.
        max: usize,
    },

    /// Configuration could not be read or was malformed.
    #[error("config error: {0}")]
    Config(String),
}

impl SessionError {
    /// Whether the failure is transient and worth retrying by the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, SessionError::BackendUnavailable(_))
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::BackendUnavailable(e.to_string())
    }
}
