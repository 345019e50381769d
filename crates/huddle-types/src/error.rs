use thiserror::Error;

/// Failures a gateway event or an HTTP request can end in.
///
/// The `Display` text doubles as the reason carried by the outbound
/// `error` event, so it is written for the client, not for the log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Missing or invalid identity, or acting on behalf of another user.
    #[error("Unauthorized")]
    Unauthorized,

    /// The referenced channel, message, reaction or user does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The (user, message, emoji) reaction triple already exists.
    #[error("Reaction already exists")]
    Conflict,

    /// Malformed request, e.g. a message addressed to both a channel and a user.
    #[error("{0}")]
    Validation(String),

    /// The repository failed or returned something unexpected. The detail
    /// is for the log only.
    #[error("Storage failure")]
    Storage(String),
}

impl ChatError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}
