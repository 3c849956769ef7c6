/// Errors raised while talking to the core or decoding tokens.
///
/// Session-level outcomes (`unauthorised`, `try refresh token`, ...) live in
/// [`SessionError`](crate::session::SessionError); this type is what the
/// lower layers produce.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The core answered with a non-success status or an unexpected body.
    #[error("core {operation} failed (status {status:?}): {detail}")]
    Core {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token verification error: {0}")]
    Token(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("invalid token transfer method: {0}")]
    InvalidTransferMethod(String),
}

impl Error {
    /// Whether the failure came from reaching the core rather than from local
    /// token or config handling.
    #[must_use]
    pub fn is_core_communication(&self) -> bool {
        matches!(self, Self::Core { .. } | Self::Http(_))
    }
}
