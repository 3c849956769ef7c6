use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::response::ResponseTokens;
use crate::types::{SessionHandle, UserId};

/// Wire message for [`SessionError::Unauthorised`]. Clients match on it.
pub const UNAUTHORISED_MESSAGE: &str = "unauthorised";
/// Wire message for [`SessionError::TryRefreshToken`]. Clients match on it.
pub const TRY_REFRESH_TOKEN_MESSAGE: &str = "try refresh token";

/// Outcome of a session operation that did not yield a usable session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Malformed request shape.
    #[error("bad input: {0}")]
    BadInput(String),

    /// No salvageable session; the client must sign in again.
    #[error("unauthorised: {message}")]
    Unauthorised { message: String, clear_tokens: bool },

    /// Session is structurally valid but stale; the client should call the
    /// refresh endpoint and retry.
    #[error("try refresh token: {0}")]
    TryRefreshToken(String),

    /// A rotated-away refresh token was replayed. Reported to the client
    /// exactly like `Unauthorised`.
    #[error("token theft detected for session {session_handle}")]
    TokenTheftDetected {
        session_handle: SessionHandle,
        user_id: UserId,
    },

    /// The core could not be reached or answered with an error.
    #[error(transparent)]
    Core(#[from] crate::error::Error),
}

impl SessionError {
    pub(crate) fn unauthorised(message: impl Into<String>, clear_tokens: bool) -> Self {
        Self::Unauthorised {
            message: message.into(),
            clear_tokens,
        }
    }

    /// HTTP status the error maps to.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorised { .. }
            | Self::TryRefreshToken(_)
            | Self::TokenTheftDetected { .. } => StatusCode::UNAUTHORIZED,
            Self::BadInput(_) => StatusCode::BAD_REQUEST,
            Self::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message sent to the client.
    #[must_use]
    pub fn wire_message(&self) -> &str {
        match self {
            Self::Unauthorised { .. } | Self::TokenTheftDetected { .. } => UNAUTHORISED_MESSAGE,
            Self::TryRefreshToken(_) => TRY_REFRESH_TOKEN_MESSAGE,
            Self::BadInput(msg) => msg,
            Self::Core(_) => "internal error",
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        if let Self::Core(ref e) = self {
            tracing::error!(error = %e, "Session core communication error");
        }
        let body = serde_json::json!({ "message": self.wire_message() });
        (self.status_code(), Json(body)).into_response()
    }
}

/// A [`SessionError`] together with the token changes that must reach the
/// client anyway (cleared cookies, removed front token).
#[derive(Debug)]
pub struct SessionRejection {
    pub tokens: ResponseTokens,
    pub error: SessionError,
}

impl SessionRejection {
    #[must_use]
    pub fn new(tokens: ResponseTokens, error: SessionError) -> Self {
        Self { tokens, error }
    }
}

impl IntoResponse for SessionRejection {
    fn into_response(self) -> Response {
        (self.tokens, self.error).into_response()
    }
}

impl From<SessionError> for SessionRejection {
    fn from(error: SessionError) -> Self {
        Self::new(ResponseTokens::new(), error)
    }
}
