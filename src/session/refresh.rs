use std::sync::Arc;

use axum::http::HeaderMap;

use super::config::SessionSettings;
use super::csrf;
use super::error::SessionError;
use super::recipe::SessionRecipe;
use super::response::ResponseTokens;
use super::transport::{self, Presented};
use super::types::Session;
use crate::core::RefreshOutcome;
use crate::types::TokenType;

/// Rotate the token pair a request presents.
///
/// On success the new pair goes out on the channel the refresh token came
/// in on. A rejected or replayed refresh token clears both channels.
pub(crate) async fn refresh_session(
    recipe: &Arc<dyn SessionRecipe>,
    settings: &Arc<SessionSettings>,
    headers: &HeaderMap,
    sink: &mut ResponseTokens,
) -> Result<Session, SessionError> {
    let requested = (settings.transfer_method)(headers, false);
    let presented = transport::read_token(headers, TokenType::Refresh, requested);
    let Some(Presented { method, token }) = presented else {
        return Err(SessionError::unauthorised("refresh token missing", false));
    };

    let mode = settings.anti_csrf();
    if let Err(reason) = csrf::check_refresh(mode, method, headers) {
        tracing::warn!(%reason, channel = %method, "Anti-CSRF check failed on refresh");
        return Err(SessionError::unauthorised(reason, false));
    }

    let anti_csrf_token = csrf::issue_token(mode, method);
    let enable_anti_csrf = anti_csrf_token.is_some();

    match recipe.refresh_session(&token, anti_csrf_token.clone(), enable_anti_csrf).await? {
        RefreshOutcome::Ok(tokens) => {
            let anti_csrf = tokens.anti_csrf_token.clone().or(anti_csrf_token);
            let mut pending = ResponseTokens::new();
            transport::set_issued_tokens(
                settings,
                headers,
                &mut pending,
                &tokens,
                method,
                anti_csrf.as_deref(),
            );
            sink.extend(pending);
            tracing::debug!(
                session_handle = %tokens.session.handle,
                channel = %method,
                "Session refreshed"
            );
            Ok(Session::from_issued(Arc::clone(recipe), Arc::clone(settings), tokens, method))
        }
        RefreshOutcome::Unauthorised { message } => {
            transport::clear_all(settings, sink);
            Err(SessionError::unauthorised(message, true))
        }
        RefreshOutcome::TokenTheftDetected { session } => {
            tracing::warn!(
                session_handle = %session.handle,
                user_id = %session.user_id,
                "Refresh token reuse detected"
            );
            if let Some(hook) = &settings.on_token_theft_detected {
                hook(&session.handle, &session.user_id);
            }
            transport::clear_all(settings, sink);
            Err(SessionError::TokenTheftDetected {
                session_handle: session.handle,
                user_id: session.user_id,
            })
        }
    }
}
