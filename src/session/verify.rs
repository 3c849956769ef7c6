use std::sync::Arc;

use axum::http::HeaderMap;

use super::claims;
use super::config::SessionSettings;
use super::csrf::{self, AntiCsrfMode};
use super::error::SessionError;
use super::recipe::{SessionRecipe, TokenVerdict};
use super::response::ResponseTokens;
use super::transport::{self, Presented};
use super::types::{Session, VerifyOptions};
use crate::core::VerifyOutcome;
use crate::types::TokenType;

/// Verify the access token a request presents.
///
/// Token changes (clearing on rejection, a replacement token from the core,
/// refetched claims) are collected first and moved into `sink` once every
/// network call has returned.
pub(crate) async fn get_session(
    recipe: &Arc<dyn SessionRecipe>,
    settings: &Arc<SessionSettings>,
    headers: &HeaderMap,
    sink: &mut ResponseTokens,
    options: &VerifyOptions,
) -> Result<Option<Session>, SessionError> {
    let mut pending = ResponseTokens::new();
    let result = verify(recipe, settings, headers, &mut pending, options).await;
    sink.extend(pending);
    result
}

async fn verify(
    recipe: &Arc<dyn SessionRecipe>,
    settings: &Arc<SessionSettings>,
    headers: &HeaderMap,
    pending: &mut ResponseTokens,
    options: &VerifyOptions,
) -> Result<Option<Session>, SessionError> {
    let requested = (settings.transfer_method)(headers, false);
    let Some(Presented { method, token: raw }) =
        transport::read_token(headers, TokenType::Access, requested)
    else {
        if options.session_required {
            return Err(SessionError::unauthorised("no session tokens in request", false));
        }
        return Ok(None);
    };

    let token = match recipe.verify_access_token(&raw).await? {
        TokenVerdict::Valid(token) => token,
        TokenVerdict::Expired(_) => {
            return Err(SessionError::TryRefreshToken("access token expired".into()));
        }
        TokenVerdict::Invalid(reason) => {
            tracing::debug!(%reason, channel = %method, "Rejected access token");
            transport::clear_all(settings, pending);
            return Err(SessionError::unauthorised(reason, true));
        }
    };

    let mode = settings.anti_csrf();
    let anti_csrf = token.claims().anti_csrf_token.as_deref();
    if let Err(reason) = csrf::check_access(mode, method, headers, anti_csrf) {
        tracing::warn!(
            %reason,
            session_handle = %token.claims().session_handle,
            "Anti-CSRF check failed"
        );
        return Err(SessionError::TryRefreshToken(reason.into()));
    }

    let first_use_after_refresh = token.claims().parent_refresh_token_hash1.is_some();
    let mut raw = raw;
    let mut payload_claims = token.into_claims();

    if options.check_database || first_use_after_refresh {
        match recipe.verify_with_core(&raw, mode == AntiCsrfMode::ViaToken).await? {
            VerifyOutcome::Ok { session, access_token } => {
                payload_claims.user_data = session.user_data_in_jwt;
                if let Some(info) = access_token {
                    transport::set_token(
                        settings,
                        pending,
                        TokenType::Access,
                        &info.token,
                        info.expiry,
                        method,
                    );
                    transport::set_front_token(
                        pending,
                        &payload_claims.user_id,
                        info.expiry,
                        &payload_claims.user_data,
                    );
                    raw = info.token;
                    payload_claims.expiry_time = info.expiry;
                }
            }
            VerifyOutcome::Unauthorised { message } => {
                tracing::debug!(
                    session_handle = %payload_claims.session_handle,
                    %message,
                    "Core rejected session"
                );
                transport::clear_all(settings, pending);
                return Err(SessionError::unauthorised(message, true));
            }
            VerifyOutcome::TryRefreshToken { message } => {
                return Err(SessionError::TryRefreshToken(message));
            }
        }
    }

    let mut session = Session::from_claims(
        Arc::clone(recipe),
        Arc::clone(settings),
        raw,
        payload_claims,
        method,
    );
    claims::validate_claims(&mut session, pending, &options.claim_validators).await?;
    Ok(Some(session))
}
