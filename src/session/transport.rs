//! Per-request choice between cookie and header transport.
//!
//! Reading never falls back to a channel the hook did not allow. Writing a
//! token pair over one channel clears whatever the request carried on the
//! other, so a client never holds two live pairs.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use serde_json::{Map, Value as JsonValue};

use super::config::SessionSettings;
use super::cookies;
use super::csrf::ANTI_CSRF_HEADER;
use super::front_token::FrontToken;
use super::response::ResponseTokens;
use crate::core::IssuedTokens;
use crate::token::looks_like_access_token;
use crate::types::{TokenType, TransferMethod, UserId};

/// Request header letting a client pick the transport on session creation.
pub const AUTH_MODE_HEADER: &str = "st-auth-mode";
pub(crate) const ACCESS_TOKEN_HEADER: &str = "st-access-token";
pub(crate) const REFRESH_TOKEN_HEADER: &str = "st-refresh-token";
pub(crate) const FRONT_TOKEN_HEADER: &str = "front-token";
const FRONT_TOKEN_REMOVED: &str = "remove";

/// Default transfer method hook: `st-auth-mode` decides on creation,
/// anything goes afterwards.
#[must_use]
pub fn default_transfer_method(headers: &HeaderMap, is_creating_session: bool) -> TransferMethod {
    if !is_creating_session {
        return TransferMethod::Any;
    }
    headers
        .get(AUTH_MODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(TransferMethod::Any)
}

/// A token found on a concrete channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Presented {
    pub(crate) method: TransferMethod,
    pub(crate) token: String,
}

/// Transport used to send tokens for a new session. `Any` means header.
pub(crate) fn creation_method(requested: TransferMethod) -> TransferMethod {
    match requested {
        TransferMethod::Any => TransferMethod::Header,
        fixed => fixed,
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Token of `token_type` on the header channel.
///
/// The `Authorization` header is shared with other middleware: an access
/// token must look like one of ours, and a refresh token must not look like
/// an access token. Anything else is ignored.
fn header_token(headers: &HeaderMap, token_type: TokenType) -> Option<String> {
    let token = bearer(headers)?;
    let ours = looks_like_access_token(token);
    match token_type {
        TokenType::Access if ours => Some(token.to_string()),
        TokenType::Refresh if !ours => Some(token.to_string()),
        _ => None,
    }
}

fn channel_token(
    headers: &HeaderMap,
    token_type: TokenType,
    method: TransferMethod,
) -> Option<String> {
    match method {
        TransferMethod::Header => header_token(headers, token_type),
        TransferMethod::Cookie => cookies::get_token(headers, token_type),
        TransferMethod::Any => None,
    }
}

/// Pick the token of `token_type` the request presents, honouring `requested`.
///
/// Under `Any`, access tokens are looked up in the header channel first and
/// refresh tokens in cookies first: any non-PASETO bearer value passes as a
/// refresh token, so a foreign `Authorization` header must not shadow a
/// refresh cookie. A fixed method only ever reads its own channel.
pub(crate) fn read_token(
    headers: &HeaderMap,
    token_type: TokenType,
    requested: TransferMethod,
) -> Option<Presented> {
    let order: &[TransferMethod] = match (requested, token_type) {
        (TransferMethod::Any, TokenType::Access) => {
            &[TransferMethod::Header, TransferMethod::Cookie]
        }
        (TransferMethod::Any, TokenType::Refresh) => {
            &[TransferMethod::Cookie, TransferMethod::Header]
        }
        (TransferMethod::Header, _) => &[TransferMethod::Header],
        (TransferMethod::Cookie, _) => &[TransferMethod::Cookie],
    };
    order.iter().find_map(|&method| {
        channel_token(headers, token_type, method).map(|token| Presented { method, token })
    })
}

/// Whether the request carries any session token on `method`.
fn has_tokens_on(headers: &HeaderMap, method: TransferMethod) -> bool {
    channel_token(headers, TokenType::Access, method).is_some()
        || (method == TransferMethod::Cookie
            && channel_token(headers, TokenType::Refresh, method).is_some())
}

pub(crate) fn set_token(
    settings: &SessionSettings,
    sink: &mut ResponseTokens,
    token_type: TokenType,
    value: &str,
    expiry_ms: u64,
    method: TransferMethod,
) {
    match method {
        TransferMethod::Cookie => {
            sink.add_cookie(cookies::token_cookie(settings, token_type, value, expiry_ms));
        }
        TransferMethod::Header => sink.set_header(header_name(token_type), value.to_string()),
        TransferMethod::Any => {}
    }
}

fn header_name(token_type: TokenType) -> &'static str {
    match token_type {
        TokenType::Access => ACCESS_TOKEN_HEADER,
        TokenType::Refresh => REFRESH_TOKEN_HEADER,
    }
}

fn clear_channel(settings: &SessionSettings, sink: &mut ResponseTokens, method: TransferMethod) {
    for token_type in [TokenType::Access, TokenType::Refresh] {
        match method {
            TransferMethod::Cookie => {
                sink.add_cookie(cookies::clear_token_cookie(settings, token_type));
            }
            TransferMethod::Header => sink.set_header(header_name(token_type), String::new()),
            TransferMethod::Any => {}
        }
    }
}

/// After writing a pair over `used`, clear tokens the request carried on the
/// other channel.
pub(crate) fn clear_other_channel(
    settings: &SessionSettings,
    headers: &HeaderMap,
    sink: &mut ResponseTokens,
    used: TransferMethod,
) {
    if let Some(other) = used.other() {
        if has_tokens_on(headers, other) {
            tracing::debug!(
                cleared = %other,
                kept = %used,
                "Clearing tokens on the unused channel"
            );
            clear_channel(settings, sink, other);
        }
    }
}

/// Clear every session token on both channels and tell the client to drop
/// its front token.
pub(crate) fn clear_all(settings: &SessionSettings, sink: &mut ResponseTokens) {
    clear_channel(settings, sink, TransferMethod::Cookie);
    clear_channel(settings, sink, TransferMethod::Header);
    sink.set_header(FRONT_TOKEN_HEADER, FRONT_TOKEN_REMOVED.to_string());
}

/// Write a freshly issued pair over `method`, with its front token and,
/// when given, the anti-CSRF token. Tokens on the other channel are cleared.
pub(crate) fn set_issued_tokens(
    settings: &SessionSettings,
    headers: &HeaderMap,
    sink: &mut ResponseTokens,
    tokens: &IssuedTokens,
    method: TransferMethod,
    anti_csrf_token: Option<&str>,
) {
    set_token(
        settings,
        sink,
        TokenType::Access,
        &tokens.access_token.token,
        tokens.access_token.expiry,
        method,
    );
    set_token(
        settings,
        sink,
        TokenType::Refresh,
        &tokens.refresh_token.token,
        tokens.refresh_token.expiry,
        method,
    );
    set_front_token(
        sink,
        &tokens.session.user_id,
        tokens.access_token.expiry,
        &tokens.session.user_data_in_jwt,
    );
    if let Some(token) = anti_csrf_token {
        sink.set_header(ANTI_CSRF_HEADER, token.to_string());
    }
    clear_other_channel(settings, headers, sink, method);
}

pub(crate) fn set_front_token(
    sink: &mut ResponseTokens,
    user_id: &UserId,
    access_token_expiry: u64,
    payload: &Map<String, JsonValue>,
) {
    let front = FrontToken::new(user_id.clone(), access_token_expiry, payload.clone());
    sink.set_header(FRONT_TOKEN_HEADER, front.encode());
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use axum::http::header::COOKIE;

    use super::*;
    use crate::core::CoreConfig;
    use crate::session::SessionConfig;
    use crate::token::test_keys::{Signer, claims};

    fn settings() -> SessionSettings {
        SessionConfig::new(CoreConfig::new("http://localhost:3567".parse().unwrap())).settings
    }

    fn access_token() -> String {
        Signer::generate("k1").sign(&claims("u1", 10))
    }

    fn request(bearer: Option<&str>, cookie: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(token) = bearer {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).unwrap();
            headers.insert(AUTHORIZATION, value);
        }
        if let Some(cookie) = cookie {
            headers.insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
        }
        headers
    }

    #[test]
    fn default_hook_reads_auth_mode_only_on_creation() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTH_MODE_HEADER, HeaderValue::from_static("cookie"));
        assert_eq!(default_transfer_method(&headers, true), TransferMethod::Cookie);
        assert_eq!(default_transfer_method(&headers, false), TransferMethod::Any);
        assert_eq!(default_transfer_method(&HeaderMap::new(), true), TransferMethod::Any);
    }

    #[test]
    fn creation_defaults_any_to_header() {
        assert_eq!(creation_method(TransferMethod::Any), TransferMethod::Header);
        assert_eq!(creation_method(TransferMethod::Cookie), TransferMethod::Cookie);
    }

    #[test]
    fn any_prefers_our_header_token() {
        let at = access_token();
        let headers = request(Some(&at), Some("sAccessToken=cookie-token"));
        let found = read_token(&headers, TokenType::Access, TransferMethod::Any).unwrap();
        assert_eq!(found.method, TransferMethod::Header);
        assert_eq!(found.token, at);
    }

    #[test]
    fn any_ignores_foreign_bearer_and_falls_back_to_cookie() {
        let headers = request(Some("third-party-api-key"), Some("sAccessToken=cookie-token"));
        let found = read_token(&headers, TokenType::Access, TransferMethod::Any).unwrap();
        assert_eq!(found.method, TransferMethod::Cookie);
        assert_eq!(found.token, "cookie-token");

        let headers = request(Some("third-party-api-key"), None);
        assert!(read_token(&headers, TokenType::Access, TransferMethod::Any).is_none());
    }

    #[test]
    fn fixed_method_never_reads_the_other_channel() {
        let at = access_token();
        let cookie_only = request(None, Some(&format!("sAccessToken={at}")));
        assert!(read_token(&cookie_only, TokenType::Access, TransferMethod::Header).is_none());

        let header_only = request(Some(&at), None);
        assert!(read_token(&header_only, TokenType::Access, TransferMethod::Cookie).is_none());
    }

    #[test]
    fn refresh_header_token_must_not_be_an_access_token() {
        let at = access_token();
        let headers = request(Some(&at), Some("sRefreshToken=rt-cookie"));
        let found = read_token(&headers, TokenType::Refresh, TransferMethod::Any).unwrap();
        assert_eq!(found.method, TransferMethod::Cookie);

        let headers = request(Some("rt-opaque"), None);
        let found = read_token(&headers, TokenType::Refresh, TransferMethod::Any).unwrap();
        assert_eq!(found.method, TransferMethod::Header);
        assert_eq!(found.token, "rt-opaque");
    }

    #[test]
    fn refresh_cookie_wins_over_foreign_bearer() {
        let headers = request(Some("third-party-api-key"), Some("sRefreshToken=rt-cookie"));
        let found = read_token(&headers, TokenType::Refresh, TransferMethod::Any).unwrap();
        assert_eq!(found.method, TransferMethod::Cookie);
        assert_eq!(found.token, "rt-cookie");

        let found = read_token(&headers, TokenType::Refresh, TransferMethod::Header).unwrap();
        assert_eq!(found.token, "third-party-api-key");
    }

    #[test]
    fn non_bearer_schemes_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert!(read_token(&headers, TokenType::Refresh, TransferMethod::Header).is_none());
    }

    #[test]
    fn clears_cookies_when_header_channel_is_used() {
        let headers = request(None, Some("sAccessToken=old; sRefreshToken=old-rt"));
        let mut sink = ResponseTokens::new();
        clear_other_channel(&settings(), &headers, &mut sink, TransferMethod::Header);

        let access = sink.cookie("sAccessToken").unwrap();
        assert_eq!(access.value(), "");
        assert!(sink.cookie("sRefreshToken").is_some());
    }

    #[test]
    fn clears_header_tokens_when_cookie_channel_is_used() {
        let headers = request(Some(&access_token()), None);
        let mut sink = ResponseTokens::new();
        clear_other_channel(&settings(), &headers, &mut sink, TransferMethod::Cookie);

        assert_eq!(sink.header(ACCESS_TOKEN_HEADER), Some(""));
        assert_eq!(sink.header(REFRESH_TOKEN_HEADER), Some(""));
        assert!(sink.cookies().is_empty());
    }

    #[test]
    fn nothing_to_clear_when_other_channel_is_empty() {
        let mut sink = ResponseTokens::new();
        clear_other_channel(&settings(), &HeaderMap::new(), &mut sink, TransferMethod::Cookie);
        assert!(sink.is_empty());
    }

    #[test]
    fn clear_all_covers_both_channels_and_front_token() {
        let mut sink = ResponseTokens::new();
        clear_all(&settings(), &mut sink);
        assert_eq!(sink.cookies().len(), 2);
        assert_eq!(sink.header(ACCESS_TOKEN_HEADER), Some(""));
        assert_eq!(sink.header(REFRESH_TOKEN_HEADER), Some(""));
        assert_eq!(sink.header(FRONT_TOKEN_HEADER), Some("remove"));
    }
}
