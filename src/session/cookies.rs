use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::Cookie;
use time::{Duration, OffsetDateTime};

use super::config::SessionSettings;
use crate::types::TokenType;

pub(crate) const ACCESS_TOKEN_COOKIE: &str = "sAccessToken";
pub(crate) const REFRESH_TOKEN_COOKIE: &str = "sRefreshToken";

/// The access token carries its own expiry, so its cookie outlives it and
/// is replaced on refresh.
const ACCESS_TOKEN_COOKIE_LIFETIME: Duration = Duration::days(365 * 100);

fn cookie_name(token_type: TokenType) -> &'static str {
    match token_type {
        TokenType::Access => ACCESS_TOKEN_COOKIE,
        TokenType::Refresh => REFRESH_TOKEN_COOKIE,
    }
}

fn cookie_path(settings: &SessionSettings, token_type: TokenType) -> String {
    match token_type {
        TokenType::Access => "/".to_string(),
        TokenType::Refresh => settings.refresh_path(),
    }
}

/// Create a session token cookie. `expiry_ms` is used for the refresh
/// token only.
pub(super) fn token_cookie(
    settings: &SessionSettings,
    token_type: TokenType,
    value: &str,
    expiry_ms: u64,
) -> Cookie<'static> {
    let mut builder = Cookie::build((cookie_name(token_type), value.to_string()))
        .http_only(true)
        .secure(settings.cookie_secure)
        .same_site(settings.cookie_same_site)
        .path(cookie_path(settings, token_type));

    builder = match token_type {
        TokenType::Access => builder.max_age(ACCESS_TOKEN_COOKIE_LIFETIME),
        TokenType::Refresh => {
            let nanos = i128::from(expiry_ms) * 1_000_000;
            let expires = OffsetDateTime::from_unix_timestamp_nanos(nanos)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH);
            builder.expires(expires)
        }
    };

    if let Some(domain) = &settings.cookie_domain {
        builder = builder.domain(domain.clone());
    }
    builder.build()
}

/// Create removal cookie for a session token: empty value, expired at the epoch.
pub(super) fn clear_token_cookie(
    settings: &SessionSettings,
    token_type: TokenType,
) -> Cookie<'static> {
    let mut builder = Cookie::build((cookie_name(token_type), ""))
        .http_only(true)
        .secure(settings.cookie_secure)
        .same_site(settings.cookie_same_site)
        .path(cookie_path(settings, token_type))
        .max_age(Duration::ZERO)
        .expires(OffsetDateTime::UNIX_EPOCH);

    if let Some(domain) = &settings.cookie_domain {
        builder = builder.domain(domain.clone());
    }
    builder.build()
}

/// Get a session token from the request cookies.
pub(super) fn get_token(headers: &HeaderMap, token_type: TokenType) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(cookie_name(token_type))
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use axum::http::header::COOKIE;
    use axum_extra::extract::cookie::SameSite;

    use super::*;
    use crate::core::CoreConfig;
    use crate::session::SessionConfig;

    fn settings() -> SessionSettings {
        SessionConfig::new(CoreConfig::new("http://localhost:3567".parse().unwrap()))
            .with_cookie_domain("example.com")
            .settings
    }

    #[test]
    fn refresh_cookie_is_scoped_to_refresh_path() {
        let cookie = token_cookie(&settings(), TokenType::Refresh, "rt", 1_700_000_000_000);
        assert_eq!(cookie.name(), "sRefreshToken");
        assert_eq!(cookie.path(), Some("/auth/session/refresh"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.domain(), Some("example.com"));
        assert_eq!(
            cookie.expires_datetime().unwrap().unix_timestamp(),
            1_700_000_000
        );
    }

    #[test]
    fn access_cookie_lives_at_root() {
        let cookie = token_cookie(&settings(), TokenType::Access, "at", 0);
        assert_eq!(cookie.name(), "sAccessToken");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(ACCESS_TOKEN_COOKIE_LIFETIME));
    }

    #[test]
    fn clear_cookie_expires_at_epoch() {
        let cookie = clear_token_cookie(&settings(), TokenType::Refresh);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(Duration::ZERO));
        assert_eq!(cookie.expires_datetime(), Some(OffsetDateTime::UNIX_EPOCH));
        assert_eq!(cookie.path(), Some("/auth/session/refresh"));
    }

    #[test]
    fn reads_tokens_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("other=1; sAccessToken=at-value; sRefreshToken="),
        );
        assert_eq!(get_token(&headers, TokenType::Access).as_deref(), Some("at-value"));
        assert_eq!(get_token(&headers, TokenType::Refresh), None);
    }
}
