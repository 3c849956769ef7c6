use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use subtle::ConstantTimeEq;

use crate::error::Error;
use crate::types::TransferMethod;

/// Request header carrying the double-submit anti-CSRF value.
pub(crate) const ANTI_CSRF_HEADER: &str = "anti-csrf";
/// Custom header whose mere presence proves a same-origin caller.
pub(crate) const CUSTOM_HEADER: &str = "rid";

/// How cookie-transported sessions are protected against CSRF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntiCsrfMode {
    /// Random token embedded in the access token, echoed in `anti-csrf`.
    ViaToken,
    /// Require the `rid` request header.
    ViaCustomHeader,
    None,
}

impl std::str::FromStr for AntiCsrfMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "via_token" => Ok(Self::ViaToken),
            "via_custom_header" => Ok(Self::ViaCustomHeader),
            "none" => Ok(Self::None),
            other => Err(Error::Config(format!("unknown anti-csrf mode: {other}"))),
        }
    }
}

/// Generates a random anti-CSRF token.
///
/// Returns a 32-character URL-safe string (24 random bytes → base64url).
#[must_use]
pub fn generate_anti_csrf_token() -> String {
    let random_bytes: [u8; 24] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Whether tokens issued over `method` carry an embedded anti-CSRF token.
pub(crate) fn token_required(mode: AntiCsrfMode, method: TransferMethod) -> bool {
    mode == AntiCsrfMode::ViaToken && method == TransferMethod::Cookie
}

/// Fresh token for a session being created or refreshed over `method`, if one is needed.
pub(crate) fn issue_token(mode: AntiCsrfMode, method: TransferMethod) -> Option<String> {
    token_required(mode, method).then(generate_anti_csrf_token)
}

/// Checks a request presenting an access token over `method`.
///
/// Header transport is exempt: a foreign origin cannot attach an
/// `Authorization` header the way a browser attaches cookies.
pub(crate) fn check_access(
    mode: AntiCsrfMode,
    method: TransferMethod,
    headers: &HeaderMap,
    embedded: Option<&str>,
) -> Result<(), &'static str> {
    if method != TransferMethod::Cookie {
        return Ok(());
    }
    match mode {
        AntiCsrfMode::None => Ok(()),
        AntiCsrfMode::ViaCustomHeader => check_custom_header(headers),
        AntiCsrfMode::ViaToken => {
            let embedded = embedded.ok_or("access token carries no anti-csrf token")?;
            let presented = headers
                .get(ANTI_CSRF_HEADER)
                .and_then(|v| v.to_str().ok())
                .ok_or("anti-csrf header missing")?;
            if bool::from(presented.as_bytes().ct_eq(embedded.as_bytes())) {
                Ok(())
            } else {
                Err("anti-csrf token mismatch")
            }
        }
    }
}

/// Checks a refresh request. Only the custom-header rule applies here; the
/// refresh cookie is path-scoped to the refresh endpoint.
pub(crate) fn check_refresh(
    mode: AntiCsrfMode,
    method: TransferMethod,
    headers: &HeaderMap,
) -> Result<(), &'static str> {
    if method == TransferMethod::Cookie && mode == AntiCsrfMode::ViaCustomHeader {
        check_custom_header(headers)
    } else {
        Ok(())
    }
}

fn check_custom_header(headers: &HeaderMap) -> Result<(), &'static str> {
    if headers.contains_key(CUSTOM_HEADER) {
        Ok(())
    } else {
        Err("custom anti-csrf header missing")
    }
}
