use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use pasetors::keys::AsymmetricPublicKey;
use pasetors::token::UntrustedToken;
use pasetors::version4::{PublicToken, V4};
use pasetors::Public;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::Error;
use crate::types::{KeyId, SessionHandle, UserId};

const TOKEN_HEADER: &str = "v4.public.";

/// Ed25519 public key (32 bytes) used to verify access tokens issued by the core.
#[derive(Clone)]
pub struct PublicKey {
    bytes: [u8; 32],
}

impl PublicKey {
    /// Get the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PublicKey(")?;
        f.write_str(&hex::encode(self.bytes))?;
        f.write_str(")")
    }
}

/// Parses a hex-encoded Ed25519 public key (32 bytes) into a `PublicKey`.
///
/// # Errors
///
/// Returns `Error::Token` if the hex is invalid or the key length is not 32 bytes.
pub fn parse_public_key_hex(public_key_hex: &str) -> Result<PublicKey, Error> {
    let bytes = hex::decode(public_key_hex)
        .map_err(|e| Error::Token(format!("invalid hex: {e}")))?;
    if bytes.len() != 32 {
        return Err(Error::Token(format!(
            "invalid key length: expected 32, got {}",
            bytes.len()
        )));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(PublicKey { bytes: arr })
}

/// Claims embedded in a session access token.
///
/// `user_data` is the application's access token payload; everything else is
/// session bookkeeping written by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenClaims {
    pub session_handle: SessionHandle,
    pub user_id: UserId,
    pub refresh_token_hash1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_refresh_token_hash1: Option<String>,
    #[serde(default)]
    pub user_data: Map<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anti_csrf_token: Option<String>,
    /// Epoch milliseconds.
    pub expiry_time: u64,
    /// Epoch milliseconds.
    pub time_created: u64,
}

/// A signature-verified access token. Expiry is not checked here.
#[derive(Debug, Clone)]
pub struct AccessToken {
    raw: String,
    claims: AccessTokenClaims,
}

impl AccessToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn claims(&self) -> &AccessTokenClaims {
        &self.claims
    }

    #[must_use]
    pub fn into_claims(self) -> AccessTokenClaims {
        self.claims
    }

    #[must_use]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.claims.expiry_time <= now_ms
    }
}

/// Verifies the signature of a `v4.public` access token and decodes its claims.
///
/// # Errors
///
/// Returns `Error::Token` if the token is malformed, the signature does not
/// verify against `public_key`, or the payload does not carry session claims.
pub fn verify_access_token(public_key: &PublicKey, token_str: &str) -> Result<AccessToken, Error> {
    if !token_str.starts_with(TOKEN_HEADER) {
        return Err(Error::Token("invalid token format".into()));
    }

    let pk = AsymmetricPublicKey::<V4>::from(&public_key.bytes[..])
        .map_err(|e| Error::Token(e.to_string()))?;

    let untrusted_token = UntrustedToken::<Public, V4>::try_from(token_str)
        .map_err(|e| Error::Token(e.to_string()))?;

    // footer is None: it is authenticated by the signature but not compared
    let trusted_token = PublicToken::verify(&pk, &untrusted_token, None, None)
        .map_err(|e| Error::Token(e.to_string()))?;

    let claims: AccessTokenClaims = serde_json::from_str(trusted_token.payload())
        .map_err(|e| Error::Token(format!("invalid session claims: {e}")))?;

    Ok(AccessToken {
        raw: token_str.to_owned(),
        claims,
    })
}

/// Structural check: does `token_str` look like an access token issued for
/// sessions (PASETO `v4.public` with a `kid` footer)?
///
/// No signature check. Used to tell our bearer tokens apart from foreign
/// `Authorization` values that other middleware may own.
#[must_use]
pub fn looks_like_access_token(token_str: &str) -> bool {
    extract_kid_from_token(token_str).is_ok()
}

/// Extract key ID from an access token without verifying the signature.
///
/// # Errors
///
/// Returns `Error::Token` if the token format is invalid or the footer
/// does not contain a `kid` claim.
pub fn extract_kid_from_token(token_str: &str) -> Result<KeyId, Error> {
    let footer_bytes = extract_footer_from_token(token_str)?;
    extract_kid_from_untrusted_footer(&footer_bytes)
}

fn extract_kid_from_untrusted_footer(footer_bytes: &[u8]) -> Result<KeyId, Error> {
    let footer_json: JsonValue = serde_json::from_slice(footer_bytes)
        .map_err(|_| Error::Token("invalid footer".into()))?;

    let kid = footer_json
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|kid| !kid.is_empty())
        .ok_or_else(|| Error::Token("missing footer claim: kid".into()))?;

    Ok(KeyId(kid.to_owned()))
}

fn extract_footer_from_token(token_str: &str) -> Result<Vec<u8>, Error> {
    if !token_str.starts_with(TOKEN_HEADER) {
        return Err(Error::Token("invalid token format".into()));
    }

    let parts: Vec<&str> = token_str.split('.').collect();
    if parts.len() != 4 || parts[2].is_empty() {
        return Err(Error::Token("invalid token format".into()));
    }

    let footer_b64 = parts[3];
    if footer_b64.is_empty() {
        return Err(Error::Token("missing footer".into()));
    }

    URL_SAFE_NO_PAD
        .decode(footer_b64)
        .map_err(|_| Error::Token("invalid footer".into()))
}

/// Current time as epoch milliseconds.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
