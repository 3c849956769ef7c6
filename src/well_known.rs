use serde::{Deserialize, Serialize};

/// Signing keys published by the core for access token verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct SigningKeysDocument {
    pub issuer: String,
    pub version: String,
    pub keys: Vec<SigningKey>,
    pub cache_ttl_seconds: u64,
}

impl SigningKeysDocument {
    #[must_use]
    pub fn new(issuer: impl Into<String>, keys: Vec<SigningKey>, cache_ttl_seconds: u64) -> Self {
        Self {
            issuer: issuer.into(),
            version: "v4".into(),
            keys,
            cache_ttl_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct SigningKey {
    pub kid: String,
    pub public_key_hex: String,
    pub status: KeyStatus,
    pub created_at: String,
}

impl SigningKey {
    #[must_use]
    pub fn new(
        kid: impl Into<String>,
        public_key_hex: impl Into<String>,
        status: KeyStatus,
    ) -> Self {
        Self {
            kid: kid.into(),
            public_key_hex: public_key_hex.into(),
            status,
            created_at: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum KeyStatus {
    Active,
    Retiring,
    Revoked,
}

impl KeyStatus {
    /// Active and retiring keys still verify tokens; revoked keys never do.
    #[must_use]
    pub fn verifies(self) -> bool {
        matches!(self, Self::Active | Self::Retiring)
    }
}
