use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Opaque session identifier assigned by the core.
///
/// Stable across refreshes until the core decides to rotate it.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct SessionHandle(pub String);

impl SessionHandle {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionHandle {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Application user identifier (opaque string owned by the core).
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Signing key identifier, carried in the access token footer.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct KeyId(pub String);

/// Channel used to carry session tokens for one request.
///
/// Decided per request by the configured hook; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMethod {
    Header,
    Cookie,
    Any,
}

impl TransferMethod {
    /// The channel that is not `self`. `Any` has no opposite.
    #[must_use]
    pub fn other(self) -> Option<Self> {
        match self {
            Self::Header => Some(Self::Cookie),
            Self::Cookie => Some(Self::Header),
            Self::Any => None,
        }
    }
}

impl std::fmt::Display for TransferMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Header => "header",
            Self::Cookie => "cookie",
            Self::Any => "any",
        })
    }
}

impl std::str::FromStr for TransferMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "header" => Ok(Self::Header),
            "cookie" => Ok(Self::Cookie),
            "any" => Ok(Self::Any),
            other => Err(Error::InvalidTransferMethod(other.to_owned())),
        }
    }
}

/// Which token of the pair a transport operation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Access,
    Refresh,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_method_parses_case_insensitively() {
        assert_eq!("Header".parse::<TransferMethod>().unwrap(), TransferMethod::Header);
        assert_eq!(" cookie ".parse::<TransferMethod>().unwrap(), TransferMethod::Cookie);
        assert_eq!("ANY".parse::<TransferMethod>().unwrap(), TransferMethod::Any);
        assert!("bearer".parse::<TransferMethod>().is_err());
    }

    #[test]
    fn transfer_method_other_channel() {
        assert_eq!(TransferMethod::Header.other(), Some(TransferMethod::Cookie));
        assert_eq!(TransferMethod::Cookie.other(), Some(TransferMethod::Header));
        assert_eq!(TransferMethod::Any.other(), None);
    }

    #[test]
    fn session_handle_serde_is_transparent() {
        let handle = SessionHandle::from("h-1");
        let json = serde_json::to_string(&handle).unwrap();
        assert_eq!(json, "\"h-1\"");
        let parsed: SessionHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, handle);
    }

    #[test]
    fn newtypes_prevent_mixing() {
        fn takes_user_id(_: &UserId) {}
        fn takes_handle(_: &SessionHandle) {}

        let user = UserId::from("id");
        let handle = SessionHandle::from("id");

        takes_user_id(&user);
        takes_handle(&handle);
        // takes_user_id(&handle);  // Compile error!
    }
}
