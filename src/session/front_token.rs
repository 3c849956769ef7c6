use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::Error;
use crate::types::UserId;

/// Client-readable projection of the session, sent in the `front-token`
/// response header.
///
/// Unsigned. Nothing on the server may use it to make an authorization
/// decision; [`decode`](FrontToken::decode) exists for clients and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontToken {
    pub user_id: UserId,
    /// Epoch milliseconds.
    pub expiry_of_access_token: u64,
    pub access_token_payload: Map<String, JsonValue>,
}

impl FrontToken {
    #[must_use]
    pub fn new(
        user_id: UserId,
        expiry_of_access_token: u64,
        access_token_payload: Map<String, JsonValue>,
    ) -> Self {
        Self {
            user_id,
            expiry_of_access_token,
            access_token_payload,
        }
    }

    /// Standard base64 of the JSON form.
    #[must_use]
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("front token is plain JSON data");
        STANDARD.encode(json)
    }

    /// # Errors
    ///
    /// Returns `Error::Token` if the value is not base64 JSON of the expected shape.
    pub fn decode(value: &str) -> Result<Self, Error> {
        let json = STANDARD
            .decode(value)
            .map_err(|e| Error::Token(format!("front token is not base64: {e}")))?;
        serde_json::from_slice(&json).map_err(|e| Error::Token(format!("invalid front token: {e}")))
    }
}
