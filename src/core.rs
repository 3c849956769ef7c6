//! HTTP client for the remote core that owns durable session state.
//!
//! Every response from the core carries a `"status"` discriminator; each
//! operation decodes it into its own enum so callers match exhaustively on
//! the outcomes that operation can actually produce.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use url::Url;

use crate::error::Error;
use crate::keys::KeySource;
use crate::types::{SessionHandle, UserId};
use crate::well_known::SigningKeysDocument;

const DEFAULT_TENANT: &str = "public";

/// Connection settings for the core.
///
/// ```rust,ignore
/// use core_session::CoreConfig;
///
/// let config = CoreConfig::new("http://localhost:3567".parse()?)
///     .with_api_key("secret");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CoreConfig {
    pub(crate) connection_uri: Url,
    pub(crate) api_key: Option<String>,
    pub(crate) tenant_id: String,
    pub(crate) timeout: Duration,
}

impl CoreConfig {
    #[must_use]
    pub fn new(connection_uri: Url) -> Self {
        Self {
            connection_uri,
            api_key: None,
            tenant_id: DEFAULT_TENANT.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `CORE_CONNECTION_URI`: base URL of the core
    ///
    /// # Optional env vars
    /// - `CORE_API_KEY`: sent as the `api-key` header
    /// - `CORE_TENANT_ID`: tenant prefix for session endpoints (default `public`)
    /// - `CORE_TIMEOUT_MS`: per-request timeout
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URI is missing or a value does not parse.
    pub fn from_env() -> Result<Self, Error> {
        let uri = std::env::var("CORE_CONNECTION_URI")
            .map_err(|_| Error::Config("CORE_CONNECTION_URI is required".into()))?;
        let uri: Url = uri
            .parse()
            .map_err(|e| Error::Config(format!("CORE_CONNECTION_URI: {e}")))?;

        let mut config = Self::new(uri);
        if let Ok(key) = std::env::var("CORE_API_KEY") {
            config = config.with_api_key(key);
        }
        if let Ok(tenant) = std::env::var("CORE_TENANT_ID") {
            config = config.with_tenant_id(tenant);
        }
        if let Ok(ms) = std::env::var("CORE_TIMEOUT_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|e| Error::Config(format!("CORE_TIMEOUT_MS: {e}")))?;
            config = config.with_timeout(Duration::from_millis(ms));
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn connection_uri(&self) -> &Url {
        &self.connection_uri
    }

    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

// ── Wire types ─────────────────────────────────────────────────────

/// Session identity as echoed by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreSession {
    pub handle: SessionHandle,
    pub user_id: UserId,
    #[serde(default, rename = "userDataInJWT")]
    pub user_data_in_jwt: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub token: String,
    /// Epoch milliseconds.
    pub expiry: u64,
    pub created_time: u64,
}

/// A freshly issued token pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedTokens {
    pub session: CoreSession,
    pub access_token: TokenInfo,
    pub refresh_token: TokenInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anti_csrf_token: Option<String>,
}

/// Durable view of a session, as stored by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInformation {
    pub session_handle: SessionHandle,
    pub user_id: UserId,
    #[serde(default)]
    pub session_data_in_database: Map<String, JsonValue>,
    #[serde(default)]
    pub access_token_payload: Map<String, JsonValue>,
    pub expiry: u64,
    pub time_created: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub user_id: UserId,
    #[serde(rename = "userDataInJWT")]
    pub user_data_in_jwt: Map<String, JsonValue>,
    pub user_data_in_database: Map<String, JsonValue>,
    pub enable_anti_csrf: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anti_csrf_token: Option<String>,
    pub use_dynamic_signing_key: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSessionRequest {
    pub refresh_token: String,
    pub enable_anti_csrf: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anti_csrf_token: Option<String>,
    pub use_dynamic_signing_key: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySessionRequest {
    pub access_token: String,
    pub enable_anti_csrf: bool,
    pub check_database: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
enum CreateResponse {
    Ok(IssuedTokens),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum RefreshOutcome {
    Ok(IssuedTokens),
    /// Unknown or expired refresh token.
    Unauthorised {
        #[serde(default)]
        message: String,
    },
    /// A refresh token that was already rotated away was presented again.
    TokenTheftDetected { session: StolenSession },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StolenSession {
    pub handle: SessionHandle,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum VerifyOutcome {
    Ok {
        session: CoreSession,
        /// Replacement token the core wants the client to use from now on.
        #[serde(default)]
        access_token: Option<TokenInfo>,
    },
    Unauthorised {
        #[serde(default)]
        message: String,
    },
    TryRefreshToken {
        #[serde(default)]
        message: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum RegenerateOutcome {
    Ok {
        session: CoreSession,
        #[serde(default)]
        access_token: Option<TokenInfo>,
    },
    Unauthorised {
        #[serde(default)]
        message: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
enum SessionInformationResponse {
    Ok(SessionInformation),
    Unauthorised,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
enum RevokeResponse {
    Ok { session_handles_revoked: Vec<SessionHandle> },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
enum HandlesResponse {
    Ok { session_handles: Vec<SessionHandle> },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
enum UpdateResponse {
    Ok {},
    Unauthorised,
}

// ── Client ─────────────────────────────────────────────────────────

/// Session store client for the core.
///
/// Holds one `reqwest::Client` for the life of the process; clone the
/// `CoreClient` (or wrap it in an `Arc`) to share the connection pool.
#[derive(Debug, Clone)]
pub struct CoreClient {
    config: CoreConfig,
    http: reqwest::Client,
}

impl CoreClient {
    /// Create a client with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(config: CoreConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Create a session for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure or [`Error::Core`] on a
    /// non-success response.
    pub async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<IssuedTokens, Error> {
        let url = self.tenant_url("/recipe/session")?;
        let CreateResponse::Ok(tokens) = self
            .send(self.http.post(url).json(request), "create session")
            .await?;
        Ok(tokens)
    }

    /// Rotate a refresh token into a new token pair.
    ///
    /// # Errors
    ///
    /// Transport and non-2xx failures only; rejection is an [`RefreshOutcome`] variant.
    pub async fn refresh_session(
        &self,
        request: &RefreshSessionRequest,
    ) -> Result<RefreshOutcome, Error> {
        self.send(
            self.http
                .post(self.tenant_url("/recipe/session/refresh")?)
                .json(request),
            "refresh session",
        )
        .await
    }

    /// Ask the core to verify an access token against its database.
    ///
    /// # Errors
    ///
    /// Transport and non-2xx failures only.
    pub async fn verify_session(
        &self,
        request: &VerifySessionRequest,
    ) -> Result<VerifyOutcome, Error> {
        self.send(
            self.http
                .post(self.tenant_url("/recipe/session/verify")?)
                .json(request),
            "verify session",
        )
        .await
    }

    /// Re-issue `access_token` with a new payload.
    ///
    /// # Errors
    ///
    /// Transport and non-2xx failures only.
    pub async fn regenerate_access_token(
        &self,
        access_token: &str,
        payload: &Map<String, JsonValue>,
    ) -> Result<RegenerateOutcome, Error> {
        let body = serde_json::json!({ "accessToken": access_token, "userDataInJWT": payload });
        self.send(
            self.http
                .post(self.tenant_url("/recipe/session/regenerate")?)
                .json(&body),
            "regenerate access token",
        )
        .await
    }

    /// Fetch the durable record of a session. `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Transport and non-2xx failures only.
    pub async fn get_session_information(
        &self,
        handle: &SessionHandle,
    ) -> Result<Option<SessionInformation>, Error> {
        let response: SessionInformationResponse = self
            .send(
                self.http
                    .get(self.tenant_url("/recipe/session")?)
                    .query(&[("sessionHandle", handle.as_str())]),
                "get session information",
            )
            .await?;
        Ok(match response {
            SessionInformationResponse::Ok(info) => Some(info),
            SessionInformationResponse::Unauthorised => None,
        })
    }

    /// Revoke the given sessions. Returns the handles the core actually removed.
    ///
    /// # Errors
    ///
    /// Transport and non-2xx failures only.
    pub async fn revoke_sessions(
        &self,
        handles: &[SessionHandle],
    ) -> Result<Vec<SessionHandle>, Error> {
        let body = serde_json::json!({ "sessionHandles": handles });
        let RevokeResponse::Ok { session_handles_revoked } = self
            .send(
                self.http
                    .post(self.tenant_url("/recipe/session/remove")?)
                    .json(&body),
                "revoke sessions",
            )
            .await?;
        Ok(session_handles_revoked)
    }

    /// Revoke every session of `user_id`.
    ///
    /// # Errors
    ///
    /// Transport and non-2xx failures only.
    pub async fn revoke_all_sessions_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionHandle>, Error> {
        let body = serde_json::json!({ "userId": user_id });
        let RevokeResponse::Ok { session_handles_revoked } = self
            .send(
                self.http
                    .post(self.tenant_url("/recipe/session/remove")?)
                    .json(&body),
                "revoke user sessions",
            )
            .await?;
        Ok(session_handles_revoked)
    }

    /// List the handles of every live session of `user_id`.
    ///
    /// # Errors
    ///
    /// Transport and non-2xx failures only.
    pub async fn get_all_session_handles_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionHandle>, Error> {
        let HandlesResponse::Ok { session_handles } = self
            .send(
                self.http
                    .get(self.tenant_url("/recipe/session/user")?)
                    .query(&[("userId", user_id.as_str())]),
                "list user sessions",
            )
            .await?;
        Ok(session_handles)
    }

    /// Replace the server-side data of a session. `false` if the session is gone.
    ///
    /// # Errors
    ///
    /// Transport and non-2xx failures only.
    pub async fn update_session_data_in_database(
        &self,
        handle: &SessionHandle,
        data: &Map<String, JsonValue>,
    ) -> Result<bool, Error> {
        let body = serde_json::json!({ "sessionHandle": handle, "userDataInDatabase": data });
        let response: UpdateResponse = self
            .send(
                self.http
                    .put(self.tenant_url("/recipe/session/data")?)
                    .json(&body),
                "update session data",
            )
            .await?;
        Ok(matches!(response, UpdateResponse::Ok {}))
    }

    /// Replace the access token payload stored for a session. Tokens already
    /// issued keep their payload until the next refresh.
    ///
    /// # Errors
    ///
    /// Transport and non-2xx failures only.
    pub async fn update_access_token_payload(
        &self,
        handle: &SessionHandle,
        payload: &Map<String, JsonValue>,
    ) -> Result<bool, Error> {
        let body = serde_json::json!({ "sessionHandle": handle, "userDataInJWT": payload });
        let response: UpdateResponse = self
            .send(
                self.http
                    .put(self.tenant_url("/recipe/session/jwt/data")?)
                    .json(&body),
                "update access token payload",
            )
            .await?;
        Ok(matches!(response, UpdateResponse::Ok {}))
    }

    fn tenant_url(&self, path: &str) -> Result<Url, Error> {
        if self.config.tenant_id == DEFAULT_TENANT {
            self.url(path)
        } else {
            self.url(&format!("/{}{path}", self.config.tenant_id))
        }
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.config.connection_uri.as_str().trim_end_matches('/');
        format!("{base}{path}")
            .parse()
            .map_err(|e| Error::Config(format!("core URL for {path}: {e}")))
    }

    async fn send<R: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        operation: &'static str,
    ) -> Result<R, Error> {
        let request = match &self.config.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        };
        let response = request.send().await?;
        let response = Self::ensure_success(response, operation).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| Error::Core {
            operation,
            status: None,
            detail: format!("unexpected response body: {e}"),
        })
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Core {
            operation,
            status: Some(status),
            detail: body,
        })
    }
}

#[async_trait]
impl KeySource for CoreClient {
    async fn fetch_signing_keys(&self) -> Result<SigningKeysDocument, Error> {
        self.send(self.http.get(self.url("/recipe/session/keys")?), "fetch signing keys")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(tenant: &str) -> CoreClient {
        CoreClient::new(
            CoreConfig::new("http://core.local:3567/".parse().unwrap()).with_tenant_id(tenant),
        )
        .unwrap()
    }

    #[test]
    fn public_tenant_is_not_prefixed() {
        let url = client("public").tenant_url("/recipe/session").unwrap();
        assert_eq!(url.as_str(), "http://core.local:3567/recipe/session");
    }

    #[test]
    fn other_tenants_are_prefixed() {
        let url = client("acme").tenant_url("/recipe/session/refresh").unwrap();
        assert_eq!(url.as_str(), "http://core.local:3567/acme/recipe/session/refresh");
    }

    #[test]
    fn key_endpoint_is_never_tenant_prefixed() {
        let url = client("acme").url("/recipe/session/keys").unwrap();
        assert_eq!(url.as_str(), "http://core.local:3567/recipe/session/keys");
    }

    #[test]
    fn refresh_outcome_decodes_each_status() {
        let ok: RefreshOutcome = serde_json::from_value(serde_json::json!({
            "status": "OK",
            "session": { "handle": "h", "userId": "u", "userDataInJWT": { "a": 1 } },
            "accessToken": { "token": "at", "expiry": 10, "createdTime": 1 },
            "refreshToken": { "token": "rt", "expiry": 20, "createdTime": 1 },
            "antiCsrfToken": "csrf"
        }))
        .unwrap();
        let RefreshOutcome::Ok(tokens) = ok else {
            panic!("expected OK");
        };
        assert_eq!(tokens.session.handle, SessionHandle::from("h"));
        assert_eq!(tokens.anti_csrf_token.as_deref(), Some("csrf"));

        let rejected: RefreshOutcome =
            serde_json::from_value(serde_json::json!({ "status": "UNAUTHORISED", "message": "x" }))
                .unwrap();
        assert!(matches!(rejected, RefreshOutcome::Unauthorised { .. }));

        let theft: RefreshOutcome = serde_json::from_value(serde_json::json!({
            "status": "TOKEN_THEFT_DETECTED",
            "session": { "handle": "h", "userId": "u" }
        }))
        .unwrap();
        assert!(matches!(theft, RefreshOutcome::TokenTheftDetected { .. }));
    }

    #[test]
    fn verify_outcome_decodes_try_refresh() {
        let outcome: VerifyOutcome =
            serde_json::from_value(serde_json::json!({ "status": "TRY_REFRESH_TOKEN" })).unwrap();
        assert!(matches!(outcome, VerifyOutcome::TryRefreshToken { .. }));
    }

    #[test]
    fn unknown_status_is_a_decode_error() {
        let outcome: Result<RefreshOutcome, _> =
            serde_json::from_value(serde_json::json!({ "status": "SOMETHING_ELSE" }));
        assert!(outcome.is_err());
    }

    #[test]
    fn create_request_uses_core_field_names() {
        let request = CreateSessionRequest {
            user_id: UserId::from("u1"),
            user_data_in_jwt: Map::new(),
            user_data_in_database: Map::new(),
            enable_anti_csrf: true,
            anti_csrf_token: Some("t".into()),
            use_dynamic_signing_key: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["userId"], "u1");
        assert!(json.get("userDataInJWT").is_some());
        assert_eq!(json["enableAntiCsrf"], true);
        assert_eq!(json["antiCsrfToken"], "t");
    }
}
