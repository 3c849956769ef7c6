use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};

use super::claims::merge_payload;
use crate::core::{
    CoreClient, CreateSessionRequest, IssuedTokens, RefreshOutcome, RefreshSessionRequest,
    RegenerateOutcome, SessionInformation, VerifyOutcome, VerifySessionRequest,
};
use crate::error::Error;
use crate::keys::KeyCache;
use crate::token::{AccessToken, extract_kid_from_token, now_ms, verify_access_token};
use crate::types::{SessionHandle, UserId};

/// Input of [`SessionRecipe::create_new_session`].
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: UserId,
    pub access_token_payload: Map<String, JsonValue>,
    pub session_data_in_database: Map<String, JsonValue>,
    /// Anti-CSRF token to embed, when the transport needs one.
    pub anti_csrf_token: Option<String>,
}

/// Result of checking an access token locally.
#[derive(Debug, Clone)]
pub enum TokenVerdict {
    Valid(AccessToken),
    /// Signature is good but the token is past its expiry.
    Expired(AccessToken),
    /// Can never be salvaged: bad signature, unknown key, wrong shape.
    Invalid(String),
}

/// Session operations, as an overridable strategy.
///
/// [`CoreRecipe`] is the default. Wrap it through
/// [`SessionConfig::with_override`](super::SessionConfig::with_override) to
/// decorate individual operations:
///
/// ```rust,ignore
/// struct Audited(Arc<dyn SessionRecipe>);
///
/// #[async_trait]
/// impl SessionRecipe for Audited {
///     async fn revoke_session(&self, handle: &SessionHandle) -> Result<bool, Error> {
///         tracing::info!(%handle, "revoking");
///         self.0.revoke_session(handle).await
///     }
///     // ...delegate the rest to self.0
/// }
///
/// let config = SessionConfig::from_env()?
///     .with_override(|original| Arc::new(Audited(original)));
/// ```
#[async_trait]
pub trait SessionRecipe: Send + Sync {
    async fn create_new_session(
        &self,
        input: NewSession,
        enable_anti_csrf: bool,
    ) -> Result<IssuedTokens, Error>;

    /// Check signature and expiry of `access_token` without calling the core
    /// (except to fetch signing keys).
    async fn verify_access_token(&self, access_token: &str) -> Result<TokenVerdict, Error>;

    /// Let the core confirm the session still exists.
    async fn verify_with_core(
        &self,
        access_token: &str,
        enable_anti_csrf: bool,
    ) -> Result<VerifyOutcome, Error>;

    async fn refresh_session(
        &self,
        refresh_token: &str,
        anti_csrf_token: Option<String>,
        enable_anti_csrf: bool,
    ) -> Result<RefreshOutcome, Error>;

    async fn regenerate_access_token(
        &self,
        access_token: &str,
        payload: &Map<String, JsonValue>,
    ) -> Result<RegenerateOutcome, Error>;

    async fn revoke_session(&self, handle: &SessionHandle) -> Result<bool, Error>;

    async fn revoke_multiple_sessions(
        &self,
        handles: &[SessionHandle],
    ) -> Result<Vec<SessionHandle>, Error>;

    async fn revoke_all_sessions_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionHandle>, Error>;

    async fn get_all_session_handles_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionHandle>, Error>;

    async fn get_session_information(
        &self,
        handle: &SessionHandle,
    ) -> Result<Option<SessionInformation>, Error>;

    async fn update_session_data_in_database(
        &self,
        handle: &SessionHandle,
        data: &Map<String, JsonValue>,
    ) -> Result<bool, Error>;

    /// Merge `updates` into the stored payload of `handle`. Issued tokens
    /// keep their payload until the next refresh.
    async fn merge_into_access_token_payload(
        &self,
        handle: &SessionHandle,
        updates: Map<String, JsonValue>,
    ) -> Result<bool, Error>;
}

/// Default recipe: every durable operation goes to the core; access tokens
/// are verified locally with cached signing keys.
pub struct CoreRecipe {
    core: Arc<CoreClient>,
    keys: Arc<KeyCache>,
    use_dynamic_signing_key: bool,
}

impl CoreRecipe {
    #[must_use]
    pub fn new(core: Arc<CoreClient>, keys: Arc<KeyCache>, use_dynamic_signing_key: bool) -> Self {
        Self {
            core,
            keys,
            use_dynamic_signing_key,
        }
    }
}

#[async_trait]
impl SessionRecipe for CoreRecipe {
    async fn create_new_session(
        &self,
        input: NewSession,
        enable_anti_csrf: bool,
    ) -> Result<IssuedTokens, Error> {
        let request = CreateSessionRequest {
            user_id: input.user_id,
            user_data_in_jwt: input.access_token_payload,
            user_data_in_database: input.session_data_in_database,
            enable_anti_csrf,
            anti_csrf_token: input.anti_csrf_token,
            use_dynamic_signing_key: self.use_dynamic_signing_key,
        };
        self.core.create_session(&request).await
    }

    async fn verify_access_token(&self, access_token: &str) -> Result<TokenVerdict, Error> {
        let kid = match extract_kid_from_token(access_token) {
            Ok(kid) => kid,
            Err(e) => return Ok(TokenVerdict::Invalid(e.to_string())),
        };
        let Some(key) = self.keys.get_key(&kid).await? else {
            return Ok(TokenVerdict::Invalid(format!("unknown signing key: {kid}")));
        };
        let token = match verify_access_token(&key, access_token) {
            Ok(token) => token,
            Err(e) => return Ok(TokenVerdict::Invalid(e.to_string())),
        };
        if token.is_expired_at(now_ms()) {
            Ok(TokenVerdict::Expired(token))
        } else {
            Ok(TokenVerdict::Valid(token))
        }
    }

    async fn verify_with_core(
        &self,
        access_token: &str,
        enable_anti_csrf: bool,
    ) -> Result<VerifyOutcome, Error> {
        let request = VerifySessionRequest {
            access_token: access_token.to_string(),
            enable_anti_csrf,
            check_database: true,
        };
        self.core.verify_session(&request).await
    }

    async fn refresh_session(
        &self,
        refresh_token: &str,
        anti_csrf_token: Option<String>,
        enable_anti_csrf: bool,
    ) -> Result<RefreshOutcome, Error> {
        let request = RefreshSessionRequest {
            refresh_token: refresh_token.to_string(),
            enable_anti_csrf,
            anti_csrf_token,
            use_dynamic_signing_key: self.use_dynamic_signing_key,
        };
        self.core.refresh_session(&request).await
    }

    async fn regenerate_access_token(
        &self,
        access_token: &str,
        payload: &Map<String, JsonValue>,
    ) -> Result<RegenerateOutcome, Error> {
        self.core.regenerate_access_token(access_token, payload).await
    }

    async fn revoke_session(&self, handle: &SessionHandle) -> Result<bool, Error> {
        let revoked = self.core.revoke_sessions(std::slice::from_ref(handle)).await?;
        Ok(revoked.contains(handle))
    }

    async fn revoke_multiple_sessions(
        &self,
        handles: &[SessionHandle],
    ) -> Result<Vec<SessionHandle>, Error> {
        self.core.revoke_sessions(handles).await
    }

    async fn revoke_all_sessions_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionHandle>, Error> {
        self.core.revoke_all_sessions_for_user(user_id).await
    }

    async fn get_all_session_handles_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionHandle>, Error> {
        self.core.get_all_session_handles_for_user(user_id).await
    }

    async fn get_session_information(
        &self,
        handle: &SessionHandle,
    ) -> Result<Option<SessionInformation>, Error> {
        self.core.get_session_information(handle).await
    }

    async fn update_session_data_in_database(
        &self,
        handle: &SessionHandle,
        data: &Map<String, JsonValue>,
    ) -> Result<bool, Error> {
        self.core.update_session_data_in_database(handle, data).await
    }

    async fn merge_into_access_token_payload(
        &self,
        handle: &SessionHandle,
        updates: Map<String, JsonValue>,
    ) -> Result<bool, Error> {
        let Some(info) = self.core.get_session_information(handle).await? else {
            return Ok(false);
        };
        let merged = merge_payload(&info.access_token_payload, updates);
        if merged == info.access_token_payload {
            return Ok(true);
        }
        self.core.update_access_token_payload(handle, &merged).await
    }
}
