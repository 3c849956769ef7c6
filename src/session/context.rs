use std::sync::Arc;

use axum::http::HeaderMap;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde_json::{Map, Value as JsonValue};

use super::config::{SessionConfig, SessionSettings};
use super::csrf;
use super::error::SessionError;
use super::recipe::{CoreRecipe, NewSession, SessionRecipe};
use super::response::ResponseTokens;
use super::types::{Session, VerifyOptions};
use super::{refresh, transport, verify};
use crate::core::{CoreClient, SessionInformation};
use crate::error::Error;
use crate::keys::{KeyCache, KeySource};
use crate::types::{SessionHandle, UserId};

/// Concurrent core lookups per fan-out operation.
const FAN_OUT: usize = 8;

/// Entry point of the session subsystem.
///
/// Build once at startup and share it as axum state; clones are cheap.
///
/// ```rust,ignore
/// let ctx = SessionContext::new(SessionConfig::from_env()?)?;
///
/// let app = Router::new()
///     .route("/me", get(me))
///     .route_layer(middleware::from_fn_with_state(ctx.clone(), require_session))
///     .merge(session_routes(ctx.clone()));
/// ```
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<Inner>,
}

struct Inner {
    recipe: Arc<dyn SessionRecipe>,
    settings: Arc<SessionSettings>,
}

impl SessionContext {
    /// Build the core client, signing key cache and recipe from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for inconsistent settings or [`Error::Http`]
    /// if the HTTP client cannot be built.
    pub fn new(config: SessionConfig) -> Result<Self, Error> {
        let SessionConfig {
            core,
            settings,
            recipe_override,
        } = config;
        settings.validate()?;

        let core = Arc::new(CoreClient::new(core)?);
        let source: Arc<dyn KeySource> = core.clone();
        let keys = Arc::new(KeyCache::new(source, settings.max_key_cache_ttl));
        let mut recipe: Arc<dyn SessionRecipe> =
            Arc::new(CoreRecipe::new(core, keys, settings.use_dynamic_signing_key));
        if let Some(wrap) = recipe_override {
            recipe = wrap(recipe);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                recipe,
                settings: Arc::new(settings),
            }),
        })
    }

    /// Recipe implementation in use, after overrides.
    #[must_use]
    pub fn recipe(&self) -> &Arc<dyn SessionRecipe> {
        &self.inner.recipe
    }

    #[must_use]
    pub fn api_base_path(&self) -> &str {
        &self.inner.settings.api_base_path
    }

    /// Create a session for `user_id` and write its tokens into `sink`.
    ///
    /// The transport is chosen by the transfer method hook. For cookie
    /// transport with anti-CSRF tokens enabled, a fresh token is embedded and
    /// returned in the `anti-csrf` header.
    ///
    /// # Errors
    ///
    /// [`SessionError::BadInput`] for an empty user id,
    /// [`SessionError::Core`] if the core fails.
    pub async fn create_new_session(
        &self,
        headers: &HeaderMap,
        sink: &mut ResponseTokens,
        user_id: UserId,
        access_token_payload: Map<String, JsonValue>,
        session_data_in_database: Map<String, JsonValue>,
    ) -> Result<Session, SessionError> {
        if user_id.as_str().is_empty() {
            return Err(SessionError::BadInput("user id must not be empty".into()));
        }

        let settings = &self.inner.settings;
        let method = transport::creation_method((settings.transfer_method)(headers, true));
        let anti_csrf_token = csrf::issue_token(settings.anti_csrf(), method);
        let enable_anti_csrf = anti_csrf_token.is_some();

        let input = NewSession {
            user_id,
            access_token_payload,
            session_data_in_database,
            anti_csrf_token: anti_csrf_token.clone(),
        };
        let tokens = self.inner.recipe.create_new_session(input, enable_anti_csrf).await?;

        let anti_csrf = tokens.anti_csrf_token.clone().or(anti_csrf_token);
        let mut pending = ResponseTokens::new();
        transport::set_issued_tokens(
            settings,
            headers,
            &mut pending,
            &tokens,
            method,
            anti_csrf.as_deref(),
        );
        sink.extend(pending);

        tracing::info!(
            session_handle = %tokens.session.handle,
            user_id = %tokens.session.user_id,
            channel = %method,
            "Session created"
        );
        Ok(Session::from_issued(
            Arc::clone(&self.inner.recipe),
            Arc::clone(settings),
            tokens,
            method,
        ))
    }

    /// Verify the session a request presents.
    ///
    /// `Ok(None)` only when the request carries no access token and
    /// `options` does not require a session.
    pub async fn get_session(
        &self,
        headers: &HeaderMap,
        sink: &mut ResponseTokens,
        options: &VerifyOptions,
    ) -> Result<Option<Session>, SessionError> {
        verify::get_session(&self.inner.recipe, &self.inner.settings, headers, sink, options).await
    }

    /// Rotate the refresh token a request presents and write the new pair
    /// into `sink`.
    pub async fn refresh_session(
        &self,
        headers: &HeaderMap,
        sink: &mut ResponseTokens,
    ) -> Result<Session, SessionError> {
        refresh::refresh_session(&self.inner.recipe, &self.inner.settings, headers, sink).await
    }

    /// Revoke a session by handle. Returns whether it existed.
    ///
    /// Tokens already issued stay cryptographically valid until they expire;
    /// verification with `check_database` rejects them immediately.
    pub async fn revoke_session(&self, handle: &SessionHandle) -> Result<bool, Error> {
        let revoked = self.inner.recipe.revoke_session(handle).await?;
        tracing::info!(session_handle = %handle, revoked, "Session revoked");
        Ok(revoked)
    }

    pub async fn revoke_multiple_sessions(
        &self,
        handles: &[SessionHandle],
    ) -> Result<Vec<SessionHandle>, Error> {
        let revoked = self.inner.recipe.revoke_multiple_sessions(handles).await?;
        tracing::info!(requested = handles.len(), revoked = revoked.len(), "Sessions revoked");
        Ok(revoked)
    }

    pub async fn revoke_all_sessions_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionHandle>, Error> {
        let revoked = self.inner.recipe.revoke_all_sessions_for_user(user_id).await?;
        tracing::info!(user_id = %user_id, revoked = revoked.len(), "All sessions of user revoked");
        Ok(revoked)
    }

    pub async fn get_all_session_handles_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionHandle>, Error> {
        self.inner.recipe.get_all_session_handles_for_user(user_id).await
    }

    /// `None` if the core does not know `handle`.
    pub async fn get_session_information(
        &self,
        handle: &SessionHandle,
    ) -> Result<Option<SessionInformation>, Error> {
        self.inner.recipe.get_session_information(handle).await
    }

    /// Information on every live session of `user_id`, in the order the
    /// core lists their handles. Sessions that disappear mid-way are skipped.
    pub async fn get_all_session_information_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SessionInformation>, Error> {
        let handles = self.inner.recipe.get_all_session_handles_for_user(user_id).await?;
        let recipe = &self.inner.recipe;
        let found: Vec<Option<SessionInformation>> = stream::iter(&handles)
            .map(|handle| recipe.get_session_information(handle))
            .buffered(FAN_OUT)
            .try_collect()
            .await?;
        Ok(found.into_iter().flatten().collect())
    }

    /// Replace the server-side data of a session. Returns whether it existed.
    pub async fn update_session_data_in_database(
        &self,
        handle: &SessionHandle,
        data: &Map<String, JsonValue>,
    ) -> Result<bool, Error> {
        self.inner.recipe.update_session_data_in_database(handle, data).await
    }

    /// Merge `updates` into the stored payload of a session outside of a
    /// request. Clients see the change on their next refresh.
    pub async fn merge_into_access_token_payload_by_handle(
        &self,
        handle: &SessionHandle,
        updates: Map<String, JsonValue>,
    ) -> Result<bool, Error> {
        self.inner.recipe.merge_into_access_token_payload(handle, updates).await
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("api_base_path", &self.inner.settings.api_base_path)
            .finish_non_exhaustive()
    }
}
