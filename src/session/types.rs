use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use super::claims::{self, ClaimValidator, SessionClaim};
use super::config::SessionSettings;
use super::error::SessionError;
use super::recipe::SessionRecipe;
use super::response::ResponseTokens;
use super::transport;
use crate::core::{IssuedTokens, RegenerateOutcome};
use crate::token::{AccessTokenClaims, now_ms};
use crate::types::{SessionHandle, TokenType, TransferMethod, UserId};

/// A verified session, valid for the request it was obtained in.
///
/// Obtained from [`SessionContext::get_session`](super::SessionContext::get_session)
/// or, in handlers behind [`require_session`](super::require_session), as an
/// extractor:
///
/// ```rust,ignore
/// async fn me(session: Session) -> String {
///     format!("Hello, {}", session.user_id())
/// }
/// ```
#[derive(Clone)]
pub struct Session {
    recipe: Arc<dyn SessionRecipe>,
    settings: Arc<SessionSettings>,
    handle: SessionHandle,
    user_id: UserId,
    payload: Map<String, JsonValue>,
    access_token: String,
    expiry: u64,
    time_created: u64,
    transfer_method: TransferMethod,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("user_id", &self.user_id)
            .field("expiry", &self.expiry)
            .field("transfer_method", &self.transfer_method)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn from_claims(
        recipe: Arc<dyn SessionRecipe>,
        settings: Arc<SessionSettings>,
        access_token: String,
        claims: AccessTokenClaims,
        transfer_method: TransferMethod,
    ) -> Self {
        Self {
            recipe,
            settings,
            handle: claims.session_handle,
            user_id: claims.user_id,
            payload: claims.user_data,
            access_token,
            expiry: claims.expiry_time,
            time_created: claims.time_created,
            transfer_method,
        }
    }

    pub(crate) fn from_issued(
        recipe: Arc<dyn SessionRecipe>,
        settings: Arc<SessionSettings>,
        tokens: IssuedTokens,
        transfer_method: TransferMethod,
    ) -> Self {
        Self {
            recipe,
            settings,
            handle: tokens.session.handle,
            user_id: tokens.session.user_id,
            payload: tokens.session.user_data_in_jwt,
            access_token: tokens.access_token.token,
            expiry: tokens.access_token.expiry,
            time_created: tokens.access_token.created_time,
            transfer_method,
        }
    }

    #[must_use]
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn access_token_payload(&self) -> &Map<String, JsonValue> {
        &self.payload
    }

    /// Raw access token the session currently uses.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Access token expiry, epoch milliseconds.
    #[must_use]
    pub fn expiry(&self) -> u64 {
        self.expiry
    }

    #[must_use]
    pub fn time_created(&self) -> u64 {
        self.time_created
    }

    /// Channel the session's tokens travel on for this request.
    #[must_use]
    pub fn transfer_method(&self) -> TransferMethod {
        self.transfer_method
    }

    /// Shallow-merge `updates` into the access token payload (`null` deletes
    /// a key) and re-issue the access token.
    ///
    /// Nothing is issued when the merge leaves the payload unchanged.
    ///
    /// # Errors
    ///
    /// [`SessionError::Unauthorised`] if the core no longer knows the
    /// session; tokens are cleared in `sink`.
    pub async fn merge_into_access_token_payload(
        &mut self,
        sink: &mut ResponseTokens,
        updates: Map<String, JsonValue>,
    ) -> Result<(), SessionError> {
        let merged = claims::merge_payload(&self.payload, updates);
        if merged == self.payload {
            return Ok(());
        }

        match self.recipe.regenerate_access_token(&self.access_token, &merged).await? {
            RegenerateOutcome::Ok { session, access_token } => {
                self.payload = session.user_data_in_jwt;
                if let Some(info) = access_token {
                    transport::set_token(
                        &self.settings,
                        sink,
                        TokenType::Access,
                        &info.token,
                        info.expiry,
                        self.transfer_method,
                    );
                    self.access_token = info.token;
                    self.expiry = info.expiry;
                }
                transport::set_front_token(sink, &self.user_id, self.expiry, &self.payload);
                Ok(())
            }
            RegenerateOutcome::Unauthorised { message } => {
                transport::clear_all(&self.settings, sink);
                Err(SessionError::unauthorised(message, true))
            }
        }
    }

    /// Revoke this session at the core and clear its tokens.
    pub async fn revoke_session(&self, sink: &mut ResponseTokens) -> Result<(), SessionError> {
        let revoked = self.recipe.revoke_session(&self.handle).await?;
        transport::clear_all(&self.settings, sink);
        tracing::info!(
            session_handle = %self.handle,
            user_id = %self.user_id,
            revoked,
            "Session revoked"
        );
        Ok(())
    }

    /// Server-side data of the session. Never sent to the client.
    pub async fn get_session_data_in_database(
        &self,
    ) -> Result<Map<String, JsonValue>, SessionError> {
        self.recipe
            .get_session_information(&self.handle)
            .await?
            .map(|info| info.session_data_in_database)
            .ok_or_else(|| SessionError::unauthorised("session does not exist anymore", false))
    }

    /// Replace the server-side data of the session.
    pub async fn update_session_data_in_database(
        &self,
        data: &Map<String, JsonValue>,
    ) -> Result<(), SessionError> {
        if self.recipe.update_session_data_in_database(&self.handle, data).await? {
            Ok(())
        } else {
            Err(SessionError::unauthorised("session does not exist anymore", false))
        }
    }

    // ── Claims ─────────────────────────────────────────────────────

    /// Fetch `claim` from its source and cache it in the payload.
    pub async fn fetch_and_set_claim(
        &mut self,
        sink: &mut ResponseTokens,
        claim: &dyn SessionClaim,
    ) -> Result<(), SessionError> {
        match claim.fetch_value(&self.user_id).await? {
            Some(value) => self.set_claim_value(sink, claim, value).await,
            None => Ok(()),
        }
    }

    pub async fn set_claim_value(
        &mut self,
        sink: &mut ResponseTokens,
        claim: &dyn SessionClaim,
        value: JsonValue,
    ) -> Result<(), SessionError> {
        let mut update = Map::new();
        update.insert(claim.key().to_string(), claims::claim_entry(value, now_ms()));
        self.merge_into_access_token_payload(sink, update).await
    }

    #[must_use]
    pub fn get_claim_value(&self, claim: &dyn SessionClaim) -> Option<JsonValue> {
        claims::read_claim(&self.payload, claim.key()).map(|(value, _)| value.clone())
    }

    pub async fn remove_claim(
        &mut self,
        sink: &mut ResponseTokens,
        claim: &dyn SessionClaim,
    ) -> Result<(), SessionError> {
        let mut update = Map::new();
        update.insert(claim.key().to_string(), JsonValue::Null);
        self.merge_into_access_token_payload(sink, update).await
    }

    /// Validate the session against `validators`, refetching stale claims.
    ///
    /// # Errors
    ///
    /// [`SessionError::TryRefreshToken`] if a value is still missing or stale,
    /// [`SessionError::Unauthorised`] if a value is wrong.
    pub async fn assert_claims(
        &mut self,
        sink: &mut ResponseTokens,
        validators: &[Arc<dyn ClaimValidator>],
    ) -> Result<(), SessionError> {
        claims::validate_claims(self, sink, validators).await
    }
}

/// Options of a session verification.
#[derive(Clone)]
pub struct VerifyOptions {
    pub(crate) session_required: bool,
    pub(crate) check_database: bool,
    pub(crate) claim_validators: Vec<Arc<dyn ClaimValidator>>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self::required()
    }
}

impl VerifyOptions {
    /// A request without session tokens is rejected.
    #[must_use]
    pub fn required() -> Self {
        Self {
            session_required: true,
            check_database: false,
            claim_validators: Vec::new(),
        }
    }

    /// A request without session tokens yields no session.
    #[must_use]
    pub fn optional() -> Self {
        Self {
            session_required: false,
            ..Self::required()
        }
    }

    /// Also ask the core whether the session still exists.
    #[must_use]
    pub fn with_check_database(mut self, check: bool) -> Self {
        self.check_database = check;
        self
    }

    #[must_use]
    pub fn with_claim_validator(mut self, validator: impl ClaimValidator + 'static) -> Self {
        self.claim_validators.push(Arc::new(validator));
        self
    }
}

impl std::fmt::Debug for VerifyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let validators: Vec<&str> = self.claim_validators.iter().map(|v| v.id()).collect();
        f.debug_struct("VerifyOptions")
            .field("session_required", &self.session_required)
            .field("check_database", &self.check_database)
            .field("claim_validators", &validators)
            .finish()
    }
}
