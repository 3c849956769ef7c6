//! Session-bound claims cached in the access token payload.
//!
//! A claim value lives under its key as `{"v": <value>, "t": <epoch ms>}`,
//! where `t` is when the value was fetched. Validators decide whether the
//! cached value is still fresh enough and whether it satisfies a condition.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value as JsonValue};

use super::error::SessionError;
use super::response::ResponseTokens;
use super::types::Session;
use crate::error::Error;
use crate::token::now_ms;
use crate::types::UserId;

const VALUE_FIELD: &str = "v";
const FETCHED_AT_FIELD: &str = "t";

/// Verdict of a [`ClaimValidator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimVerdict {
    Valid,
    /// The cached value is missing or stale; a refresh may fix it.
    MustRefresh(String),
    /// The value is present and fresh but does not satisfy the validator.
    Invalid(String),
}

/// A value bound to a session and cached in its access token payload.
#[async_trait]
pub trait SessionClaim: Send + Sync {
    /// Payload key the value is stored under.
    fn key(&self) -> &str;

    /// Fetch the current value from its source. `None` leaves the payload
    /// untouched.
    async fn fetch_value(&self, user_id: &UserId) -> Result<Option<JsonValue>, Error>;
}

pub trait ClaimValidator: Send + Sync {
    fn id(&self) -> &str;

    /// Claim to refetch when [`should_refetch`](Self::should_refetch) says so.
    fn claim(&self) -> Option<Arc<dyn SessionClaim>>;

    fn should_refetch(&self, payload: &Map<String, JsonValue>, now_ms: u64) -> bool;

    fn validate(&self, payload: &Map<String, JsonValue>, now_ms: u64) -> ClaimVerdict;
}

/// Shallow merge of `updates` into `current`. A `null` update removes the key.
#[must_use]
pub fn merge_payload(
    current: &Map<String, JsonValue>,
    updates: Map<String, JsonValue>,
) -> Map<String, JsonValue> {
    let mut merged = current.clone();
    for (key, value) in updates {
        if value.is_null() {
            merged.remove(&key);
        } else {
            merged.insert(key, value);
        }
    }
    merged
}

pub(crate) fn claim_entry(value: JsonValue, fetched_at: u64) -> JsonValue {
    let mut entry = Map::new();
    entry.insert(VALUE_FIELD.to_string(), value);
    entry.insert(FETCHED_AT_FIELD.to_string(), JsonValue::from(fetched_at));
    JsonValue::Object(entry)
}

/// Cached value of `key` and when it was fetched.
#[must_use]
pub fn read_claim<'a>(
    payload: &'a Map<String, JsonValue>,
    key: &str,
) -> Option<(&'a JsonValue, u64)> {
    let entry = payload.get(key)?.as_object()?;
    let value = entry.get(VALUE_FIELD)?;
    let fetched_at = entry.get(FETCHED_AT_FIELD)?.as_u64()?;
    Some((value, fetched_at))
}

fn is_stale(fetched_at: u64, max_age: Option<Duration>, now_ms: u64) -> bool {
    max_age.is_some_and(|age| {
        let age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX);
        now_ms.saturating_sub(fetched_at) > age_ms
    })
}

/// Run `validators` against `session`, refetching stale claims first.
///
/// Refetched values are merged into the payload, which re-issues the access
/// token into `sink`.
pub(crate) async fn validate_claims(
    session: &mut Session,
    sink: &mut ResponseTokens,
    validators: &[Arc<dyn ClaimValidator>],
) -> Result<(), SessionError> {
    for validator in validators {
        if validator.should_refetch(session.access_token_payload(), now_ms()) {
            if let Some(claim) = validator.claim() {
                tracing::debug!(claim = %claim.key(), "Refetching session claim");
                session.fetch_and_set_claim(sink, claim.as_ref()).await?;
            }
        }
    }

    let now = now_ms();
    for validator in validators {
        match validator.validate(session.access_token_payload(), now) {
            ClaimVerdict::Valid => {}
            ClaimVerdict::MustRefresh(reason) => {
                tracing::debug!(validator = %validator.id(), %reason, "Claim needs refresh");
                return Err(SessionError::TryRefreshToken(reason));
            }
            ClaimVerdict::Invalid(reason) => {
                tracing::debug!(validator = %validator.id(), %reason, "Claim validation failed");
                return Err(SessionError::unauthorised(reason, false));
            }
        }
    }
    Ok(())
}

// ── Boolean claim ──────────────────────────────────────────────────

type BoolFetcher =
    Arc<dyn Fn(UserId) -> BoxFuture<'static, Result<Option<bool>, Error>> + Send + Sync>;

/// Claim holding a boolean, e.g. "email verified".
///
/// ```rust,ignore
/// let verified = BooleanClaim::new("st-ev", |user_id| async move {
///     Ok(Some(users::email_verified(&user_id).await?))
/// });
/// let options = VerifyOptions::required()
///     .with_claim_validator(verified.is_true(Some(Duration::from_secs(300))));
/// ```
#[derive(Clone)]
pub struct BooleanClaim {
    key: String,
    fetch: BoolFetcher,
}

impl BooleanClaim {
    pub fn new<F, Fut>(key: impl Into<String>, fetch: F) -> Self
    where
        F: Fn(UserId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<bool>, Error>> + Send + 'static,
    {
        Self {
            key: key.into(),
            fetch: Arc::new(move |user_id| Box::pin(fetch(user_id))),
        }
    }

    /// Valid when the value equals `expected` and is at most `max_age` old.
    #[must_use]
    pub fn has_value(&self, expected: bool, max_age: Option<Duration>) -> BooleanValidator {
        BooleanValidator {
            claim: self.clone(),
            expected,
            max_age,
        }
    }

    #[must_use]
    pub fn is_true(&self, max_age: Option<Duration>) -> BooleanValidator {
        self.has_value(true, max_age)
    }

    #[must_use]
    pub fn is_false(&self, max_age: Option<Duration>) -> BooleanValidator {
        self.has_value(false, max_age)
    }
}

impl std::fmt::Debug for BooleanClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BooleanClaim").field("key", &self.key).finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionClaim for BooleanClaim {
    fn key(&self) -> &str {
        &self.key
    }

    async fn fetch_value(&self, user_id: &UserId) -> Result<Option<JsonValue>, Error> {
        Ok((self.fetch)(user_id.clone()).await?.map(JsonValue::Bool))
    }
}

#[derive(Debug, Clone)]
pub struct BooleanValidator {
    claim: BooleanClaim,
    expected: bool,
    max_age: Option<Duration>,
}

impl ClaimValidator for BooleanValidator {
    fn id(&self) -> &str {
        &self.claim.key
    }

    fn claim(&self) -> Option<Arc<dyn SessionClaim>> {
        Some(Arc::new(self.claim.clone()))
    }

    fn should_refetch(&self, payload: &Map<String, JsonValue>, now_ms: u64) -> bool {
        match read_claim(payload, &self.claim.key) {
            None => true,
            Some((_, fetched_at)) => is_stale(fetched_at, self.max_age, now_ms),
        }
    }

    fn validate(&self, payload: &Map<String, JsonValue>, now_ms: u64) -> ClaimVerdict {
        let key = &self.claim.key;
        let Some((value, fetched_at)) = read_claim(payload, key) else {
            return ClaimVerdict::MustRefresh(format!("{key} is not set"));
        };
        if is_stale(fetched_at, self.max_age, now_ms) {
            return ClaimVerdict::MustRefresh(format!("{key} is stale"));
        }
        if value.as_bool() == Some(self.expected) {
            ClaimVerdict::Valid
        } else {
            ClaimVerdict::Invalid(format!("{key} must be {}", self.expected))
        }
    }
}
