//! In-process fake of the core's session API.
//!
//! Signs real `v4.public` access tokens, rotates refresh tokens and reports
//! replays, so the SDK can be exercised end to end without a core.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use core_session::{
    AccessTokenClaims, CoreConfig, KeyStatus, ResponseTokens, SessionConfig, SessionContext,
    SessionHandle, SigningKey, SigningKeysDocument, UserId,
};
use pasetors::keys::{AsymmetricKeyPair, Generate};
use pasetors::token::UntrustedToken;
use pasetors::version4::{PublicToken, V4};
use pasetors::Public;
use serde_json::{Map, Value, json};

pub const KID: &str = "fake-core-key";
const REFRESH_TTL_MS: u64 = 100 * 24 * 60 * 60 * 1000;
const DEFAULT_ACCESS_TTL_MS: u64 = 60 * 60 * 1000;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Clone)]
struct StoredSession {
    handle: String,
    user_id: String,
    payload: Map<String, Value>,
    db: Map<String, Value>,
    anti_csrf: Option<String>,
    time_created: u64,
    refresh_token: String,
    access_expiry: u64,
}

struct RefreshEntry {
    handle: String,
    used: bool,
}

struct CoreState {
    next_id: u64,
    sessions: HashMap<String, StoredSession>,
    refresh_tokens: HashMap<String, RefreshEntry>,
    access_ttl_ms: u64,
    response_delay: Duration,
    calls: Vec<(&'static str, Value)>,
}

struct Shared {
    pair: AsymmetricKeyPair<V4>,
    state: Mutex<CoreState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap()
    }

    fn sign(&self, claims: &AccessTokenClaims) -> String {
        sign_with(&self.pair, KID, claims)
    }

    fn decode(&self, token: &str) -> Option<AccessTokenClaims> {
        let untrusted = UntrustedToken::<Public, V4>::try_from(token).ok()?;
        let trusted = PublicToken::verify(&self.pair.public, &untrusted, None, None).ok()?;
        serde_json::from_str(trusted.payload()).ok()
    }

    fn access_token(&self, session: &StoredSession, parent: Option<String>) -> (String, u64) {
        let claims = AccessTokenClaims {
            session_handle: SessionHandle::from(session.handle.as_str()),
            user_id: UserId::from(session.user_id.as_str()),
            refresh_token_hash1: session.refresh_token.clone(),
            parent_refresh_token_hash1: parent,
            user_data: session.payload.clone(),
            anti_csrf_token: session.anti_csrf.clone(),
            expiry_time: session.access_expiry,
            time_created: session.time_created,
        };
        (self.sign(&claims), session.access_expiry)
    }

    /// Store `session` with a fresh pair and answer like the core does.
    fn issue_pair(
        &self,
        state: &mut CoreState,
        mut session: StoredSession,
        parent: Option<String>,
    ) -> Value {
        state.next_id += 1;
        let now = now_ms();
        session.refresh_token = format!("rt-{}-{}", session.handle, state.next_id);
        session.access_expiry = now + state.access_ttl_ms;
        let (access_token, expiry) = self.access_token(&session, parent);
        state.refresh_tokens.insert(
            session.refresh_token.clone(),
            RefreshEntry {
                handle: session.handle.clone(),
                used: false,
            },
        );
        let response = json!({
            "status": "OK",
            "session": session_json(&session),
            "accessToken": { "token": access_token, "expiry": expiry, "createdTime": now },
            "refreshToken": {
                "token": session.refresh_token,
                "expiry": now + REFRESH_TTL_MS,
                "createdTime": now,
            },
            "antiCsrfToken": session.anti_csrf,
        });
        state.sessions.insert(session.handle.clone(), session);
        response
    }
}

fn sign_with(pair: &AsymmetricKeyPair<V4>, kid: &str, claims: &AccessTokenClaims) -> String {
    let payload = serde_json::to_vec(claims).unwrap();
    let footer = json!({ "kid": kid }).to_string();
    PublicToken::sign(&pair.secret, &payload, Some(footer.as_bytes()), None).unwrap()
}

fn session_json(session: &StoredSession) -> Value {
    json!({ "handle": session.handle, "userId": session.user_id, "userDataInJWT": session.payload })
}

fn unauthorised() -> Json<Value> {
    Json(json!({ "status": "UNAUTHORISED", "message": "session does not exist" }))
}

type Core = State<Arc<Shared>>;

async fn create(State(core): Core, Json(body): Json<Value>) -> Json<Value> {
    let mut state = core.lock();
    state.calls.push(("create", body.clone()));
    state.next_id += 1;
    let session = StoredSession {
        handle: format!("handle-{:04}", state.next_id),
        user_id: body["userId"].as_str().unwrap_or_default().to_string(),
        payload: body["userDataInJWT"].as_object().cloned().unwrap_or_default(),
        db: body["userDataInDatabase"].as_object().cloned().unwrap_or_default(),
        anti_csrf: body["antiCsrfToken"].as_str().map(str::to_string),
        time_created: now_ms(),
        refresh_token: String::new(),
        access_expiry: 0,
    };
    Json(core.issue_pair(&mut state, session, None))
}

async fn refresh(State(core): Core, Json(body): Json<Value>) -> Json<Value> {
    let delay = core.lock().response_delay;
    tokio::time::sleep(delay).await;
    let mut state = core.lock();
    state.calls.push(("refresh", body.clone()));
    let presented = body["refreshToken"].as_str().unwrap_or_default().to_string();

    let Some((handle, used)) = state
        .refresh_tokens
        .get(&presented)
        .map(|entry| (entry.handle.clone(), entry.used))
    else {
        return unauthorised();
    };
    if used {
        let user_id = state
            .sessions
            .get(&handle)
            .map(|s| s.user_id.clone())
            .unwrap_or_default();
        return Json(json!({
            "status": "TOKEN_THEFT_DETECTED",
            "session": { "handle": handle, "userId": user_id },
        }));
    }
    if let Some(entry) = state.refresh_tokens.get_mut(&presented) {
        entry.used = true;
    }

    let Some(mut session) = state.sessions.get(&handle).cloned() else {
        return unauthorised();
    };
    session.anti_csrf = body["antiCsrfToken"].as_str().map(str::to_string);
    Json(core.issue_pair(&mut state, session, Some(presented)))
}

async fn verify(State(core): Core, Json(body): Json<Value>) -> Json<Value> {
    let mut state = core.lock();
    state.calls.push(("verify", body.clone()));
    let Some(claims) = body["accessToken"].as_str().and_then(|t| core.decode(t)) else {
        return unauthorised();
    };
    let Some(session) = state.sessions.get(claims.session_handle.as_str()).cloned() else {
        return unauthorised();
    };
    // First use of a rotated pair: hand out a token without the parent link.
    let replacement = claims.parent_refresh_token_hash1.is_some().then(|| {
        let (token, expiry) = core.access_token(&session, None);
        json!({ "token": token, "expiry": expiry, "createdTime": now_ms() })
    });
    Json(json!({ "status": "OK", "session": session_json(&session), "accessToken": replacement }))
}

async fn regenerate(State(core): Core, Json(body): Json<Value>) -> Json<Value> {
    let mut state = core.lock();
    state.calls.push(("regenerate", body.clone()));
    let Some(claims) = body["accessToken"].as_str().and_then(|t| core.decode(t)) else {
        return unauthorised();
    };
    let Some(session) = state.sessions.get_mut(claims.session_handle.as_str()) else {
        return unauthorised();
    };
    session.payload = body["userDataInJWT"].as_object().cloned().unwrap_or_default();
    let session = session.clone();
    let (token, expiry) = core.access_token(&session, None);
    Json(json!({
        "status": "OK",
        "session": session_json(&session),
        "accessToken": { "token": token, "expiry": expiry, "createdTime": now_ms() },
    }))
}

async fn information(
    State(core): Core,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut state = core.lock();
    state.calls.push(("information", json!(query)));
    let handle = query.get("sessionHandle").cloned().unwrap_or_default();
    let Some(session) = state.sessions.get(&handle) else {
        return unauthorised();
    };
    Json(json!({
        "status": "OK",
        "sessionHandle": session.handle,
        "userId": session.user_id,
        "sessionDataInDatabase": session.db,
        "accessTokenPayload": session.payload,
        "expiry": now_ms() + REFRESH_TTL_MS,
        "timeCreated": session.time_created,
    }))
}

async fn remove(State(core): Core, Json(body): Json<Value>) -> Json<Value> {
    let mut state = core.lock();
    state.calls.push(("remove", body.clone()));
    let targets: Vec<String> = match body.get("sessionHandles").and_then(Value::as_array) {
        Some(handles) => handles.iter().filter_map(|h| h.as_str().map(str::to_string)).collect(),
        None => {
            let user_id = body["userId"].as_str().unwrap_or_default();
            state
                .sessions
                .values()
                .filter(|s| s.user_id == user_id)
                .map(|s| s.handle.clone())
                .collect()
        }
    };
    let mut revoked: Vec<String> = targets
        .into_iter()
        .filter(|h| state.sessions.remove(h).is_some())
        .collect();
    revoked.sort();
    Json(json!({ "status": "OK", "sessionHandlesRevoked": revoked }))
}

async fn user_handles(
    State(core): Core,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut state = core.lock();
    state.calls.push(("user_handles", json!(query)));
    let user_id = query.get("userId").cloned().unwrap_or_default();
    let mut handles: Vec<String> = state
        .sessions
        .values()
        .filter(|s| s.user_id == user_id)
        .map(|s| s.handle.clone())
        .collect();
    handles.sort();
    Json(json!({ "status": "OK", "sessionHandles": handles }))
}

async fn update_data(State(core): Core, Json(body): Json<Value>) -> Json<Value> {
    let mut state = core.lock();
    state.calls.push(("update_data", body.clone()));
    let handle = body["sessionHandle"].as_str().unwrap_or_default();
    let Some(session) = state.sessions.get_mut(handle) else {
        return unauthorised();
    };
    session.db = body["userDataInDatabase"].as_object().cloned().unwrap_or_default();
    Json(json!({ "status": "OK" }))
}

async fn update_payload(State(core): Core, Json(body): Json<Value>) -> Json<Value> {
    let mut state = core.lock();
    state.calls.push(("update_payload", body.clone()));
    let handle = body["sessionHandle"].as_str().unwrap_or_default();
    let Some(session) = state.sessions.get_mut(handle) else {
        return unauthorised();
    };
    session.payload = body["userDataInJWT"].as_object().cloned().unwrap_or_default();
    Json(json!({ "status": "OK" }))
}

async fn keys(State(core): Core) -> Json<SigningKeysDocument> {
    core.lock().calls.push(("keys", Value::Null));
    let key = SigningKey::new(KID, hex::encode(core.pair.public.as_bytes()), KeyStatus::Active);
    Json(SigningKeysDocument::new("fake-core", vec![key], 300))
}

/// A running fake core.
pub struct FakeCore {
    pub url: String,
    shared: Arc<Shared>,
}

impl FakeCore {
    pub async fn start() -> Self {
        init_tracing();
        let shared = Arc::new(Shared {
            pair: AsymmetricKeyPair::<V4>::generate().unwrap(),
            state: Mutex::new(CoreState {
                next_id: 0,
                sessions: HashMap::new(),
                refresh_tokens: HashMap::new(),
                access_ttl_ms: DEFAULT_ACCESS_TTL_MS,
                response_delay: Duration::ZERO,
                calls: Vec::new(),
            }),
        });

        let app = Router::new()
            .route("/recipe/session", post(create).get(information))
            .route("/recipe/session/refresh", post(refresh))
            .route("/recipe/session/verify", post(verify))
            .route("/recipe/session/regenerate", post(regenerate))
            .route("/recipe/session/remove", post(remove))
            .route("/recipe/session/user", get(user_handles))
            .route("/recipe/session/data", put(update_data))
            .route("/recipe/session/jwt/data", put(update_payload))
            .route("/recipe/session/keys", get(keys))
            .with_state(shared.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            shared,
        }
    }

    pub fn config(&self) -> SessionConfig {
        SessionConfig::new(CoreConfig::new(self.url.parse().unwrap()))
    }

    pub fn context(&self) -> SessionContext {
        SessionContext::new(self.config()).unwrap()
    }

    /// Lifetime of access tokens issued from now on. `0` issues tokens that
    /// are already expired.
    pub fn set_access_ttl_ms(&self, ttl: u64) {
        self.shared.lock().access_ttl_ms = ttl;
    }

    /// Hold every refresh answer back by `delay`.
    pub fn set_response_delay(&self, delay: Duration) {
        self.shared.lock().response_delay = delay;
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.shared.lock().calls.iter().filter(|(name, _)| *name == endpoint).count()
    }

    pub fn last_body(&self, endpoint: &str) -> Option<Value> {
        self.shared
            .lock()
            .calls
            .iter()
            .rev()
            .find(|(name, _)| *name == endpoint)
            .map(|(_, body)| body.clone())
    }

    pub fn session_exists(&self, handle: &str) -> bool {
        self.shared.lock().sessions.contains_key(handle)
    }

    pub fn stored_payload(&self, handle: &str) -> Option<Map<String, Value>> {
        self.shared.lock().sessions.get(handle).map(|s| s.payload.clone())
    }

    /// A well-formed token for `handle` signed with a key the core never published.
    pub fn forged_token(&self, handle: &str, user_id: &str) -> String {
        self.forged_token_with_kid(handle, user_id, KID)
    }

    /// Like [`FakeCore::forged_token`], with `kid` in the footer.
    pub fn forged_token_with_kid(&self, handle: &str, user_id: &str, kid: &str) -> String {
        let other = AsymmetricKeyPair::<V4>::generate().unwrap();
        let claims = AccessTokenClaims {
            session_handle: SessionHandle::from(handle),
            user_id: UserId::from(user_id),
            refresh_token_hash1: "rt".into(),
            parent_refresh_token_hash1: None,
            user_data: Map::new(),
            anti_csrf_token: None,
            expiry_time: now_ms() + DEFAULT_ACCESS_TTL_MS,
            time_created: now_ms(),
        };
        sign_with(&other, kid, &claims)
    }
}

// ── Request helpers ────────────────────────────────────────────────

pub fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}")).unwrap());
    headers
}

/// `Cookie` request header carrying every non-empty cookie in `tokens`.
pub fn cookies_from(tokens: &ResponseTokens) -> HeaderMap {
    let cookie = tokens
        .cookies()
        .iter()
        .filter(|c| !c.value().is_empty())
        .map(|c| format!("{}={}", c.name(), c.value()))
        .collect::<Vec<_>>()
        .join("; ");
    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_str(&cookie).unwrap());
    headers
}

pub fn with_header(mut headers: HeaderMap, name: &'static str, value: &str) -> HeaderMap {
    headers.insert(name, HeaderValue::from_str(value).unwrap());
    headers
}

pub fn payload(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
