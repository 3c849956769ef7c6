use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value as JsonValue, json};

use super::context::SessionContext;
use super::error::SessionRejection;
use super::response::ResponseTokens;
use super::types::VerifyOptions;

/// Create the session router: `POST {base}/session/refresh` and
/// `POST {base}/signout`, where `base` is the configured API base path.
pub fn session_routes(ctx: SessionContext) -> Router {
    let base = ctx.api_base_path().to_string();

    Router::new()
        .route(&format!("{base}/session/refresh"), post(refresh))
        .route(&format!("{base}/signout"), post(signout))
        .with_state(ctx)
}

fn ok() -> Json<JsonValue> {
    Json(json!({ "status": "OK" }))
}

// ── Refresh ────────────────────────────────────────────────────────

async fn refresh(
    State(ctx): State<SessionContext>,
    headers: HeaderMap,
) -> Result<(ResponseTokens, Json<JsonValue>), SessionRejection> {
    let mut tokens = ResponseTokens::new();
    match ctx.refresh_session(&headers, &mut tokens).await {
        Ok(_) => Ok((tokens, ok())),
        Err(error) => Err(SessionRejection::new(tokens, error)),
    }
}

// ── Sign out ───────────────────────────────────────────────────────

async fn signout(
    State(ctx): State<SessionContext>,
    headers: HeaderMap,
) -> Result<(ResponseTokens, Json<JsonValue>), SessionRejection> {
    let mut tokens = ResponseTokens::new();
    let session = match ctx.get_session(&headers, &mut tokens, &VerifyOptions::optional()).await {
        Ok(session) => session,
        Err(error) => return Err(SessionRejection::new(tokens, error)),
    };

    // Signing out without a session is a no-op.
    if let Some(session) = session {
        if let Err(error) = session.revoke_session(&mut tokens).await {
            return Err(SessionRejection::new(tokens, error));
        }
    }
    Ok((tokens, ok()))
}
