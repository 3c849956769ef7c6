use std::convert::Infallible;

use axum::extract::{FromRequestParts, OptionalFromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::context::SessionContext;
use super::error::{SessionError, SessionRejection};
use super::response::ResponseTokens;
use super::types::{Session, VerifyOptions};

/// Reject requests without a valid session; attach the [`Session`] otherwise.
///
/// ```rust,ignore
/// let protected = Router::new()
///     .route("/me", get(me))
///     .route_layer(axum::middleware::from_fn_with_state(ctx.clone(), require_session));
/// ```
pub async fn require_session(
    State(ctx): State<SessionContext>,
    req: Request,
    next: Next,
) -> Response {
    run(&ctx, &VerifyOptions::required(), req, next).await
}

/// Attach the [`Session`] when the request carries one. Requests without
/// tokens pass through; invalid tokens are still rejected.
pub async fn optional_session(
    State(ctx): State<SessionContext>,
    req: Request,
    next: Next,
) -> Response {
    run(&ctx, &VerifyOptions::optional(), req, next).await
}

/// State for [`verify_session`]: a context plus the options to verify with.
#[derive(Clone, Debug)]
pub struct VerifySession {
    pub ctx: SessionContext,
    pub options: VerifyOptions,
}

impl VerifySession {
    #[must_use]
    pub fn new(ctx: SessionContext, options: VerifyOptions) -> Self {
        Self { ctx, options }
    }
}

/// Like [`require_session`], with explicit options (database check, claim
/// validators).
///
/// ```rust,ignore
/// let state = VerifySession::new(ctx.clone(), VerifyOptions::required().with_check_database(true));
/// let admin = Router::new()
///     .route("/admin", get(admin))
///     .route_layer(axum::middleware::from_fn_with_state(state, verify_session));
/// ```
pub async fn verify_session(
    State(state): State<VerifySession>,
    req: Request,
    next: Next,
) -> Response {
    run(&state.ctx, &state.options, req, next).await
}

async fn run(
    ctx: &SessionContext,
    options: &VerifyOptions,
    mut req: Request,
    next: Next,
) -> Response {
    let mut tokens = ResponseTokens::new();
    match ctx.get_session(req.headers(), &mut tokens, options).await {
        Ok(Some(session)) => {
            req.extensions_mut().insert(session);
        }
        Ok(None) => {}
        Err(error) => return SessionRejection::new(tokens, error).into_response(),
    }
    let response = next.run(req).await;
    tokens.retain_unset(response.headers());
    (tokens, response).into_response()
}

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = SessionError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or_else(|| SessionError::unauthorised("no verified session on request", false))
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<Session>().cloned())
    }
}
