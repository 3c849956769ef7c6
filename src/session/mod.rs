//! Session token protocol over a remote core, with axum glue.
//!
//! Sessions are created, verified, refreshed and revoked through a
//! [`SessionContext`]. Tokens travel in cookies or headers, chosen per
//! request; every operation writes its token changes into a
//! [`ResponseTokens`] that the handler returns as part of its response.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use core_session::session::{SessionConfig, SessionContext, require_session, session_routes};
//!
//! let ctx = SessionContext::new(SessionConfig::from_env()?)?;
//!
//! let app = axum::Router::new()
//!     .route("/me", get(me))
//!     .route_layer(axum::middleware::from_fn_with_state(ctx.clone(), require_session))
//!     .merge(session_routes(ctx.clone()));
//!
//! async fn login(State(ctx): State<SessionContext>, headers: HeaderMap) -> Result<impl IntoResponse, SessionRejection> {
//!     let mut tokens = ResponseTokens::new();
//!     ctx.create_new_session(&headers, &mut tokens, "user-1".into(), Map::new(), Map::new()).await?;
//!     Ok((tokens, "signed in"))
//! }
//! ```

pub mod claims;
mod config;
mod context;
mod cookies;
mod csrf;
mod error;
pub mod front_token;
mod middleware;
mod recipe;
mod refresh;
mod response;
mod routes;
mod transport;
mod types;
mod verify;

pub use claims::{BooleanClaim, BooleanValidator, ClaimValidator, ClaimVerdict, SessionClaim};
pub use config::{RecipeOverride, SessionConfig, TokenTheftHook, TransferMethodHook};
pub use context::SessionContext;
pub use csrf::{AntiCsrfMode, generate_anti_csrf_token};
pub use error::{SessionError, SessionRejection, TRY_REFRESH_TOKEN_MESSAGE, UNAUTHORISED_MESSAGE};
pub use front_token::FrontToken;
pub use middleware::{VerifySession, optional_session, require_session, verify_session};
pub use recipe::{CoreRecipe, NewSession, SessionRecipe, TokenVerdict};
pub use response::ResponseTokens;
pub use routes::session_routes;
pub use transport::{AUTH_MODE_HEADER, default_transfer_method};
pub use types::{Session, VerifyOptions};

/// Re-export cookie attribute type for builder API.
pub use axum_extra::extract::cookie::SameSite;
