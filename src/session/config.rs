use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use axum_extra::extract::cookie::SameSite;

use super::csrf::AntiCsrfMode;
use super::recipe::SessionRecipe;
use super::transport;
use crate::core::CoreConfig;
use crate::error::Error;
use crate::types::{SessionHandle, TransferMethod, UserId};

/// Decides the token channel for a request. The flag is `true` while a
/// session is being created.
pub type TransferMethodHook = Arc<dyn Fn(&HeaderMap, bool) -> TransferMethod + Send + Sync>;

/// Called when the core reports that a rotated-away refresh token was replayed.
pub type TokenTheftHook = Arc<dyn Fn(&SessionHandle, &UserId) + Send + Sync>;

/// Wraps the default recipe implementation. Receives the original and
/// returns the implementation the rest of the crate will use.
pub type RecipeOverride =
    Arc<dyn Fn(Arc<dyn SessionRecipe>) -> Arc<dyn SessionRecipe> + Send + Sync>;

/// Resolved settings shared by every component of a running context.
#[derive(Clone)]
pub(crate) struct SessionSettings {
    pub(crate) api_base_path: String,
    pub(crate) cookie_domain: Option<String>,
    pub(crate) cookie_same_site: SameSite,
    pub(crate) cookie_secure: bool,
    anti_csrf: Option<AntiCsrfMode>,
    pub(crate) transfer_method: TransferMethodHook,
    pub(crate) on_token_theft_detected: Option<TokenTheftHook>,
    pub(crate) use_dynamic_signing_key: bool,
    pub(crate) max_key_cache_ttl: Duration,
}

impl SessionSettings {
    fn defaults() -> Self {
        Self {
            api_base_path: "/auth".into(),
            cookie_domain: None,
            cookie_same_site: SameSite::Lax,
            cookie_secure: true,
            anti_csrf: None,
            transfer_method: Arc::new(transport::default_transfer_method),
            on_token_theft_detected: None,
            use_dynamic_signing_key: true,
            max_key_cache_ttl: Duration::from_secs(60 * 60),
        }
    }

    /// Anti-CSRF mode in force. Unless set explicitly: `ViaCustomHeader` for
    /// `SameSite=None` cookies, otherwise `None`.
    pub(crate) fn anti_csrf(&self) -> AntiCsrfMode {
        self.anti_csrf.unwrap_or(match self.cookie_same_site {
            SameSite::None => AntiCsrfMode::ViaCustomHeader,
            _ => AntiCsrfMode::None,
        })
    }

    pub(crate) fn refresh_path(&self) -> String {
        format!("{}/session/refresh", self.api_base_path)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if !self.api_base_path.starts_with('/') {
            return Err(Error::Config(format!(
                "api base path must start with '/': {}",
                self.api_base_path
            )));
        }
        if self.cookie_same_site == SameSite::None && !self.cookie_secure {
            return Err(Error::Config(
                "SameSite=None cookies must be Secure".into(),
            ));
        }
        Ok(())
    }
}

/// Session configuration.
///
/// Required field (`core`) is a constructor parameter. Use
/// [`from_env()`](SessionConfig::from_env) for convention-based setup, or
/// [`new()`](SessionConfig::new) with `with_*` methods for full control.
pub struct SessionConfig {
    pub(super) core: CoreConfig,
    pub(super) settings: SessionSettings,
    pub(super) recipe_override: Option<RecipeOverride>,
}

impl SessionConfig {
    #[must_use]
    pub fn new(core: CoreConfig) -> Self {
        Self {
            core,
            settings: SessionSettings::defaults(),
            recipe_override: None,
        }
    }

    /// Create config from environment variables.
    ///
    /// Core connection variables are read by [`CoreConfig::from_env`].
    ///
    /// # Optional env vars
    /// - `SESSION_API_BASE_PATH`: prefix of the refresh and signout routes (default `/auth`)
    /// - `SESSION_COOKIE_DOMAIN`: `Domain` attribute of session cookies
    /// - `SESSION_COOKIE_SAME_SITE`: `lax`, `strict` or `none`
    /// - `SESSION_COOKIE_SECURE`: `true`/`1` or `false`/`0`
    /// - `SESSION_ANTI_CSRF`: `via_token`, `via_custom_header` or `none`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is present but invalid.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::new(CoreConfig::from_env()?);

        if let Ok(path) = std::env::var("SESSION_API_BASE_PATH") {
            config = config.with_api_base_path(path);
        }
        if let Ok(domain) = std::env::var("SESSION_COOKIE_DOMAIN") {
            config = config.with_cookie_domain(domain);
        }
        if let Ok(same_site) = std::env::var("SESSION_COOKIE_SAME_SITE") {
            let same_site = match same_site.to_ascii_lowercase().as_str() {
                "lax" => SameSite::Lax,
                "strict" => SameSite::Strict,
                "none" => SameSite::None,
                other => {
                    return Err(Error::Config(format!("SESSION_COOKIE_SAME_SITE: {other}")));
                }
            };
            config = config.with_cookie_same_site(same_site);
        }
        if let Ok(secure) = std::env::var("SESSION_COOKIE_SECURE") {
            let secure = match secure.as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                other => return Err(Error::Config(format!("SESSION_COOKIE_SECURE: {other}"))),
            };
            config = config.with_cookie_secure(secure);
        }
        if let Ok(mode) = std::env::var("SESSION_ANTI_CSRF") {
            let mode: AntiCsrfMode = mode
                .parse()
                .map_err(|e| Error::Config(format!("SESSION_ANTI_CSRF: {e}")))?;
            config = config.with_anti_csrf(mode);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_api_base_path(mut self, path: impl Into<String>) -> Self {
        let path: String = path.into();
        self.settings.api_base_path = path.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: impl Into<String>) -> Self {
        self.settings.cookie_domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_cookie_same_site(mut self, same_site: SameSite) -> Self {
        self.settings.cookie_same_site = same_site;
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.settings.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_anti_csrf(mut self, mode: AntiCsrfMode) -> Self {
        self.settings.anti_csrf = Some(mode);
        self
    }

    /// Replace the hook deciding between header and cookie transport.
    #[must_use]
    pub fn with_token_transfer_method<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HeaderMap, bool) -> TransferMethod + Send + Sync + 'static,
    {
        self.settings.transfer_method = Arc::new(hook);
        self
    }

    #[must_use]
    pub fn with_on_token_theft_detected<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SessionHandle, &UserId) + Send + Sync + 'static,
    {
        self.settings.on_token_theft_detected = Some(Arc::new(hook));
        self
    }

    /// Decorate the default recipe implementation.
    #[must_use]
    pub fn with_override<F>(mut self, wrap: F) -> Self
    where
        F: Fn(Arc<dyn SessionRecipe>) -> Arc<dyn SessionRecipe> + Send + Sync + 'static,
    {
        self.recipe_override = Some(Arc::new(wrap));
        self
    }

    #[must_use]
    pub fn with_dynamic_signing_key(mut self, enabled: bool) -> Self {
        self.settings.use_dynamic_signing_key = enabled;
        self
    }

    /// Upper bound on how long signing keys are cached, whatever the core advertises.
    #[must_use]
    pub fn with_max_key_cache_ttl(mut self, ttl: Duration) -> Self {
        self.settings.max_key_cache_ttl = ttl;
        self
    }
}
