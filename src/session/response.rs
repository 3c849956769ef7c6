use std::convert::Infallible;

use axum::http::header::{ACCESS_CONTROL_EXPOSE_HEADERS, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, IntoResponseParts, Response, ResponseParts};
use axum_extra::extract::cookie::Cookie;

/// Buffered transport side effects of a session operation: cookies to set
/// or clear and headers to emit.
///
/// Operations only write here once their network calls have completed, so a
/// cancelled operation leaves no partial changes. Return it from the handler
/// (it implements [`IntoResponseParts`]) to apply it.
///
/// ```rust,ignore
/// async fn login(State(ctx): State<SessionContext>, headers: HeaderMap) -> impl IntoResponse {
///     let mut tokens = ResponseTokens::new();
///     ctx.create_new_session(&headers, &mut tokens, "u1".into(), Map::new(), Map::new()).await?;
///     Ok::<_, SessionRejection>((tokens, "welcome"))
/// }
/// ```
#[derive(Debug, Default, Clone)]
pub struct ResponseTokens {
    cookies: Vec<Cookie<'static>>,
    headers: Vec<(&'static str, String)>,
    exposed: Vec<&'static str>,
}

impl ResponseTokens {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.headers.is_empty()
    }

    /// Cookies in the order they were written. A later cookie with the same
    /// name and path supersedes an earlier one.
    #[must_use]
    pub fn cookies(&self) -> &[Cookie<'static>] {
        &self.cookies
    }

    /// Last cookie written under `name`.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&Cookie<'static>> {
        self.cookies.iter().rev().find(|c| c.name() == name)
    }

    /// Value of a session header that will be sent.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn add_cookie(&mut self, cookie: Cookie<'static>) {
        self.cookies
            .retain(|c| !(c.name() == cookie.name() && c.path() == cookie.path()));
        self.cookies.push(cookie);
    }

    /// Set `name`, replacing an earlier value, and list it in
    /// `Access-Control-Expose-Headers`.
    pub(crate) fn set_header(&mut self, name: &'static str, value: String) {
        self.headers.retain(|(n, _)| *n != name);
        self.headers.push((name, value));
        if !self.exposed.contains(&name) {
            self.exposed.push(name);
        }
    }

    /// Move everything from `other` into `self`; `other` wins on conflicts.
    pub fn extend(&mut self, other: ResponseTokens) {
        for cookie in other.cookies {
            self.add_cookie(cookie);
        }
        for (name, value) in other.headers {
            self.set_header(name, value);
        }
    }
}

impl ResponseTokens {
    /// Drop every header and cookie that `response` already sets, so writes
    /// made later in the request (by the handler) take precedence.
    pub(crate) fn retain_unset(&mut self, response: &HeaderMap) {
        let set_cookies: Vec<String> = response
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| Cookie::parse(value).ok())
            .map(|cookie| cookie.name().to_string())
            .collect();
        self.cookies.retain(|c| !set_cookies.iter().any(|name| name == c.name()));
        self.headers.retain(|(name, _)| !response.contains_key(*name));
        let headers = &self.headers;
        self.exposed.retain(|name| headers.iter().any(|(n, _)| n == name));
    }
}

impl IntoResponseParts for ResponseTokens {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        let headers = res.headers_mut();
        for cookie in &self.cookies {
            match HeaderValue::from_str(&cookie.to_string()) {
                Ok(value) => {
                    headers.append(SET_COOKIE, value);
                }
                Err(e) => tracing::error!(
                    cookie = %cookie.name(),
                    error = %e,
                    "Unencodable session cookie"
                ),
            }
        }
        for (name, value) in &self.headers {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static(name), value);
                }
                Err(e) => tracing::error!(header = %name, error = %e, "Unencodable session header"),
            }
        }
        if !self.exposed.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.exposed.join(", ")) {
                headers.append(ACCESS_CONTROL_EXPOSE_HEADERS, value);
            }
        }
        Ok(res)
    }
}

impl IntoResponse for ResponseTokens {
    fn into_response(self) -> Response {
        (self, ()).into_response()
    }
}
