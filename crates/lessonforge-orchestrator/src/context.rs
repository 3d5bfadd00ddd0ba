//! Per-request caller identity.
//!
//! The owner and the remote credential travel as an explicit value through
//! every service and orchestrator call instead of living in ambient state.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use lessonforge_remote::Credential;

use crate::api::AppState;
use crate::error::{ForgeError, Result};

/// Header carrying the acting user.
pub const USER_HEADER: &str = "x-user-id";

/// Header carrying the remote platform token.
pub const TOKEN_HEADER: &str = "x-remote-token";

/// Owner used when no user header is sent.
pub const ANONYMOUS: &str = "anonymous";

/// Who is acting, and with which remote credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Acting user, recorded as the owner of new courses.
    pub user_id: String,
    /// Credential for remote calls, if any.
    pub credential: Option<Credential>,
}

impl RequestContext {
    /// Creates a context.
    #[must_use]
    pub fn new(user_id: impl Into<String>, credential: Option<Credential>) -> Self {
        Self {
            user_id: user_id.into(),
            credential,
        }
    }

    /// A context with no user and no credential.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS, None)
    }

    /// Returns the credential for a remote call.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::MissingCredential` if none is available.
    pub fn credential(&self) -> Result<&Credential> {
        self.credential.as_ref().ok_or(ForgeError::MissingCredential)
    }

    /// Reads the context from request headers, falling back to `fallback`
    /// when no token header is present.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, fallback: Option<&Credential>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let user_id = header(USER_HEADER).unwrap_or(ANONYMOUS);
        let credential = header(TOKEN_HEADER)
            .map(|token| Credential::new(token.strip_prefix("Bearer ").unwrap_or(token)))
            .or_else(|| fallback.cloned());

        Self::new(user_id, credential)
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(Self::from_headers(
            &parts.headers,
            state.fallback_credential.as_ref(),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_defaults_without_headers() {
        let ctx = RequestContext::from_headers(&HeaderMap::new(), None);
        assert_eq!(ctx.user_id, ANONYMOUS);
        assert!(matches!(ctx.credential(), Err(ForgeError::MissingCredential)));
    }

    #[test]
    fn test_headers_win_over_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_static("alice"));
        headers.insert(TOKEN_HEADER, HeaderValue::from_static("Bearer tok-1"));

        let fallback = Credential::new("configured");
        let ctx = RequestContext::from_headers(&headers, Some(&fallback));
        assert_eq!(ctx.user_id, "alice");
        assert_eq!(ctx.credential().unwrap().expose(), "tok-1");
    }

    #[test]
    fn test_fallback_credential() {
        let fallback = Credential::new("configured");
        let ctx = RequestContext::from_headers(&HeaderMap::new(), Some(&fallback));
        assert_eq!(ctx.credential().unwrap().expose(), "configured");
    }
}
