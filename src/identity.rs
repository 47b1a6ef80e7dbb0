use axum::http::HeaderMap;

use crate::config::{AppMode, DEV_USER_EMAIL, DEV_USER_ID};
use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
}

impl Identity {
    pub fn dev() -> Self {
        Self {
            id: DEV_USER_ID.to_string(),
            email: Some(DEV_USER_EMAIL.to_string()),
        }
    }
}

/// Resolves the caller of a request, or nothing when the request is anonymous.
pub trait IdentityProvider: Send + Sync {
    fn identify(&self, headers: &HeaderMap) -> Option<Identity>;
}

/// Trusts identity headers set by the fronting gateway.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderIdentityProvider;

impl IdentityProvider for HeaderIdentityProvider {
    fn identify(&self, headers: &HeaderMap) -> Option<Identity> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Some(Identity {
            id: header(USER_ID_HEADER)?,
            email: header(USER_EMAIL_HEADER),
        })
    }
}

/// Identity a request acts as, after applying the deployment mode.
///
/// Self-hosted deployments fall back to the fixed development identity; hosted
/// deployments reject anonymous callers.
pub fn caller(
    mode: AppMode,
    provider: &dyn IdentityProvider,
    headers: &HeaderMap,
) -> Result<Identity, AppError> {
    match (provider.identify(headers), mode) {
        (Some(identity), _) => Ok(identity),
        (None, AppMode::SelfHosted) => Ok(Identity::dev()),
        (None, AppMode::Hosted) => Err(AppError::Unauthorized(
            "Please sign in to analyze markets".to_string(),
        )),
    }
}
