// ABOUTME: Admin authorization guard for client administration, certificate, and metrics routes
// ABOUTME: Compares SHA-256 digests of the presented and configured keys in constant time
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use super::bearer_token;
use crate::resources::ServerResources;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use greenbutton_core::errors::{AppError, AppResult};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Checks the admin bearer key
pub struct AdminGuard {
    key_digest: Option<[u8; 32]>,
}

impl AdminGuard {
    /// Guard accepting `api_key`; `None` refuses every request
    #[must_use]
    pub fn new(api_key: Option<&str>) -> Self {
        Self {
            key_digest: api_key.map(|key| Sha256::digest(key.as_bytes()).into()),
        }
    }

    /// Verify the bearer key on a request
    ///
    /// # Errors
    ///
    /// Returns 401 for a missing or wrong key and 403 when no admin key is configured
    pub fn verify(&self, headers: &HeaderMap) -> AppResult<()> {
        let Some(expected) = &self.key_digest else {
            warn!("Admin route called but no admin API key is configured");
            return Err(AppError::permission_denied("Admin access is not configured"));
        };
        let presented: [u8; 32] = Sha256::digest(bearer_token(headers)?.as_bytes()).into();
        if bool::from(presented.as_slice().ct_eq(expected.as_slice())) {
            Ok(())
        } else {
            warn!("Rejected admin request with an invalid API key");
            Err(AppError::auth_invalid("Invalid admin API key"))
        }
    }
}

/// Middleware rejecting requests without the admin key
///
/// # Errors
///
/// Returns the [`AdminGuard::verify`] error as the response
pub async fn require_admin(
    State(resources): State<Arc<ServerResources>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    resources.auth.admin.verify(request.headers())?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::AUTHORIZATION, HeaderValue};
    use greenbutton_core::errors::ErrorCode;

    fn with_bearer(token: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(token));
        headers
    }

    #[test]
    fn test_admin_key_checks() {
        let guard = AdminGuard::new(Some("s3cret"));
        assert!(guard.verify(&with_bearer("Bearer s3cret")).is_ok());
        assert_eq!(
            guard.verify(&with_bearer("Bearer s3cret2")).unwrap_err().code,
            ErrorCode::AuthInvalid
        );
        assert_eq!(
            guard.verify(&HeaderMap::new()).unwrap_err().code,
            ErrorCode::AuthInvalid
        );
    }

    #[test]
    fn test_unconfigured_guard_refuses_everything() {
        let guard = AdminGuard::new(None);
        assert_eq!(
            guard.verify(&with_bearer("Bearer anything")).unwrap_err().code,
            ErrorCode::PermissionDenied
        );
    }
}
