// ABOUTME: Request authentication for the management and consent routes
// ABOUTME: Admin routes require the configured bearer key; consent routes require a principal session token
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! # Route Guards
//!
//! Two credentials protect the HTTP surface. Operators present the admin API
//! key as a bearer token on `/admin/*` and `/certificates/*`. Retail
//! customers reach the consent routes with a short-lived HS256 session token
//! issued by the Data Custodian's login front end; the guard places the
//! verified [`AuthenticatedPrincipal`] in the request extensions and the
//! handlers never read a principal name from the request itself.

/// Admin API key guard
pub mod admin_guard;
/// Principal session token guard
pub mod principal;

pub use admin_guard::{require_admin, AdminGuard};
pub use principal::{require_principal, AuthenticatedPrincipal, PrincipalAuthenticator, PrincipalClaims};

use crate::config::environment::AccessConfig;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use greenbutton_core::errors::{AppError, AppResult};

/// Both guards, built once from [`AccessConfig`]
pub struct RequestAuth {
    /// Admin key check
    pub admin: AdminGuard,
    /// Principal token check
    pub principals: PrincipalAuthenticator,
}

impl RequestAuth {
    /// Build the guards from configuration
    #[must_use]
    pub fn new(config: &AccessConfig) -> Self {
        Self {
            admin: AdminGuard::new(config.admin_api_key.as_deref()),
            principals: PrincipalAuthenticator::new(
                config.principal_token_secret.as_deref(),
                &config.principal_token_audience,
            ),
        }
    }
}

/// Token carried in `Authorization: Bearer <token>`
pub(crate) fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::auth_invalid("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::auth_invalid("Authorization header is not valid ASCII"))?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::auth_invalid("Authorization header must carry a bearer token"))?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def");
    }
}
