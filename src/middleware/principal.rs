// ABOUTME: Retail customer authentication for the consent routes
// ABOUTME: Verifies HS256 session tokens and exposes the principal as a request extension
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use super::bearer_token;
use crate::resources::ServerResources;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Duration, Utc};
use greenbutton_core::errors::{AppError, AppResult};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Retail customer verified for the current request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    /// Principal name used as the consent key
    pub name: String,
}

/// Claims of a principal session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalClaims {
    /// Principal name
    pub sub: String,
    /// Audience; must match the configured audience
    pub aud: String,
    /// Issued at, seconds since the epoch
    pub iat: i64,
    /// Expiry, seconds since the epoch
    pub exp: i64,
}

impl PrincipalClaims {
    /// Claims for `principal` valid for `ttl` from `now`
    #[must_use]
    pub fn new(principal: &str, audience: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            sub: principal.to_owned(),
            aud: audience.to_owned(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }
}

/// Verifies principal session tokens
pub struct PrincipalAuthenticator {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl PrincipalAuthenticator {
    /// Authenticator for tokens signed with `secret`; `None` refuses every token
    #[must_use]
    pub fn new(secret: Option<&str>, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "sub", "aud"]);
        Self {
            key: secret.map(|secret| DecodingKey::from_secret(secret.as_bytes())),
            validation,
        }
    }

    /// Principal named by the bearer token on a request
    ///
    /// # Errors
    ///
    /// Returns 401 for a missing, malformed, expired, or foreign token and
    /// 403 when no token secret is configured
    pub fn authenticate(&self, headers: &HeaderMap) -> AppResult<AuthenticatedPrincipal> {
        let Some(key) = &self.key else {
            warn!("Consent route called but no principal token secret is configured");
            return Err(AppError::permission_denied(
                "Principal authentication is not configured",
            ));
        };
        let token = bearer_token(headers)?;
        let claims = decode::<PrincipalClaims>(token, key, &self.validation)
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::ExpiredSignature => "Principal session has expired",
                    ErrorKind::InvalidAudience => "Principal token was issued for another audience",
                    ErrorKind::InvalidSignature => "Principal token signature is invalid",
                    _ => "Principal token is malformed",
                };
                debug!(error = %e, "Rejected principal token");
                AppError::auth_invalid(reason)
            })?
            .claims;
        if claims.sub.trim().is_empty() {
            return Err(AppError::auth_invalid("Principal token names no principal"));
        }
        Ok(AuthenticatedPrincipal { name: claims.sub })
    }
}

/// Middleware attaching the [`AuthenticatedPrincipal`] to the request
///
/// # Errors
///
/// Returns the [`PrincipalAuthenticator::authenticate`] error as the response
pub async fn require_principal(
    State(resources): State<Arc<ServerResources>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = resources.auth.principals.authenticate(request.headers())?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}
