// ABOUTME: ESPI client registration request/response models and the OAuth 2.0 error body
// ABOUTME: Client views never carry secret material; credentials are returned exactly once
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use super::token_engine::TokenPolicy;
use crate::scopes::{self, ScopeDescription};
use chrono::{DateTime, Utc};
use greenbutton_core::errors::{AppError, ErrorCode};
use greenbutton_core::models::{ClientStatus, GrantType, RegisteredClient, TokenEndpointAuthMethod};
use serde::{Deserialize, Serialize};
use std::fmt;

/// ESPI client registration or update request (RFC 7591 / RFC 7592 shape)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientRegistrationRequest {
    /// Display name shown to retail customers
    pub client_name: Option<String>,
    /// Redirect URIs for the authorization code flow
    pub redirect_uris: Option<Vec<String>>,
    /// Grant types; defaults to `authorization_code`
    pub grant_types: Option<Vec<String>>,
    /// Space-delimited scopes the client may request
    pub scope: Option<String>,
    /// Token endpoint authentication method; defaults to `client_secret_basic`
    pub token_endpoint_auth_method: Option<String>,
    /// Endpoint receiving `BatchList` notifications
    pub notify_uri: Option<String>,
    /// Requests per minute
    pub rate_limit_per_minute: Option<u32>,
    /// Maximum concurrent sessions
    pub max_concurrent_sessions: Option<u32>,
}

/// Credentials returned once by a successful registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCredentials {
    /// Generated client identifier
    pub client_id: String,
    /// Plaintext secret; only its hash is stored
    pub client_secret: String,
    /// Issue time in seconds since the epoch
    pub client_id_issued_at: i64,
    /// Secret expiry in seconds since the epoch, `0` when it never expires
    pub client_secret_expires_at: i64,
    /// Display name
    pub client_name: String,
    /// Registered redirect URIs
    pub redirect_uris: Vec<String>,
    /// Registered grant types
    pub grant_types: Vec<GrantType>,
    /// Token endpoint authentication method
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    /// Space-delimited registered scopes
    pub scope: String,
    /// Whether retail customers must approve access
    pub require_consent: bool,
    /// Consent rendering of every registered scope
    pub scope_descriptions: Vec<ScopeDescription>,
    /// Token settings handed to the engine
    pub token_policy: TokenPolicy,
    /// Advisory compliance warnings, e.g. non-ESPI scopes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Client as returned by management reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientView {
    /// Public client identifier
    pub client_id: String,
    /// Display name
    pub client_name: String,
    /// Registered redirect URIs
    pub redirect_uris: Vec<String>,
    /// Registered grant types
    pub grant_types: Vec<GrantType>,
    /// Allowed token endpoint authentication methods
    pub token_endpoint_auth_methods: Vec<TokenEndpointAuthMethod>,
    /// Space-delimited registered scopes
    pub scope: String,
    /// Whether any registered scope is ESPI-specific
    pub espi_specific: bool,
    /// Current status
    pub status: ClientStatus,
    /// Reason recorded with the last status change
    pub status_reason: Option<String>,
    /// Whether retail customers must approve access
    pub require_consent: bool,
    /// Requests per minute
    pub rate_limit_per_minute: u32,
    /// Maximum concurrent sessions
    pub max_concurrent_sessions: u32,
    /// Consecutive authentication failures
    pub failure_count: u32,
    /// Lock expiry
    pub locked_until: Option<DateTime<Utc>>,
    /// Notification endpoint
    pub notify_uri: Option<String>,
    /// When the client id was issued
    pub issued_at: DateTime<Utc>,
    /// When the current secret expires
    pub secret_expires_at: Option<DateTime<Utc>>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl From<&RegisteredClient> for ClientView {
    fn from(client: &RegisteredClient) -> Self {
        Self {
            client_id: client.client_id.clone(),
            client_name: client.client_name.clone(),
            redirect_uris: client.redirect_uris.clone(),
            grant_types: client.grant_types.clone(),
            token_endpoint_auth_methods: client.auth_methods.clone(),
            scope: client.scope_string(),
            espi_specific: scopes::any_espi_specific(&client.scopes),
            status: client.status,
            status_reason: client.status_reason.clone(),
            require_consent: client.require_consent,
            rate_limit_per_minute: client.rate_limit_per_minute,
            max_concurrent_sessions: client.max_concurrent_sessions,
            failure_count: client.failure_count,
            locked_until: client.locked_until,
            notify_uri: client.notify_uri.clone(),
            issued_at: client.issued_at,
            secret_expires_at: client.secret_expires_at,
            updated_at: client.metadata.updated_at,
        }
    }
}

/// New secret returned once by a rotation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSecretRotation {
    /// Client identifier
    pub client_id: String,
    /// Plaintext secret
    pub client_secret: String,
    /// Secret expiry in seconds since the epoch, `0` when it never expires
    pub client_secret_expires_at: i64,
}

/// OAuth 2.0 error response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Error {
    /// Error code
    pub error: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    /// Reference URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

impl OAuth2Error {
    fn with_code(error: &str, description: impl Into<String>) -> Self {
        Self {
            error: error.to_owned(),
            error_description: Some(description.into()),
            error_uri: None,
        }
    }

    /// Registration metadata is invalid (RFC 7591 Section 3.2.2)
    #[must_use]
    pub fn invalid_client_metadata(description: impl Into<String>) -> Self {
        Self {
            error_uri: Some("https://datatracker.ietf.org/doc/html/rfc7591#section-3.2.2".to_owned()),
            ..Self::with_code("invalid_client_metadata", description)
        }
    }

    /// Malformed request outside registration metadata
    #[must_use]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::with_code("invalid_request", description)
    }

    /// Unknown client or failed client authentication
    #[must_use]
    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::with_code("invalid_client", description)
    }

    /// Certificate failed structural or temporal checks
    #[must_use]
    pub fn certificate_invalid(description: impl Into<String>) -> Self {
        Self::with_code("certificate_invalid", description)
    }

    /// Certificate revoked, or revocation status could not be established
    #[must_use]
    pub fn certificate_revoked(description: impl Into<String>) -> Self {
        Self::with_code("certificate_revoked", description)
    }

    /// Certificate fingerprint is not bound to an active certificate record
    #[must_use]
    pub fn no_client_for_certificate(description: impl Into<String>) -> Self {
        Self::with_code("no_client_for_certificate", description)
    }

    /// Client exists but is suspended, locked, or revoked
    #[must_use]
    pub fn client_inactive(description: impl Into<String>) -> Self {
        Self::with_code("client_inactive", description)
    }

    /// Unexpected failure
    #[must_use]
    pub fn server_error(description: impl Into<String>) -> Self {
        Self::with_code("server_error", description)
    }

    /// Retryable storage conflict
    #[must_use]
    pub fn temporarily_unavailable(description: impl Into<String>) -> Self {
        Self::with_code("temporarily_unavailable", description)
    }

    /// HTTP status for this error
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self.error.as_str() {
            "invalid_client_metadata" | "invalid_request" | "invalid_redirect_uri" => 400,
            "invalid_client" | "certificate_invalid" | "certificate_revoked"
            | "no_client_for_certificate" => 401,
            "client_inactive" => 403,
            "temporarily_unavailable" => 503,
            _ => 500,
        }
    }
}

impl fmt::Display for OAuth2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {description}", self.error),
            None => f.write_str(&self.error),
        }
    }
}

impl std::error::Error for OAuth2Error {}

impl From<AppError> for OAuth2Error {
    fn from(error: AppError) -> Self {
        match error.code {
            ErrorCode::ResourceAlreadyExists => Self::temporarily_unavailable(error.message),
            ErrorCode::InvalidInput | ErrorCode::MissingRequiredField => {
                Self::invalid_request(error.message)
            }
            ErrorCode::ResourceNotFound | ErrorCode::AuthInvalid => {
                Self::invalid_client(error.message)
            }
            ErrorCode::PermissionDenied | ErrorCode::InvalidStateTransition => {
                Self::client_inactive(error.message)
            }
            _ => {
                tracing::error!(code = ?error.code, message = %error.message, "Internal failure mapped to server_error");
                Self::server_error("The server encountered an unexpected condition")
            }
        }
    }
}

impl axum::response::IntoResponse for OAuth2Error {
    fn into_response(self) -> axum::response::Response {
        let status = axum::http::StatusCode::from_u16(self.http_status())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        (status, axum::Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_maps_to_retryable_error() {
        let error = OAuth2Error::from(AppError::conflict("client_id collision"));
        assert_eq!(error.error, "temporarily_unavailable");
        assert_eq!(error.http_status(), 503);
    }

    #[test]
    fn test_internal_details_are_not_leaked() {
        let error = OAuth2Error::from(AppError::database("disk I/O error at page 7"));
        assert_eq!(error.error, "server_error");
        assert!(!error.to_string().contains("page 7"));
    }

    #[test]
    fn test_error_body_shape() {
        let json = serde_json::to_value(OAuth2Error::invalid_client_metadata("client_name is required")).unwrap();
        assert_eq!(json["error"], "invalid_client_metadata");
        assert_eq!(json["error_description"], "client_name is required");
    }
}
