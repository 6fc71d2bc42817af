// ABOUTME: Certificate routes for upload, listing, revocation, and mutual-TLS validation
// ABOUTME: Accepts PEM text or base64-encoded DER in JSON bodies
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use crate::certificates::CertificateValidation;
use crate::middleware::require_admin;
use crate::resources::ServerResources;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use greenbutton_core::errors::AppError;
use greenbutton_core::models::CertificateRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Body carrying a certificate
#[derive(Debug, Deserialize)]
pub struct CertificateUploadRequest {
    /// PEM text, or DER encoded as standard base64
    pub certificate: String,
    /// Administrator performing the upload
    pub uploaded_by: String,
}

/// Body of a validation request
#[derive(Debug, Deserialize)]
pub struct CertificateValidateRequest {
    /// PEM text, or DER encoded as standard base64
    pub certificate: String,
}

/// Body of a revocation request
#[derive(Debug, Deserialize)]
pub struct CertificateRevokeRequest {
    /// SHA-256 fingerprint, with or without separators
    pub fingerprint: String,
    /// Reason stored with the revocation
    #[serde(default)]
    pub reason: Option<String>,
}

/// Revocation acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct CertificateRevokeResponse {
    /// Always `true`; revoking an unknown certificate succeeds
    pub revoked: bool,
    /// Whether a stored certificate changed state
    pub changed: bool,
}

/// Certificate routes implementation
pub struct CertificateRoutes;

impl CertificateRoutes {
    /// Create all certificate routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(
                "/admin/clients/:client_id/certificates",
                get(Self::handle_list).post(Self::handle_upload),
            )
            .route("/certificates/revoke", post(Self::handle_revoke))
            .route("/certificates/validate", post(Self::handle_validate))
            .route_layer(middleware::from_fn_with_state(
                Arc::clone(&resources),
                require_admin,
            ))
            .with_state(resources)
    }

    async fn handle_upload(
        State(resources): State<Arc<ServerResources>>,
        Path(client_id): Path<String>,
        Json(request): Json<CertificateUploadRequest>,
    ) -> Result<(StatusCode, Json<CertificateRecord>), AppError> {
        let bytes = decode_certificate_body(&request.certificate)?;
        let record = resources
            .certificates
            .upload(&client_id, &bytes, &request.uploaded_by)
            .await?;
        Ok((StatusCode::CREATED, Json(record)))
    }

    async fn handle_list(
        State(resources): State<Arc<ServerResources>>,
        Path(client_id): Path<String>,
    ) -> Result<Json<Vec<CertificateRecord>>, AppError> {
        // Unknown clients are a 404 rather than an empty history
        resources.registry.get(&client_id).await?;
        Ok(Json(resources.certificates.list(&client_id).await?))
    }

    async fn handle_revoke(
        State(resources): State<Arc<ServerResources>>,
        Json(request): Json<CertificateRevokeRequest>,
    ) -> Result<Json<CertificateRevokeResponse>, AppError> {
        let changed = resources
            .certificates
            .revoke(&request.fingerprint, request.reason.as_deref())
            .await?;
        Ok(Json(CertificateRevokeResponse {
            revoked: true,
            changed,
        }))
    }

    async fn handle_validate(
        State(resources): State<Arc<ServerResources>>,
        Json(request): Json<CertificateValidateRequest>,
    ) -> Json<CertificateValidation> {
        // Undecodable base64 is passed through as raw bytes and rejected as malformed
        let bytes = decode_certificate_body(&request.certificate)
            .unwrap_or_else(|_| request.certificate.into_bytes());
        Json(resources.certificates.validate(&bytes).await)
    }
}

/// PEM text is passed through; anything else must be base64 DER
fn decode_certificate_body(body: &str) -> Result<Vec<u8>, AppError> {
    let trimmed = body.trim();
    if trimmed.starts_with("-----BEGIN") {
        return Ok(trimmed.as_bytes().to_vec());
    }
    let compact: String = trimmed.split_whitespace().collect();
    STANDARD
        .decode(compact)
        .map_err(|e| AppError::invalid_input(format!("certificate is neither PEM nor base64 DER: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pem_passes_through() {
        let pem = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        let bytes = decode_certificate_body(pem).unwrap();
        assert!(bytes.starts_with(b"-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn test_base64_der_is_decoded() {
        assert_eq!(decode_certificate_body("MIIB\nAA==").unwrap(), vec![0x30, 0x82, 0x01, 0x00]);
    }

    #[test]
    fn test_garbage_is_invalid_input() {
        assert!(decode_certificate_body("not a certificate!").is_err());
    }
}
