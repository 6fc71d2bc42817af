// ABOUTME: X.509 client certificate trust store with fingerprint binding and fail-safe revocation
// ABOUTME: Every validation outcome is audited with subject, serial, and resolved client
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! # Certificate Trust Store
//!
//! Validation short-circuits on the first failure:
//!
//! 1. structure: X.509 v3, digital signature key usage when the extension is
//!    present, and every administrator-required extension OID
//! 2. validity window
//! 3. revocation (when enabled); an erroring or missing checker counts as revoked
//! 4. SHA-256 fingerprint bound to an active certificate record
//! 5. owning client is active

/// SHA-256 fingerprinting
pub mod fingerprint;
/// Revocation collaborator contract
pub mod revocation;

pub use revocation::{RevocationChecker, StaticRevocationList};

use crate::database::Database;
use crate::oauth2_server::OAuth2Error;
use crate::security::audit::{AuditEvent, AuditEventType, AuditSeverity, SecurityAuditor};
use chrono::{DateTime, Utc};
use greenbutton_core::errors::{AppError, AppResult};
use greenbutton_core::models::{
    CertificateRecord, CertificateStatus, ClientStatus, RecordMetadata,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use x509_parser::prelude::*;

/// Administrator trust settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificatePolicy {
    /// Consult the revocation checker on every validation
    pub check_revocation: bool,
    /// Extension OIDs (dotted form) every certificate must carry
    pub required_extensions: Vec<String>,
}

/// Why a certificate was not trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateFailure {
    /// Not decodable as PEM or DER X.509
    Malformed,
    /// Older than X.509 v3
    UnsupportedVersion,
    /// Key usage present without digital signature
    KeyUsage,
    /// A required extension is absent
    MissingExtension,
    /// Before `notBefore`
    NotYetValid,
    /// After `notAfter`
    Expired,
    /// Revoked by the issuer or by an administrator, or status unknown
    Revoked,
    /// Fingerprint not bound to any certificate record
    NoClient,
    /// Owning client is not active
    ClientInactive,
    /// Store lookup failed
    Unavailable,
}

impl CertificateFailure {
    /// OAuth error code reported for this failure
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Malformed
            | Self::UnsupportedVersion
            | Self::KeyUsage
            | Self::MissingExtension
            | Self::NotYetValid
            | Self::Expired => "certificate_invalid",
            Self::Revoked => "certificate_revoked",
            Self::NoClient => "no_client_for_certificate",
            Self::ClientInactive => "client_inactive",
            Self::Unavailable => "server_error",
        }
    }
}

/// Fields extracted from a parsed certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    /// Serial number as colon-separated hex
    pub serial_number: String,
    /// Subject distinguished name
    pub subject_dn: String,
    /// Issuer distinguished name
    pub issuer_dn: String,
    /// Start of validity
    pub not_before: DateTime<Utc>,
    /// End of validity
    pub not_after: DateTime<Utc>,
    /// SHA-256 over the DER encoding
    pub fingerprint: String,
}

/// Result of [`CertificateTrustStore::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateValidation {
    /// Whether the certificate is trusted
    pub valid: bool,
    /// Owning client when resolved
    pub client_id: Option<String>,
    /// Certificate fields when the certificate could be parsed
    pub certificate: Option<CertificateInfo>,
    /// Failure category
    pub failure: Option<CertificateFailure>,
    /// Failure detail
    pub reason: Option<String>,
}

impl CertificateValidation {
    fn trusted(info: CertificateInfo, client_id: String) -> Self {
        Self {
            valid: true,
            client_id: Some(client_id),
            certificate: Some(info),
            failure: None,
            reason: None,
        }
    }

    fn rejected(
        info: Option<CertificateInfo>,
        client_id: Option<String>,
        failure: CertificateFailure,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            valid: false,
            client_id,
            certificate: info,
            failure: Some(failure),
            reason: Some(reason.into()),
        }
    }

    /// The owning client id, or the matching OAuth error
    ///
    /// # Errors
    ///
    /// Returns the error for the failure category when not valid
    pub fn into_client_id(self) -> Result<String, OAuth2Error> {
        match (self.valid, self.client_id, self.failure) {
            (true, Some(client_id), _) => Ok(client_id),
            (_, _, failure) => {
                let reason = self.reason.unwrap_or_default();
                Err(match failure.unwrap_or(CertificateFailure::Malformed) {
                    CertificateFailure::Revoked => OAuth2Error::certificate_revoked(reason),
                    CertificateFailure::NoClient => OAuth2Error::no_client_for_certificate(reason),
                    CertificateFailure::ClientInactive => OAuth2Error::client_inactive(reason),
                    CertificateFailure::Unavailable => OAuth2Error::server_error(reason),
                    _ => OAuth2Error::certificate_invalid(reason),
                })
            }
        }
    }
}

/// Decode PEM or raw DER into DER bytes
fn decode_der(bytes: &[u8]) -> Result<Vec<u8>, String> {
    if bytes.trim_ascii_start().starts_with(b"-----BEGIN") {
        let (_, pem) = parse_x509_pem(bytes.trim_ascii_start())
            .map_err(|e| format!("Failed to parse PEM certificate: {e}"))?;
        Ok(pem.contents)
    } else {
        Ok(bytes.to_vec())
    }
}

fn asn1_to_utc(time: &ASN1Time) -> Result<DateTime<Utc>, String> {
    DateTime::from_timestamp(time.timestamp(), 0)
        .ok_or_else(|| format!("Certificate time {time} is out of range"))
}

type Problem = (CertificateFailure, String);

/// Parse a certificate and run the structural and temporal checks
///
/// `Err` means the bytes are not a certificate at all.
fn examine(
    der: &[u8],
    policy: &CertificatePolicy,
    now: DateTime<Utc>,
) -> Result<(CertificateInfo, Option<Problem>), String> {
    let (rest, cert) = X509Certificate::from_der(der)
        .map_err(|e| format!("Failed to parse X.509 certificate: {e}"))?;
    // the fingerprint covers the whole input, so padding would mint a new one
    if !rest.is_empty() {
        return Err(format!(
            "Certificate is followed by {} unexpected trailing bytes",
            rest.len()
        ));
    }

    let info = CertificateInfo {
        serial_number: cert.raw_serial_as_string(),
        subject_dn: cert.subject().to_string(),
        issuer_dn: cert.issuer().to_string(),
        not_before: asn1_to_utc(&cert.validity().not_before)?,
        not_after: asn1_to_utc(&cert.validity().not_after)?,
        fingerprint: fingerprint::fingerprint(der),
    };

    let problem = check_structure(&cert, policy)
        .err()
        .or_else(|| check_validity(&info, now).err());
    Ok((info, problem))
}

fn check_structure(cert: &X509Certificate<'_>, policy: &CertificatePolicy) -> Result<(), Problem> {
    // X.509 version field is zero-based: 2 means v3
    if cert.version().0 < 2 {
        return Err((
            CertificateFailure::UnsupportedVersion,
            format!("X.509 version {} is not supported, v3 required", cert.version().0 + 1),
        ));
    }

    match cert.key_usage() {
        Ok(Some(key_usage)) if !key_usage.value.digital_signature() => {
            return Err((
                CertificateFailure::KeyUsage,
                "key usage does not permit digital signatures".to_owned(),
            ));
        }
        Ok(_) => {}
        Err(e) => {
            return Err((
                CertificateFailure::Malformed,
                format!("key usage extension is invalid: {e}"),
            ));
        }
    }

    let present: Vec<String> = cert
        .extensions()
        .iter()
        .map(|ext| ext.oid.to_id_string())
        .collect();
    if let Some(missing) = policy
        .required_extensions
        .iter()
        .find(|oid| !present.contains(oid))
    {
        return Err((
            CertificateFailure::MissingExtension,
            format!("required extension {missing} is missing"),
        ));
    }

    Ok(())
}

fn check_validity(info: &CertificateInfo, now: DateTime<Utc>) -> Result<(), Problem> {
    if now < info.not_before {
        return Err((
            CertificateFailure::NotYetValid,
            format!("certificate is not valid before {}", info.not_before),
        ));
    }
    if now > info.not_after {
        return Err((
            CertificateFailure::Expired,
            format!("certificate expired at {}", info.not_after),
        ));
    }
    Ok(())
}

/// Certificate-based client trust
#[derive(Clone)]
pub struct CertificateTrustStore {
    database: Database,
    auditor: SecurityAuditor,
    policy: CertificatePolicy,
    revocation: Option<Arc<dyn RevocationChecker>>,
}

impl CertificateTrustStore {
    /// Create a trust store without a revocation checker
    #[must_use]
    pub const fn new(database: Database, auditor: SecurityAuditor, policy: CertificatePolicy) -> Self {
        Self {
            database,
            auditor,
            policy,
            revocation: None,
        }
    }

    /// Attach a revocation checker
    #[must_use]
    pub fn with_revocation_checker(mut self, checker: Arc<dyn RevocationChecker>) -> Self {
        self.revocation = Some(checker);
        self
    }

    /// Active trust policy
    #[must_use]
    pub const fn policy(&self) -> &CertificatePolicy {
        &self.policy
    }

    /// Validate a PEM or DER certificate against the current time
    pub async fn validate(&self, certificate: &[u8]) -> CertificateValidation {
        self.validate_at(certificate, Utc::now()).await
    }

    /// Validate a PEM or DER certificate as of `now`
    pub async fn validate_at(&self, certificate: &[u8], now: DateTime<Utc>) -> CertificateValidation {
        let outcome = self.evaluate(certificate, now).await;

        let info = outcome.certificate.as_ref();
        let mut event = AuditEvent::new(
            AuditEventType::CertificateValidated,
            if outcome.valid {
                AuditSeverity::Info
            } else {
                AuditSeverity::Warning
            },
            if outcome.valid {
                "Client certificate validated".to_owned()
            } else {
                format!(
                    "Client certificate rejected: {}",
                    outcome.reason.as_deref().unwrap_or("unknown")
                )
            },
        )
        .with_success(outcome.valid)
        .with_payload(json!({
            "subject_dn": info.map(|i| i.subject_dn.as_str()),
            "serial_number": info.map(|i| i.serial_number.as_str()),
            "fingerprint": info.map(|i| i.fingerprint.as_str()),
            "client_id": outcome.client_id,
            "error": outcome.failure.map(CertificateFailure::code),
            "reason": outcome.reason,
        }));
        if let Some(client_id) = &outcome.client_id {
            event = event.with_client_id(client_id);
        }
        self.auditor.log_event(event).await;

        outcome
    }

    async fn evaluate(&self, certificate: &[u8], now: DateTime<Utc>) -> CertificateValidation {
        let (info, problem) = match decode_der(certificate)
            .and_then(|der| examine(&der, &self.policy, now))
        {
            Ok(examined) => examined,
            Err(reason) => {
                return CertificateValidation::rejected(None, None, CertificateFailure::Malformed, reason)
            }
        };
        if let Some((failure, reason)) = problem {
            return CertificateValidation::rejected(Some(info), None, failure, reason);
        }

        if self.policy.check_revocation {
            let revoked = match &self.revocation {
                None => Err("revocation checking is enabled but no checker is configured".to_owned()),
                Some(checker) => checker
                    .is_revoked(&info)
                    .await
                    .map_err(|e| format!("revocation status unavailable: {e}")),
            };
            match revoked {
                Ok(false) => {}
                Ok(true) => {
                    return CertificateValidation::rejected(
                        Some(info),
                        None,
                        CertificateFailure::Revoked,
                        "certificate has been revoked by its issuer",
                    );
                }
                Err(reason) => {
                    warn!(serial = %info.serial_number, reason = %reason, "Revocation check failed, treating certificate as revoked");
                    return CertificateValidation::rejected(
                        Some(info),
                        None,
                        CertificateFailure::Revoked,
                        reason,
                    );
                }
            }
        }

        let record = match self.database.get_certificate_by_fingerprint(&info.fingerprint).await {
            Ok(record) => record,
            Err(e) => {
                return CertificateValidation::rejected(
                    Some(info),
                    None,
                    CertificateFailure::Unavailable,
                    format!("certificate lookup failed: {e}"),
                );
            }
        };
        let record = match record {
            None => {
                return CertificateValidation::rejected(
                    Some(info),
                    None,
                    CertificateFailure::NoClient,
                    "no client is associated with this certificate",
                );
            }
            Some(record) if record.status == CertificateStatus::Revoked => {
                let reason = format!(
                    "certificate was revoked: {}",
                    record.revocation_reason.as_deref().unwrap_or("unspecified")
                );
                return CertificateValidation::rejected(
                    Some(info),
                    Some(record.client_id),
                    CertificateFailure::Revoked,
                    reason,
                );
            }
            Some(record) => record,
        };

        match self.database.get_client(&record.client_id).await {
            Ok(Some(client)) if client.status == ClientStatus::Active => {
                CertificateValidation::trusted(info, client.client_id)
            }
            Ok(Some(client)) => {
                let reason = format!("client {} is {}", client.client_id, client.status);
                CertificateValidation::rejected(
                    Some(info),
                    Some(client.client_id),
                    CertificateFailure::ClientInactive,
                    reason,
                )
            }
            Ok(None) => CertificateValidation::rejected(
                Some(info),
                None,
                CertificateFailure::NoClient,
                "certificate owner no longer exists",
            ),
            Err(e) => CertificateValidation::rejected(
                Some(info),
                Some(record.client_id),
                CertificateFailure::Unavailable,
                format!("client lookup failed: {e}"),
            ),
        }
    }

    /// Store a new certificate for `client_id`, superseding its active one
    ///
    /// # Errors
    ///
    /// Returns not-found for an unknown client, an invalid transition for a
    /// revoked client, invalid input when the certificate fails the
    /// structural or validity checks, and a conflict for a duplicate fingerprint
    pub async fn upload(
        &self,
        client_id: &str,
        certificate: &[u8],
        uploaded_by: &str,
    ) -> AppResult<CertificateRecord> {
        let client = self
            .database
            .get_client(client_id)
            .await?
            .ok_or_else(|| AppError::not_found("Client").with_resource_id(client_id))?;
        if client.status == ClientStatus::Revoked {
            return Err(AppError::invalid_transition(format!(
                "Client {client_id} is revoked and cannot receive certificates"
            )));
        }

        let now = Utc::now();
        let (info, problem) = decode_der(certificate)
            .and_then(|der| examine(&der, &self.policy, now))
            .map_err(AppError::invalid_input)?;
        if let Some((failure, reason)) = problem {
            return Err(AppError::invalid_input(format!("{}: {reason}", failure.code())));
        }

        let record = CertificateRecord {
            metadata: RecordMetadata::new(now),
            client_id: client_id.to_owned(),
            serial_number: info.serial_number,
            subject_dn: info.subject_dn,
            issuer_dn: info.issuer_dn,
            not_before: info.not_before,
            not_after: info.not_after,
            fingerprint: info.fingerprint,
            status: CertificateStatus::Active,
            revocation_reason: None,
            revoked_at: None,
            uploaded_by: uploaded_by.to_owned(),
        };
        let superseded = self.database.insert_certificate_superseding(&record, now).await?;

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::CertificateUploaded,
                    AuditSeverity::Info,
                    format!("Certificate uploaded for client {client_id}"),
                )
                .with_client_id(client_id)
                .with_payload(json!({
                    "fingerprint": record.fingerprint,
                    "serial_number": record.serial_number,
                    "subject_dn": record.subject_dn,
                    "uploaded_by": uploaded_by,
                    "superseded": superseded,
                })),
            )
            .await;

        info!(client_id, fingerprint = %record.fingerprint, ?superseded, "Stored client certificate");
        Ok(record)
    }

    /// Revoke a certificate by fingerprint
    ///
    /// Idempotent: an unknown or already revoked fingerprint succeeds and
    /// returns `false`.
    ///
    /// # Errors
    ///
    /// Returns a store failure
    pub async fn revoke(&self, fingerprint: &str, reason: Option<&str>) -> AppResult<bool> {
        let fingerprint = fingerprint::normalize(fingerprint);
        let reason = reason.unwrap_or("revoked by administrator");
        let owner = match self.database.get_certificate_by_fingerprint(&fingerprint).await {
            Ok(record) => record.map(|record| record.client_id),
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "Certificate owner lookup failed before revocation");
                None
            }
        };
        let result = self
            .database
            .revoke_certificate(&fingerprint, reason, Utc::now())
            .await;

        let mut event = AuditEvent::new(
            AuditEventType::CertificateRevoked,
            AuditSeverity::Warning,
            format!("Certificate {fingerprint} revoked"),
        )
        .with_success(result.is_ok())
        .with_payload(json!({
            "fingerprint": fingerprint,
            "reason": reason,
            "changed": result.as_ref().ok(),
            "error": result.as_ref().err().map(ToString::to_string),
        }));
        if let Some(client_id) = &owner {
            event = event.with_client_id(client_id);
        }
        self.auditor.log_event(event).await;

        result
    }

    /// Every certificate of a client, including revoked history
    ///
    /// # Errors
    ///
    /// Returns a store failure
    pub async fn list(&self, client_id: &str) -> AppResult<Vec<CertificateRecord>> {
        self.database.list_certificates(client_id).await
    }
}
