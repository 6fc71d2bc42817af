// ABOUTME: Client certificate record keyed by SHA-256 fingerprint
// ABOUTME: Superseded certificates are marked revoked rather than deleted
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use super::RecordMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Revocation reason recorded when a new upload replaces the active certificate
pub const SUPERSEDED_REASON: &str = "superseded";

/// Certificate status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    /// Used for client authentication
    Active,
    /// Superseded or revoked by an administrator
    Revoked,
}

impl CertificateStatus {
    /// Stored name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertificateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "revoked" => Ok(Self::Revoked),
            other => Err(format!("unknown certificate status: {other}")),
        }
    }
}

/// Stored client certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Internal id and timestamps
    pub metadata: RecordMetadata,
    /// Owning client
    pub client_id: String,
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
    /// Lowercase hex SHA-256 of the DER encoding
    pub fingerprint: String,
    /// Current status
    pub status: CertificateStatus,
    /// Why the certificate was revoked
    pub revocation_reason: Option<String>,
    /// When the certificate was revoked
    pub revoked_at: Option<DateTime<Utc>>,
    /// Identity of the uploader
    pub uploaded_by: String,
}
