// ABOUTME: Revocation collaborator contract (CRL/OCSP) and a static revocation list
// ABOUTME: Callers treat any checker error as revoked
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use super::CertificateInfo;
use async_trait::async_trait;
use dashmap::DashSet;
use greenbutton_core::errors::AppResult;

/// Answers whether a certificate has been revoked by its issuer
#[async_trait]
pub trait RevocationChecker: Send + Sync {
    /// `Ok(true)` when revoked; an error means the status is unknown
    async fn is_revoked(&self, certificate: &CertificateInfo) -> AppResult<bool>;
}

/// Revocation list held in memory, keyed by serial number
#[derive(Debug, Default)]
pub struct StaticRevocationList {
    serials: DashSet<String>,
}

impl StaticRevocationList {
    /// Create an empty list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a serial number revoked
    pub fn revoke_serial(&self, serial_number: &str) {
        self.serials.insert(normalize_serial(serial_number));
    }
}

#[async_trait]
impl RevocationChecker for StaticRevocationList {
    async fn is_revoked(&self, certificate: &CertificateInfo) -> AppResult<bool> {
        Ok(self
            .serials
            .contains(&normalize_serial(&certificate.serial_number)))
    }
}

fn normalize_serial(serial: &str) -> String {
    serial.replace(':', "").to_ascii_lowercase()
}
