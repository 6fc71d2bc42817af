// ABOUTME: Persisted record models for clients, certificates, consent, and daily metrics
// ABOUTME: Records share a RecordMetadata value instead of an inherited base entity
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

/// Registered Third Party client records and their enums
pub mod client;
/// Client certificate records
pub mod certificate;
/// Consent ledger records
pub mod consent;
/// Daily per-client metrics
pub mod metrics;

pub use certificate::{CertificateRecord, CertificateStatus};
pub use client::{ClientStatus, GrantType, RegisteredClient, TokenEndpointAuthMethod};
pub use consent::ConsentRecord;
pub use metrics::{ClientMetricDaily, MetricsSummary};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bookkeeping fields embedded by value in every persisted record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Internal identifier, never exposed as a protocol identifier
    pub id: Uuid,
    /// When the record was first stored
    pub created_at: DateTime<Utc>,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
    /// Optional free-text description
    pub description: Option<String>,
}

impl RecordMetadata {
    /// Fresh metadata stamped with `now`
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            description: None,
        }
    }

    /// Mark the record as written at `now`
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}
