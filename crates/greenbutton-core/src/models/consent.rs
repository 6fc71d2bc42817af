// ABOUTME: Consent ledger record keyed by client and principal
// ABOUTME: Holds the cumulative approved set and the latest decision's denied set
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use super::RecordMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Stored consent decision for one `(client_id, principal_name)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Internal id and timestamps
    pub metadata: RecordMetadata,
    /// Third Party client
    pub client_id: String,
    /// Retail customer
    pub principal_name: String,
    /// Every scope approved so far
    pub approved_scopes: BTreeSet<String>,
    /// Scopes denied in the most recent decision only
    pub denied_scopes: BTreeSet<String>,
    /// Derived from `approved_scopes` on every write
    pub espi_specific: bool,
    /// When the most recent decision was made
    pub decided_at: DateTime<Utc>,
}
