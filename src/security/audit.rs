// ABOUTME: Security audit logging for client registration, consent, and certificate trust
// ABOUTME: Append-only trail; store failures are reported to the operational log and swallowed
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! # Security Audit Module
//!
//! Every security-relevant action appends one [`AuditEvent`]. Events are
//! written to the structured log first and then to the [`AuditStore`]. A
//! failed store write is logged with `tracing::error!` and otherwise ignored,
//! so an audit outage never fails or rolls back a registration, consent, or
//! certificate action.
//!
//! Events are never updated. The only deletion path is [`SecurityAuditor::prune`],
//! which removes events older than the retention horizon.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use greenbutton_core::constants::retention::AUDIT_RETENTION_DAYS;
use greenbutton_core::errors::AppResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Types of audit events tracked by the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Client registry
    ClientRegistered,
    ClientUpdated,
    ClientDeleted,
    ClientSecretRotated,

    // Lifecycle
    ClientSuspended,
    ClientActivated,
    ClientRevoked,
    ClientLockedOut,

    // Authentication
    AuthenticationSucceeded,
    AuthenticationFailed,

    // Consent
    ConsentGranted,
    ConsentDenied,
    ConsentRevoked,

    // Certificate trust
    CertificateUploaded,
    CertificateRevoked,
    CertificateValidated,

    // Token engine and resource server
    TokenIssued,
    ResourceAccessed,

    // Administrative
    BulkOperation,
    NotificationFailed,
}

impl AuditEventType {
    /// Every event type
    pub const ALL: [Self; 20] = [
        Self::ClientRegistered,
        Self::ClientUpdated,
        Self::ClientDeleted,
        Self::ClientSecretRotated,
        Self::ClientSuspended,
        Self::ClientActivated,
        Self::ClientRevoked,
        Self::ClientLockedOut,
        Self::AuthenticationSucceeded,
        Self::AuthenticationFailed,
        Self::ConsentGranted,
        Self::ConsentDenied,
        Self::ConsentRevoked,
        Self::CertificateUploaded,
        Self::CertificateRevoked,
        Self::CertificateValidated,
        Self::TokenIssued,
        Self::ResourceAccessed,
        Self::BulkOperation,
        Self::NotificationFailed,
    ];

    /// Stored name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientRegistered => "client_registered",
            Self::ClientUpdated => "client_updated",
            Self::ClientDeleted => "client_deleted",
            Self::ClientSecretRotated => "client_secret_rotated",
            Self::ClientSuspended => "client_suspended",
            Self::ClientActivated => "client_activated",
            Self::ClientRevoked => "client_revoked",
            Self::ClientLockedOut => "client_locked_out",
            Self::AuthenticationSucceeded => "authentication_succeeded",
            Self::AuthenticationFailed => "authentication_failed",
            Self::ConsentGranted => "consent_granted",
            Self::ConsentDenied => "consent_denied",
            Self::ConsentRevoked => "consent_revoked",
            Self::CertificateUploaded => "certificate_uploaded",
            Self::CertificateRevoked => "certificate_revoked",
            Self::CertificateValidated => "certificate_validated",
            Self::TokenIssued => "token_issued",
            Self::ResourceAccessed => "resource_accessed",
            Self::BulkOperation => "bulk_operation",
            Self::NotificationFailed => "notification_failed",
        }
    }

    /// Whether the event counts as a request in daily metrics
    #[must_use]
    pub const fn is_request(self) -> bool {
        matches!(
            self,
            Self::AuthenticationSucceeded
                | Self::AuthenticationFailed
                | Self::TokenIssued
                | Self::ResourceAccessed
        )
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| format!("unknown audit event type: {s}"))
    }
}

/// Severity levels for audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AuditSeverity {
    /// Stored name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for AuditSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown audit severity: {other}")),
        }
    }
}

/// Security audit event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event identifier
    pub event_id: Uuid,
    /// Type of audit event
    pub event_type: AuditEventType,
    /// Severity level
    pub severity: AuditSeverity,
    /// Timestamp of the event
    pub timestamp: DateTime<Utc>,
    /// Client the event concerns
    pub client_id: Option<String>,
    /// Retail customer the event concerns
    pub principal_name: Option<String>,
    /// Whether the audited action succeeded
    pub success: bool,
    /// Event description
    pub description: String,
    /// Structured event payload
    pub payload: serde_json::Value,
}

impl AuditEvent {
    /// Create a successful event stamped with the current time
    #[must_use]
    pub fn new(
        event_type: AuditEventType,
        severity: AuditSeverity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            severity,
            timestamp: Utc::now(),
            client_id: None,
            principal_name: None,
            success: true,
            description: description.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Set the client id
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the retail customer
    #[must_use]
    pub fn with_principal(mut self, principal_name: impl Into<String>) -> Self {
        self.principal_name = Some(principal_name.into());
        self
    }

    /// Set the outcome
    #[must_use]
    pub const fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    /// Attach a structured payload
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Override the timestamp
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Filters for [`SecurityAuditor::query`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    /// Only events for this client
    pub client_id: Option<String>,
    /// Only events for this principal
    pub principal_name: Option<String>,
    /// Only these event types; empty means all
    #[serde(default)]
    pub event_types: Vec<AuditEventType>,
    /// Only events with this outcome
    pub success: Option<bool>,
    /// Inclusive lower bound
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of events, newest first when set
    pub limit: Option<u32>,
}

/// Persistent storage for audit events
///
/// Exposes no update or single-event delete operation.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one event
    async fn append(&self, event: &AuditEvent) -> AppResult<()>;

    /// Events matching `query`, ordered by timestamp
    async fn query(&self, query: &AuditQuery) -> AppResult<Vec<AuditEvent>>;

    /// Delete events strictly older than `cutoff`, returning the count
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
}

/// Audit logger for security events
#[derive(Clone)]
pub struct SecurityAuditor {
    store: Arc<dyn AuditStore>,
    retention_days: i64,
}

impl SecurityAuditor {
    /// Create an auditor with the default retention horizon
    #[must_use]
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            retention_days: AUDIT_RETENTION_DAYS,
        }
    }

    /// Override the retention horizon
    #[must_use]
    pub const fn with_retention_days(mut self, retention_days: i64) -> Self {
        self.retention_days = retention_days;
        self
    }

    /// Log an audit event
    ///
    /// Never fails; store errors go to the operational log only.
    pub async fn log_event(&self, event: AuditEvent) {
        match event.severity {
            AuditSeverity::Info => tracing::info!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                client_id = ?event.client_id,
                principal = ?event.principal_name,
                success = event.success,
                "Security audit event: {}",
                event.description
            ),
            AuditSeverity::Warning => tracing::warn!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                client_id = ?event.client_id,
                principal = ?event.principal_name,
                success = event.success,
                "Security audit warning: {}",
                event.description
            ),
            AuditSeverity::Error => tracing::error!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                client_id = ?event.client_id,
                principal = ?event.principal_name,
                success = event.success,
                "Security audit error: {}",
                event.description
            ),
            AuditSeverity::Critical => tracing::error!(
                target: "security_alert",
                event_id = %event.event_id,
                event_type = %event.event_type,
                client_id = ?event.client_id,
                principal = ?event.principal_name,
                success = event.success,
                "CRITICAL security audit event: {}",
                event.description
            ),
        }

        if let Err(e) = self.store.append(&event).await {
            tracing::error!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                error = %e,
                "Failed to persist audit event"
            );
        }
    }

    /// Query stored events
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails
    pub async fn query(&self, query: &AuditQuery) -> AppResult<Vec<AuditEvent>> {
        self.store.query(query).await
    }

    /// Delete events older than the retention horizon relative to `now`
    ///
    /// # Errors
    ///
    /// Returns an error if the store delete fails
    pub async fn prune(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let cutoff = now - Duration::days(self.retention_days);
        let removed = self.store.prune_before(cutoff).await?;
        tracing::info!(removed, cutoff = %cutoff, "Pruned audit events past retention");
        Ok(removed)
    }

    /// Record a token issuance reported by the token engine
    pub async fn log_token_issued(&self, client_id: &str, principal_name: Option<&str>, scope: &str) {
        let mut event = AuditEvent::new(
            AuditEventType::TokenIssued,
            AuditSeverity::Info,
            format!("Access token issued to {client_id}"),
        )
        .with_client_id(client_id)
        .with_payload(serde_json::json!({ "scope": scope }));
        if let Some(principal) = principal_name {
            event = event.with_principal(principal);
        }
        self.log_event(event).await;
    }

    /// Record a protected resource request reported by the resource server
    pub async fn log_resource_access(
        &self,
        client_id: &str,
        principal_name: Option<&str>,
        resource_uri: &str,
        espi_specific: bool,
        success: bool,
    ) {
        let severity = if success {
            AuditSeverity::Info
        } else {
            AuditSeverity::Warning
        };
        let mut event = AuditEvent::new(
            AuditEventType::ResourceAccessed,
            severity,
            format!("Resource {resource_uri} accessed by {client_id}"),
        )
        .with_client_id(client_id)
        .with_success(success)
        .with_payload(serde_json::json!({
            "resource_uri": resource_uri,
            "espi_specific": espi_specific,
        }));
        if let Some(principal) = principal_name {
            event = event.with_principal(principal);
        }
        self.log_event(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trips_through_storage_name() {
        for event_type in AuditEventType::ALL {
            assert_eq!(event_type.as_str().parse::<AuditEventType>(), Ok(event_type));
        }
    }

    #[test]
    fn test_serde_name_matches_storage_name() {
        let json = serde_json::to_string(&AuditEventType::ClientLockedOut).unwrap();
        assert_eq!(json, "\"client_locked_out\"");
    }

    #[test]
    fn test_request_events() {
        assert!(AuditEventType::TokenIssued.is_request());
        assert!(AuditEventType::AuthenticationFailed.is_request());
        assert!(!AuditEventType::ConsentGranted.is_request());
    }
}
