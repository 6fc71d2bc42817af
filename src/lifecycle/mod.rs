// ABOUTME: Client status state machine with automatic lockout and bulk operations
// ABOUTME: Every transition is audited, including transitions whose store or engine call failed
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! # Client Lifecycle
//!
//! `active -> suspended` happens on an administrator action or on automatic
//! lockout after repeated authentication failures. `suspended -> active` only
//! happens on explicit reactivation, which also clears the failure counter and
//! lock. `revoked` is terminal.
//!
//! Administrator transitions update the token engine before the store so the
//! engine never issues tokens to a client the store already considers
//! suspended. Automatic lockout writes the store first and syncs the engine
//! afterwards; an engine failure there is logged and does not undo the lock.
//!
//! Status writes are conditional on the status read at the start of the
//! operation. A transition that lost a race is reported as a conflict and the
//! engine is resynced to whatever the store holds.

use crate::cache::{client_view_key, CacheProvider};
use crate::database::{Database, StatusTransition};
use crate::metrics::MetricsAggregator;
use crate::oauth2_server::token_engine::call_engine;
use crate::oauth2_server::{ClientView, TokenIssuanceEngine};
use crate::security::audit::{AuditEvent, AuditEventType, AuditSeverity, SecurityAuditor};
use chrono::{DateTime, NaiveDate, Utc};
use greenbutton_core::constants::lifecycle::{DEFAULT_LOCKOUT_MINUTES, DEFAULT_MAX_FAILURES};
use greenbutton_core::constants::registration::DEFAULT_TOKEN_ENGINE_TIMEOUT_SECS;
use greenbutton_core::errors::{AppError, AppResult};
use greenbutton_core::models::{ClientStatus, MetricsSummary, RegisteredClient};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Shared cache of client views, invalidated on every client mutation
pub type ClientViewCache = Arc<dyn CacheProvider<ClientView>>;

/// Days of metrics included in [`ClientHealth`]
const HEALTH_WINDOW_DAYS: i64 = 7;

/// Automatic lockout threshold and duration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures that trigger suspension
    pub max_failures: u32,
    /// Lock length applied on automatic suspension
    pub lockout_minutes: i64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_MAX_FAILURES,
            lockout_minutes: DEFAULT_LOCKOUT_MINUTES,
        }
    }
}

/// Status change requested by an administrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusAction {
    /// Reactivate a suspended client
    Activate,
    /// Suspend a client, optionally for a fixed time
    Suspend,
}

/// Body of a status update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    /// Requested transition
    pub action: StatusAction,
    /// Lock length for a suspension
    #[serde(default)]
    pub lock_minutes: Option<i64>,
    /// Reason stored with the status and written to the audit trail
    #[serde(default)]
    pub reason: Option<String>,
}

/// Operations accepted by [`ClientLifecycleManager::bulk`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperationKind {
    /// Suspend each client
    Suspend,
    /// Reactivate each client
    Activate,
    /// Delete each client
    Delete,
}

impl BulkOperationKind {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Suspend => "suspend",
            Self::Activate => "activate",
            Self::Delete => "delete",
        }
    }
}

/// Outcome for one client in a bulk operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOperationResult {
    /// Client the outcome refers to
    pub client_id: String,
    /// Whether the operation succeeded for this client
    pub success: bool,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a whole bulk operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOperationReport {
    /// Operation performed
    pub operation: BulkOperationKind,
    /// Distinct clients processed
    pub total: usize,
    /// Clients that succeeded
    pub succeeded: usize,
    /// Clients that failed
    pub failed: usize,
    /// Per-client outcomes in request order
    pub results: Vec<BulkOperationResult>,
}

/// Result of recording an authentication failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationFailure {
    /// Failure count after this failure
    pub failure_count: u32,
    /// Whether this failure suspended the client
    pub locked_out: bool,
}

/// Status and recent activity of one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientHealth {
    /// Client identifier
    pub client_id: String,
    /// Current status
    pub status: ClientStatus,
    /// Consecutive authentication failures
    pub failure_count: u32,
    /// Whether a timed lock is in force
    pub locked: bool,
    /// Lock expiry
    pub locked_until: Option<DateTime<Utc>>,
    /// Aggregate of the last seven days of metrics
    pub recent: MetricsSummary,
}

/// Owns client status transitions, failure counters, and bulk operations
#[derive(Clone)]
pub struct ClientLifecycleManager {
    database: Database,
    auditor: SecurityAuditor,
    metrics: MetricsAggregator,
    engine: Arc<dyn TokenIssuanceEngine>,
    cache: ClientViewCache,
    policy: LockoutPolicy,
    engine_timeout: Duration,
}

impl ClientLifecycleManager {
    /// Create a manager with the default lockout policy and engine timeout
    #[must_use]
    pub fn new(
        database: Database,
        auditor: SecurityAuditor,
        metrics: MetricsAggregator,
        engine: Arc<dyn TokenIssuanceEngine>,
        cache: ClientViewCache,
    ) -> Self {
        Self {
            database,
            auditor,
            metrics,
            engine,
            cache,
            policy: LockoutPolicy::default(),
            engine_timeout: Duration::from_secs(DEFAULT_TOKEN_ENGINE_TIMEOUT_SECS),
        }
    }

    /// Override the lockout policy
    #[must_use]
    pub const fn with_policy(mut self, policy: LockoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the token engine timeout
    #[must_use]
    pub const fn with_engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = timeout;
        self
    }

    /// Active lockout policy
    #[must_use]
    pub const fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    async fn load(&self, client_id: &str) -> AppResult<RegisteredClient> {
        self.database
            .get_client(client_id)
            .await?
            .ok_or_else(|| AppError::not_found("Client").with_resource_id(client_id))
    }

    async fn invalidate(&self, client_id: &str) {
        self.cache.invalidate(&client_view_key(client_id)).await;
    }

    async fn set_engine_enabled(&self, client_id: &str, enabled: bool) -> AppResult<()> {
        call_engine(
            self.engine_timeout,
            "set_client_enabled",
            self.engine.set_client_enabled(client_id, enabled),
        )
        .await
    }

    /// Write a status change only if the stored status is still `from`
    async fn transition(&self, client_id: &str, transition: &StatusTransition<'_>) -> AppResult<()> {
        if self
            .database
            .transition_client_status(client_id, transition)
            .await?
        {
            return Ok(());
        }
        let current = self.load(client_id).await?;
        Err(AppError::conflict(format!(
            "Client {client_id} changed status to {} while the change was in progress",
            current.status
        ))
        .with_resource_id(client_id))
    }

    /// Bring the engine back in line with the stored status after a failed transition
    async fn resync_engine(&self, client_id: &str) {
        let enabled = match self.load(client_id).await {
            Ok(client) => client.status == ClientStatus::Active,
            Err(_) => false,
        };
        if let Err(e) = self.set_engine_enabled(client_id, enabled).await {
            warn!(client_id, enabled, error = %e, "Token engine could not be resynced with stored status");
        }
    }

    /// Suspend a client, optionally locking it for `lock_minutes`
    ///
    /// Suspending an already suspended client replaces its lock and reason.
    ///
    /// # Errors
    ///
    /// Returns not-found, an invalid transition for revoked clients, an
    /// invalid lock duration, or an engine/store failure
    pub async fn suspend(
        &self,
        client_id: &str,
        lock_minutes: Option<i64>,
        reason: Option<String>,
    ) -> AppResult<ClientView> {
        let mut client = self.load(client_id).await?;
        if !client.status.can_transition_to(ClientStatus::Suspended) {
            return Err(AppError::invalid_transition(format!(
                "Client {client_id} is revoked and cannot be suspended"
            ))
            .with_resource_id(client_id));
        }
        if lock_minutes.is_some_and(|minutes| minutes <= 0) {
            return Err(AppError::invalid_input("lock_minutes must be positive"));
        }

        let now = Utc::now();
        let locked_until = lock_minutes.map(|minutes| now + chrono::Duration::minutes(minutes));
        let transition = StatusTransition {
            from: &[client.status],
            to: ClientStatus::Suspended,
            reason: reason.as_deref(),
            locked_until,
            reset_failures: false,
            updated_at: now,
        };
        let result = async {
            self.set_engine_enabled(client_id, false).await?;
            self.transition(client_id, &transition).await
        }
        .await;
        if result.is_err() {
            self.resync_engine(client_id).await;
        }
        self.invalidate(client_id).await;

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::ClientSuspended,
                    AuditSeverity::Warning,
                    format!("Client {client_id} suspended"),
                )
                .with_client_id(client_id)
                .with_success(result.is_ok())
                .with_payload(json!({
                    "reason": reason,
                    "lock_minutes": lock_minutes,
                    "locked_until": locked_until,
                })),
            )
            .await;

        result.map(|()| {
            client.status = ClientStatus::Suspended;
            client.locked_until = locked_until;
            client.status_reason = reason;
            client.metadata.touch(now);
            ClientView::from(&client)
        })
    }

    /// Reactivate a suspended client, clearing its failure count and lock
    ///
    /// # Errors
    ///
    /// Returns not-found, an invalid transition for revoked clients, or an
    /// engine/store failure
    pub async fn activate(&self, client_id: &str, reason: Option<String>) -> AppResult<ClientView> {
        let mut client = self.load(client_id).await?;
        if !client.status.can_transition_to(ClientStatus::Active) {
            return Err(AppError::invalid_transition(format!(
                "Client {client_id} is revoked and cannot be reactivated"
            ))
            .with_resource_id(client_id));
        }

        let now = Utc::now();
        let previous = client.status;
        let transition = StatusTransition {
            from: &[previous],
            to: ClientStatus::Active,
            reason: reason.as_deref(),
            locked_until: None,
            reset_failures: true,
            updated_at: now,
        };
        let result = async {
            self.set_engine_enabled(client_id, true).await?;
            self.transition(client_id, &transition).await
        }
        .await;
        if result.is_err() {
            self.resync_engine(client_id).await;
        }
        self.invalidate(client_id).await;

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::ClientActivated,
                    AuditSeverity::Info,
                    format!("Client {client_id} activated"),
                )
                .with_client_id(client_id)
                .with_success(result.is_ok())
                .with_payload(json!({ "reason": reason, "previous_status": previous })),
            )
            .await;

        result.map(|()| {
            client.status = ClientStatus::Active;
            client.failure_count = 0;
            client.locked_until = None;
            client.status_reason = reason;
            client.metadata.touch(now);
            ClientView::from(&client)
        })
    }

    /// Permanently revoke a client and every authorization it holds
    ///
    /// Revoking an already revoked client succeeds without side effects.
    ///
    /// # Errors
    ///
    /// Returns not-found or an engine/store failure
    pub async fn revoke(&self, client_id: &str, reason: Option<String>) -> AppResult<ClientView> {
        let client = self.load(client_id).await?;
        if client.status == ClientStatus::Revoked {
            return Ok(ClientView::from(&client));
        }

        let now = Utc::now();
        let transition = StatusTransition {
            from: &[ClientStatus::Active, ClientStatus::Suspended],
            to: ClientStatus::Revoked,
            reason: reason.as_deref(),
            locked_until: client.locked_until,
            reset_failures: false,
            updated_at: now,
        };
        let result = async {
            self.set_engine_enabled(client_id, false).await?;
            call_engine(
                self.engine_timeout,
                "revoke_authorizations",
                self.engine.revoke_authorizations(client_id, None),
            )
            .await?;
            // false only when another caller revoked it first
            self.database
                .transition_client_status(client_id, &transition)
                .await
                .map(|_| ())
        }
        .await;
        self.invalidate(client_id).await;

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::ClientRevoked,
                    AuditSeverity::Warning,
                    format!("Client {client_id} revoked"),
                )
                .with_client_id(client_id)
                .with_success(result.is_ok())
                .with_payload(json!({ "reason": reason })),
            )
            .await;

        result?;
        Ok(ClientView::from(&self.load(client_id).await?))
    }

    /// Delete a client with its certificates and consent records
    ///
    /// The client is marked revoked first so the status change is visible in
    /// the store history, then removed. Audit events are kept.
    ///
    /// # Errors
    ///
    /// Returns not-found or a store failure
    pub async fn delete(&self, client_id: &str) -> AppResult<()> {
        let client = self.load(client_id).await?;
        let previous = client.status;
        let transition = StatusTransition {
            from: &[ClientStatus::Active, ClientStatus::Suspended],
            to: ClientStatus::Revoked,
            reason: Some("deleted"),
            locked_until: client.locked_until,
            reset_failures: false,
            updated_at: Utc::now(),
        };

        let result = async {
            self.database
                .transition_client_status(client_id, &transition)
                .await?;
            self.database.delete_client_cascade(client_id).await
        }
        .await;
        self.invalidate(client_id).await;

        if result.is_ok() {
            if let Err(e) = call_engine(
                self.engine_timeout,
                "remove_client",
                self.engine.remove_client(client_id),
            )
            .await
            {
                warn!(client_id, error = %e, "Deleted client could not be removed from the token engine");
            }
        }

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::ClientDeleted,
                    AuditSeverity::Warning,
                    format!("Client {client_id} deleted"),
                )
                .with_client_id(client_id)
                .with_success(result.is_ok())
                .with_payload(json!({ "previous_status": previous })),
            )
            .await;

        result.map(|_| ())
    }

    /// Count an authentication failure and lock the client at the threshold
    ///
    /// # Errors
    ///
    /// Returns not-found or a store failure
    pub async fn record_authentication_failure(
        &self,
        client_id: &str,
    ) -> AppResult<AuthenticationFailure> {
        let failure_count = self
            .database
            .increment_client_failures(client_id)
            .await?
            .ok_or_else(|| AppError::not_found("Client").with_resource_id(client_id))?;
        self.invalidate(client_id).await;

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::AuthenticationFailed,
                    AuditSeverity::Warning,
                    format!("Client {client_id} failed authentication"),
                )
                .with_client_id(client_id)
                .with_success(false)
                .with_payload(json!({ "failure_count": failure_count })),
            )
            .await;

        if failure_count < self.policy.max_failures {
            return Ok(AuthenticationFailure {
                failure_count,
                locked_out: false,
            });
        }

        let client = self.load(client_id).await?;
        if client.status != ClientStatus::Active {
            return Ok(AuthenticationFailure {
                failure_count,
                locked_out: false,
            });
        }

        let locked_out = self.lock_out(&client, failure_count).await?;
        Ok(AuthenticationFailure {
            failure_count,
            locked_out,
        })
    }

    /// Suspend an active client at the failure threshold
    ///
    /// Returns `false` without writing if the client left `active` in the meantime.
    async fn lock_out(&self, client: &RegisteredClient, failure_count: u32) -> AppResult<bool> {
        let now = Utc::now();
        let locked_until = now + chrono::Duration::minutes(self.policy.lockout_minutes);
        let reason = format!("automatic lockout after {failure_count} failed authentications");
        let transition = StatusTransition {
            from: &[ClientStatus::Active],
            to: ClientStatus::Suspended,
            reason: Some(&reason),
            locked_until: Some(locked_until),
            reset_failures: false,
            updated_at: now,
        };

        let result = self
            .database
            .transition_client_status(&client.client_id, &transition)
            .await;
        self.invalidate(&client.client_id).await;
        if matches!(result, Ok(false)) {
            info!(client_id = %client.client_id, "Client left active before lockout, nothing to lock");
            return Ok(false);
        }

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::ClientLockedOut,
                    AuditSeverity::Critical,
                    format!(
                        "Client {} locked out after {failure_count} failed authentications",
                        client.client_id
                    ),
                )
                .with_client_id(&client.client_id)
                .with_success(result.is_ok())
                .with_payload(json!({
                    "failure_count": failure_count,
                    "max_failures": self.policy.max_failures,
                    "locked_until": locked_until,
                })),
            )
            .await;
        result?;

        if let Err(e) = self.set_engine_enabled(&client.client_id, false).await {
            warn!(client_id = %client.client_id, error = %e, "Locked out client could not be disabled in the token engine");
        }
        info!(client_id = %client.client_id, failure_count, %locked_until, "Client locked out");
        Ok(true)
    }

    /// Reset the failure counter after a successful authentication
    ///
    /// Status is left untouched; a locked client stays suspended until
    /// explicitly reactivated.
    ///
    /// # Errors
    ///
    /// Returns not-found or a store failure
    pub async fn record_authentication_success(&self, client_id: &str) -> AppResult<()> {
        if !self.database.reset_client_failures(client_id).await? {
            return Err(AppError::not_found("Client").with_resource_id(client_id));
        }
        self.invalidate(client_id).await;

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::AuthenticationSucceeded,
                    AuditSeverity::Info,
                    format!("Client {client_id} authenticated"),
                )
                .with_client_id(client_id),
            )
            .await;
        Ok(())
    }

    /// Apply an administrator status update
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying transition
    pub async fn update_status(
        &self,
        client_id: &str,
        request: StatusUpdateRequest,
    ) -> AppResult<ClientView> {
        match request.action {
            StatusAction::Activate => self.activate(client_id, request.reason).await,
            StatusAction::Suspend => {
                self.suspend(client_id, request.lock_minutes, request.reason)
                    .await
            }
        }
    }

    /// Apply `operation` to each distinct client independently
    ///
    /// One client's failure never stops the batch.
    pub async fn bulk(
        &self,
        operation: BulkOperationKind,
        client_ids: &[String],
    ) -> BulkOperationReport {
        let mut seen = HashSet::new();
        let mut results = Vec::new();

        for client_id in client_ids.iter().filter(|id| seen.insert(id.as_str())) {
            let outcome = match operation {
                BulkOperationKind::Suspend => self
                    .suspend(client_id, None, Some("bulk suspend".to_owned()))
                    .await
                    .map(|_| ()),
                BulkOperationKind::Activate => self
                    .activate(client_id, Some("bulk activate".to_owned()))
                    .await
                    .map(|_| ()),
                BulkOperationKind::Delete => self.delete(client_id).await,
            };
            results.push(BulkOperationResult {
                client_id: client_id.clone(),
                success: outcome.is_ok(),
                error: outcome.err().map(|e| e.message),
            });
        }

        let succeeded = results.iter().filter(|result| result.success).count();
        let report = BulkOperationReport {
            operation,
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        };

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::BulkOperation,
                    AuditSeverity::Warning,
                    format!(
                        "Bulk {} over {} clients: {} succeeded, {} failed",
                        operation.as_str(),
                        report.total,
                        report.succeeded,
                        report.failed
                    ),
                )
                .with_success(report.failed == 0)
                .with_payload(json!({
                    "operation": operation,
                    "client_ids": report.results.iter().map(|r| r.client_id.as_str()).collect::<Vec<_>>(),
                    "succeeded": report.succeeded,
                    "failed": report.failed,
                })),
            )
            .await;

        report
    }

    /// Status, lock, and last seven days of metrics for a client
    ///
    /// # Errors
    ///
    /// Returns not-found or a store failure
    pub async fn health(&self, client_id: &str, today: NaiveDate) -> AppResult<ClientHealth> {
        let client = self.load(client_id).await?;
        let from = today - chrono::Duration::days(HEALTH_WINDOW_DAYS - 1);
        let report = self.metrics.query(client_id, from, today).await?;
        Ok(ClientHealth {
            client_id: client.client_id.clone(),
            status: client.status,
            failure_count: client.failure_count,
            locked: client.is_locked(Utc::now()),
            locked_until: client.locked_until,
            recent: report.summary,
        })
    }
}
