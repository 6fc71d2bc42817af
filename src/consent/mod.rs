// ABOUTME: Consent ledger of approved and denied ESPI scopes per client and retail customer
// ABOUTME: Computes consent deltas, merges decisions on write, and audits every decision
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! # Consent Ledger
//!
//! A consent screen is only needed for the delta between the scopes a client
//! requests and the scopes the retail customer already approved. Approvals
//! accumulate across decisions; a scope only leaves the approved set when it
//! is denied in a later decision. The denied set holds the latest decision's
//! denials only.
//!
//! Consent writes and their audit events are independent: an audit failure is
//! logged and never undoes the consent write.

use crate::database::Database;
use crate::oauth2_server::token_engine::call_engine;
use crate::oauth2_server::TokenIssuanceEngine;
use crate::scopes::{self, ScopeDescription};
use crate::security::audit::{AuditEvent, AuditEventType, AuditSeverity, SecurityAuditor};
use chrono::Utc;
use greenbutton_core::constants::registration::DEFAULT_TOKEN_ENGINE_TIMEOUT_SECS;
use greenbutton_core::errors::{AppError, AppResult};
use greenbutton_core::models::{ClientStatus, ConsentRecord, RecordMetadata, RegisteredClient};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Scopes requested but not yet approved
#[must_use]
pub fn delta(existing_approved: &BTreeSet<String>, requested: &BTreeSet<String>) -> BTreeSet<String> {
    requested.difference(existing_approved).cloned().collect()
}

/// Whether the authorization flow must stop for a consent decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "consent", content = "scopes", rename_all = "snake_case")]
pub enum ConsentRequirement {
    /// Everything requested is already approved, or the client needs no consent
    NotRequired,
    /// The retail customer must decide on these scopes
    Required(BTreeSet<String>),
}

/// A retail customer's per-scope decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentDecision {
    /// Retail customer making the decision
    pub principal_name: String,
    /// Scope to approved (`true`) or denied (`false`)
    pub scopes: BTreeMap<String, bool>,
    /// Registered redirect URI to continue with; defaults to the first one
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Opaque authorization request state echoed on denial
    #[serde(default)]
    pub state: Option<String>,
}

/// Result of [`ConsentLedger::submit_decision`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConsentOutcome {
    /// At least one scope approved; the authorization flow continues
    Approved {
        /// Cumulative approved scopes
        approved_scopes: BTreeSet<String>,
        /// Scopes denied in this decision
        denied_scopes: BTreeSet<String>,
    },
    /// Nothing approved; the client is told `access_denied`
    Denied {
        /// Redirect carrying `error=access_denied`, absent for clients without redirect URIs
        redirect_uri: Option<String>,
    },
}

/// Data rendered on a consent screen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentScreen {
    /// Requesting client
    pub client_id: String,
    /// Name shown to the retail customer
    pub client_name: String,
    /// One entry per requested scope
    pub scopes: Vec<ScopeDescription>,
    /// Whether any requested scope is ESPI-specific
    pub espi_specific: bool,
}

/// Per-(client, principal) consent storage and decision logic
#[derive(Clone)]
pub struct ConsentLedger {
    database: Database,
    auditor: SecurityAuditor,
    engine: Arc<dyn TokenIssuanceEngine>,
    engine_timeout: Duration,
}

impl ConsentLedger {
    /// Create a ledger
    #[must_use]
    pub fn new(
        database: Database,
        auditor: SecurityAuditor,
        engine: Arc<dyn TokenIssuanceEngine>,
    ) -> Self {
        Self {
            database,
            auditor,
            engine,
            engine_timeout: Duration::from_secs(DEFAULT_TOKEN_ENGINE_TIMEOUT_SECS),
        }
    }

    /// Override the token engine timeout
    #[must_use]
    pub const fn with_engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = timeout;
        self
    }

    async fn active_client(&self, client_id: &str) -> AppResult<RegisteredClient> {
        let client = self
            .database
            .get_client(client_id)
            .await?
            .ok_or_else(|| AppError::not_found("Client").with_resource_id(client_id))?;
        if client.status != ClientStatus::Active {
            return Err(AppError::permission_denied(format!(
                "Client {client_id} is {}",
                client.status
            ))
            .with_resource_id(client_id));
        }
        Ok(client)
    }

    fn ensure_registered(client: &RegisteredClient, requested: &BTreeSet<String>) -> AppResult<()> {
        match requested.iter().find(|scope| !client.scopes.contains(*scope)) {
            Some(scope) => Err(AppError::invalid_input(format!(
                "scope {scope} is not registered for client {}",
                client.client_id
            ))),
            None => Ok(()),
        }
    }

    /// Whether `principal_name` must be asked before `requested` is granted
    ///
    /// # Errors
    ///
    /// Returns not-found, permission-denied for an inactive client, invalid
    /// input for unregistered scopes, or a store failure
    pub async fn check(
        &self,
        client_id: &str,
        principal_name: &str,
        requested: &BTreeSet<String>,
    ) -> AppResult<ConsentRequirement> {
        let client = self.active_client(client_id).await?;
        Self::ensure_registered(&client, requested)?;
        if !client.require_consent {
            return Ok(ConsentRequirement::NotRequired);
        }

        let approved = self
            .database
            .get_consent(client_id, principal_name)
            .await?
            .map(|record| record.approved_scopes)
            .unwrap_or_default();
        let missing = delta(&approved, requested);
        debug!(client_id, principal = principal_name, missing = missing.len(), "Computed consent delta");

        Ok(if missing.is_empty() {
            ConsentRequirement::NotRequired
        } else {
            ConsentRequirement::Required(missing)
        })
    }

    /// Merge a decision into the ledger
    ///
    /// # Errors
    ///
    /// Returns not-found, permission-denied for an inactive client, invalid
    /// input when a scope is both approved and denied or unregistered, or a
    /// store failure
    pub async fn record_consent(
        &self,
        client_id: &str,
        principal_name: &str,
        approved: &BTreeSet<String>,
        denied: &BTreeSet<String>,
    ) -> AppResult<ConsentRecord> {
        if let Some(scope) = approved.intersection(denied).next() {
            return Err(AppError::invalid_input(format!(
                "scope {scope} cannot be both approved and denied"
            )));
        }
        let client = self.active_client(client_id).await?;
        Self::ensure_registered(&client, approved)?;
        Self::ensure_registered(&client, denied)?;

        let existing = self.database.get_consent(client_id, principal_name).await?;
        let newly_approved = delta(
            existing
                .as_ref()
                .map_or(&BTreeSet::new(), |record| &record.approved_scopes),
            approved,
        );
        let record = self
            .write_decision(existing, client_id, principal_name, approved, denied)
            .await?;

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::ConsentGranted,
                    AuditSeverity::Info,
                    format!("{principal_name} granted consent to {client_id}"),
                )
                .with_client_id(client_id)
                .with_principal(principal_name)
                .with_payload(json!({
                    "approved_scopes": approved,
                    "denied_scopes": denied,
                    "newly_approved": newly_approved,
                    "espi_specific": record.espi_specific,
                })),
            )
            .await;

        Ok(record)
    }

    /// Record that every requested scope was denied
    ///
    /// # Errors
    ///
    /// Returns not-found, permission-denied for an inactive client, invalid
    /// input for unregistered scopes, or a store failure
    pub async fn record_denial(
        &self,
        client_id: &str,
        principal_name: &str,
        requested: &BTreeSet<String>,
    ) -> AppResult<ConsentRecord> {
        let client = self.active_client(client_id).await?;
        Self::ensure_registered(&client, requested)?;

        let existing = self.database.get_consent(client_id, principal_name).await?;
        let record = self
            .write_decision(existing, client_id, principal_name, &BTreeSet::new(), requested)
            .await?;

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::ConsentDenied,
                    AuditSeverity::Info,
                    format!("{principal_name} denied consent to {client_id}"),
                )
                .with_client_id(client_id)
                .with_principal(principal_name)
                .with_success(false)
                .with_payload(json!({ "requested_scopes": requested })),
            )
            .await;

        Ok(record)
    }

    async fn write_decision(
        &self,
        existing: Option<ConsentRecord>,
        client_id: &str,
        principal_name: &str,
        approved: &BTreeSet<String>,
        denied: &BTreeSet<String>,
    ) -> AppResult<ConsentRecord> {
        let now = Utc::now();
        let mut record = existing.unwrap_or_else(|| ConsentRecord {
            metadata: RecordMetadata::new(now),
            client_id: client_id.to_owned(),
            principal_name: principal_name.to_owned(),
            approved_scopes: BTreeSet::new(),
            denied_scopes: BTreeSet::new(),
            espi_specific: false,
            decided_at: now,
        });

        record.approved_scopes.retain(|scope| !denied.contains(scope));
        record.approved_scopes.extend(approved.iter().cloned());
        record.denied_scopes.clone_from(denied);
        record.espi_specific = scopes::any_espi_specific(&record.approved_scopes);
        record.decided_at = now;
        record.metadata.touch(now);

        self.database.upsert_consent(&record).await?;
        Ok(record)
    }

    /// Apply a consent screen submission
    ///
    /// # Errors
    ///
    /// Returns invalid input for an empty decision or an unregistered
    /// redirect URI, plus the errors of the underlying record call
    pub async fn submit_decision(
        &self,
        client_id: &str,
        decision: &ConsentDecision,
    ) -> AppResult<ConsentOutcome> {
        if decision.scopes.is_empty() {
            return Err(AppError::invalid_input("consent decision contains no scopes"));
        }
        let (approved, denied): (BTreeSet<String>, BTreeSet<String>) = {
            let mut approved = BTreeSet::new();
            let mut denied = BTreeSet::new();
            for (scope, allowed) in &decision.scopes {
                if *allowed {
                    approved.insert(scope.clone());
                } else {
                    denied.insert(scope.clone());
                }
            }
            (approved, denied)
        };

        if approved.is_empty() {
            let client = self.active_client(client_id).await?;
            let redirect_uri = denial_redirect(&client, decision)?;
            self.record_denial(client_id, &decision.principal_name, &denied)
                .await?;
            return Ok(ConsentOutcome::Denied { redirect_uri });
        }

        let record = self
            .record_consent(client_id, &decision.principal_name, &approved, &denied)
            .await?;
        Ok(ConsentOutcome::Approved {
            approved_scopes: record.approved_scopes,
            denied_scopes: record.denied_scopes,
        })
    }

    /// Withdraw a retail customer's consent and the client's authorizations for them
    ///
    /// Idempotent: returns `false` when there was nothing to revoke.
    ///
    /// # Errors
    ///
    /// Returns an engine or store failure
    pub async fn revoke(&self, client_id: &str, principal_name: &str) -> AppResult<bool> {
        let result = async {
            call_engine(
                self.engine_timeout,
                "revoke_authorizations",
                self.engine
                    .revoke_authorizations(client_id, Some(principal_name)),
            )
            .await?;
            self.database.delete_consent(client_id, principal_name).await
        }
        .await;

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::ConsentRevoked,
                    AuditSeverity::Info,
                    format!("{principal_name} revoked consent for {client_id}"),
                )
                .with_client_id(client_id)
                .with_principal(principal_name)
                .with_success(result.is_ok())
                .with_payload(json!({
                    "removed": result.as_ref().ok(),
                    "error": result.as_ref().err().map(ToString::to_string),
                })),
            )
            .await;

        result
    }

    /// Render the requested scopes for a consent screen
    ///
    /// # Errors
    ///
    /// Returns not-found, permission-denied for an inactive client, invalid
    /// input for unregistered scopes, or a store failure
    pub async fn consent_screen(
        &self,
        client_id: &str,
        requested: &BTreeSet<String>,
    ) -> AppResult<ConsentScreen> {
        let client = self.active_client(client_id).await?;
        Self::ensure_registered(&client, requested)?;
        let scopes: Vec<ScopeDescription> = requested
            .iter()
            .map(|scope| scopes::describe_scope(scope))
            .collect();
        Ok(ConsentScreen {
            espi_specific: scopes.iter().any(|scope| scope.espi_specific),
            client_id: client.client_id,
            client_name: client.client_name,
            scopes,
        })
    }

    /// Stored consent for one client and principal
    ///
    /// # Errors
    ///
    /// Returns a store failure
    pub async fn get(&self, client_id: &str, principal_name: &str) -> AppResult<Option<ConsentRecord>> {
        self.database.get_consent(client_id, principal_name).await
    }

    /// Every consent record of a retail customer
    ///
    /// # Errors
    ///
    /// Returns a store failure
    pub async fn list_for_principal(&self, principal_name: &str) -> AppResult<Vec<ConsentRecord>> {
        self.database.list_consents_for_principal(principal_name).await
    }
}

/// Redirect URI carrying `error=access_denied` and the request state
fn denial_redirect(
    client: &RegisteredClient,
    decision: &ConsentDecision,
) -> AppResult<Option<String>> {
    let base = match &decision.redirect_uri {
        Some(uri) if client.redirect_uris.contains(uri) => uri,
        Some(uri) => {
            return Err(AppError::invalid_input(format!(
                "redirect_uri {uri} is not registered for client {}",
                client.client_id
            )));
        }
        None => match client.redirect_uris.first() {
            Some(uri) => uri,
            None => return Ok(None),
        },
    };

    let mut url = url::Url::parse(base)
        .map_err(|e| AppError::internal(format!("Stored redirect_uri {base} is invalid: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("error", "access_denied");
        query.append_pair("error_description", "The retail customer denied the request");
        if let Some(state) = &decision.state {
            query.append_pair("state", state);
        }
    }
    Ok(Some(url.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_delta_of_approved_is_empty() {
        let approved = set(&["openid", "FB=4_5_15;IntervalDuration=3600"]);
        assert!(delta(&approved, &approved).is_empty());
    }

    #[test]
    fn test_delta_from_nothing_is_everything() {
        let requested = set(&["openid", "profile"]);
        assert_eq!(delta(&BTreeSet::new(), &requested), requested);
    }

    #[test]
    fn test_delta_is_set_difference() {
        let approved = set(&["openid"]);
        let requested = set(&["openid", "profile"]);
        assert_eq!(delta(&approved, &requested), set(&["profile"]));
    }
}
