// ABOUTME: Daily per-client usage rollup from the audit trail plus metric queries and retention
// ABOUTME: A rollup for a date replaces that date's rows, so reruns never double count
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! # Metrics Aggregator
//!
//! Counts, per client and UTC day, the request, token, consent, and ESPI
//! resource events recorded by the [`SecurityAuditor`]. Response times come
//! from a separate [`UsageTimingSource`] because the audit trail does not
//! carry them.

/// Usage timing source contract and implementations
pub mod timing;

pub use timing::{InMemoryUsageTimings, UsageTimingSource};

use crate::database::Database;
use crate::security::audit::{AuditEvent, AuditEventType, AuditQuery, SecurityAuditor};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use greenbutton_core::constants::retention::METRICS_RETENTION_DAYS;
use greenbutton_core::errors::{AppError, AppResult};
use greenbutton_core::models::{ClientMetricDaily, MetricsSummary};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of one rollup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupReport {
    /// Day rolled up
    pub date: NaiveDate,
    /// Audit events read
    pub events_processed: usize,
    /// Daily rows written
    pub clients: usize,
}

/// Daily series plus aggregate for one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Client queried
    pub client_id: String,
    /// First day, inclusive
    pub from: NaiveDate,
    /// Last day, inclusive
    pub to: NaiveDate,
    /// Stored rows, oldest first; days without activity are absent
    pub daily: Vec<ClientMetricDaily>,
    /// Aggregate over `daily`
    pub summary: MetricsSummary,
}

/// Rolls audit events up into [`ClientMetricDaily`] rows
#[derive(Clone)]
pub struct MetricsAggregator {
    database: Database,
    auditor: SecurityAuditor,
    timings: Arc<dyn UsageTimingSource>,
    retention_days: i64,
}

#[derive(Default)]
struct DailyCounters {
    total: i64,
    successful: i64,
    failed: i64,
    tokens: i64,
    espi: i64,
    grants: i64,
    withdrawals: i64,
    principals: HashSet<String>,
}

impl DailyCounters {
    fn count(&mut self, event: &AuditEvent) {
        if let Some(principal) = &event.principal_name {
            self.principals.insert(principal.clone());
        }

        if event.event_type.is_request() {
            self.total += 1;
            if event.success {
                self.successful += 1;
            } else {
                self.failed += 1;
            }
        }

        match event.event_type {
            AuditEventType::TokenIssued => self.tokens += 1,
            AuditEventType::ResourceAccessed
                if event.payload.get("espi_specific").and_then(serde_json::Value::as_bool)
                    == Some(true) =>
            {
                self.espi += 1;
            }
            AuditEventType::ConsentGranted if event.success => self.grants += 1,
            AuditEventType::ConsentRevoked if event.success => self.withdrawals += 1,
            _ => {}
        }
    }
}

impl MetricsAggregator {
    /// Create an aggregator with the default retention horizon
    #[must_use]
    pub fn new(
        database: Database,
        auditor: SecurityAuditor,
        timings: Arc<dyn UsageTimingSource>,
    ) -> Self {
        Self {
            database,
            auditor,
            timings,
            retention_days: METRICS_RETENTION_DAYS,
        }
    }

    /// Override the retention horizon
    #[must_use]
    pub const fn with_retention_days(mut self, retention_days: i64) -> Self {
        self.retention_days = retention_days;
        self
    }

    /// Recompute every client's row for `date`
    ///
    /// # Errors
    ///
    /// Returns an error if reading audit events or writing rows fails
    pub async fn rollup(&self, date: NaiveDate) -> AppResult<RollupReport> {
        self.rollup_at(date, Utc::now()).await
    }

    /// Recompute `date`, stamping rows with `computed_at`
    ///
    /// # Errors
    ///
    /// Returns an error if reading audit events or writing rows fails
    pub async fn rollup_at(
        &self,
        date: NaiveDate,
        computed_at: DateTime<Utc>,
    ) -> AppResult<RollupReport> {
        let since = date.and_time(NaiveTime::MIN).and_utc();
        let events = self
            .auditor
            .query(&AuditQuery {
                since: Some(since),
                until: Some(since + Duration::days(1)),
                ..AuditQuery::default()
            })
            .await?;

        let mut per_client: BTreeMap<String, DailyCounters> = BTreeMap::new();
        for event in &events {
            if let Some(client_id) = &event.client_id {
                per_client.entry(client_id.clone()).or_default().count(event);
            }
        }

        let mut rows = Vec::with_capacity(per_client.len());
        for (client_id, counters) in per_client {
            let average_response_time_ms = match self
                .timings
                .average_response_time_ms(&client_id, date)
                .await
            {
                Ok(average) => average,
                Err(e) => {
                    warn!(client_id = %client_id, date = %date, error = %e, "Usage timing lookup failed, leaving average empty");
                    None
                }
            };

            rows.push(ClientMetricDaily {
                total_requests: counters.total,
                successful_requests: counters.successful,
                failed_requests: counters.failed,
                tokens_issued: counters.tokens,
                unique_principals: counters.principals.len() as i64,
                espi_requests: counters.espi,
                consent_grants: counters.grants,
                consent_withdrawals: counters.withdrawals,
                average_response_time_ms,
                ..ClientMetricDaily::empty(client_id, date, computed_at)
            });
        }

        self.database
            .replace_daily_metrics(date, &rows, computed_at)
            .await?;

        info!(date = %date, events = events.len(), clients = rows.len(), "Rolled up daily client metrics");
        Ok(RollupReport {
            date,
            events_processed: events.len(),
            clients: rows.len(),
        })
    }

    /// Roll up the UTC day before `now`
    ///
    /// # Errors
    ///
    /// Returns an error if the rollup fails
    pub async fn rollup_yesterday(&self, now: DateTime<Utc>) -> AppResult<RollupReport> {
        let yesterday = now.date_naive() - Duration::days(1);
        self.rollup_at(yesterday, now).await
    }

    /// Roll up every day since the last completed rollup, through yesterday
    ///
    /// With no prior rollup only yesterday is computed. Days older than the
    /// retention horizon are never backfilled.
    ///
    /// # Errors
    ///
    /// Returns the first rollup error; days before it stay recorded
    pub async fn rollup_pending(&self, now: DateTime<Utc>) -> AppResult<Vec<RollupReport>> {
        let yesterday = now.date_naive() - Duration::days(1);
        let oldest = now.date_naive() - Duration::days(self.retention_days);
        let first = match self.database.latest_rollup_date().await? {
            Some(latest) => (latest + Duration::days(1)).max(oldest),
            None => yesterday,
        };

        let mut reports = Vec::new();
        let mut date = first;
        while date <= yesterday {
            reports.push(self.rollup_at(date, now).await?);
            date += Duration::days(1);
        }
        Ok(reports)
    }

    /// Daily series and summary for `client_id` over `[from, to]`
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error if `from` is after `to`, or a store error
    pub async fn query(
        &self,
        client_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<MetricsReport> {
        if from > to {
            return Err(AppError::invalid_input(format!(
                "Metrics window start {from} is after end {to}"
            )));
        }
        let daily = self.database.get_daily_metrics(client_id, from, to).await?;
        let summary = MetricsSummary::from_daily(&daily);
        Ok(MetricsReport {
            client_id: client_id.to_owned(),
            from,
            to,
            daily,
            summary,
        })
    }

    /// Delete daily rows older than the retention horizon relative to `today`
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails
    pub async fn prune(&self, today: NaiveDate) -> AppResult<u64> {
        let cutoff = today - Duration::days(self.retention_days);
        let removed = self.database.prune_daily_metrics_before(cutoff).await?;
        info!(removed, cutoff = %cutoff, "Pruned daily metrics past retention");
        Ok(removed)
    }
}
