// ABOUTME: Daily per-client usage metrics rolled up from the audit log
// ABOUTME: Includes the aggregate summary returned by metric queries
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Metrics for one client on one UTC day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMetricDaily {
    /// Client the row belongs to
    pub client_id: String,
    /// UTC day
    pub date: NaiveDate,
    /// All counted requests
    pub total_requests: i64,
    /// Requests that succeeded
    pub successful_requests: i64,
    /// Requests that failed
    pub failed_requests: i64,
    /// Access tokens issued
    pub tokens_issued: i64,
    /// Distinct retail customers seen
    pub unique_principals: i64,
    /// Requests for ESPI energy-usage resources
    pub espi_requests: i64,
    /// Consent grants recorded
    pub consent_grants: i64,
    /// Consent revocations recorded
    pub consent_withdrawals: i64,
    /// Mean response time from the usage timing source
    pub average_response_time_ms: Option<f64>,
    /// When this row was computed
    pub computed_at: DateTime<Utc>,
}

impl ClientMetricDaily {
    /// Empty row for `client_id` on `date`
    #[must_use]
    pub fn empty(client_id: impl Into<String>, date: NaiveDate, computed_at: DateTime<Utc>) -> Self {
        Self {
            client_id: client_id.into(),
            date,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            tokens_issued: 0,
            unique_principals: 0,
            espi_requests: 0,
            consent_grants: 0,
            consent_withdrawals: 0,
            average_response_time_ms: None,
            computed_at,
        }
    }
}

/// Aggregate over a window of daily rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Number of daily rows aggregated
    pub days: usize,
    /// Sum of total requests
    pub total_requests: i64,
    /// Sum of successful requests
    pub successful_requests: i64,
    /// Sum of failed requests
    pub failed_requests: i64,
    /// Sum of tokens issued
    pub tokens_issued: i64,
    /// Sum of ESPI resource requests
    pub espi_requests: i64,
    /// Sum of consent grants
    pub consent_grants: i64,
    /// Sum of consent withdrawals
    pub consent_withdrawals: i64,
    /// Largest single-day distinct principal count
    pub peak_unique_principals: i64,
    /// Success ratio in `[0, 1]`, `None` when there were no requests
    pub success_rate: Option<f64>,
    /// Request-weighted mean response time
    pub average_response_time_ms: Option<f64>,
}

impl MetricsSummary {
    /// Aggregate a series of daily rows
    #[must_use]
    pub fn from_daily(rows: &[ClientMetricDaily]) -> Self {
        let mut summary = Self {
            days: rows.len(),
            ..Self::default()
        };
        let mut weighted_time = 0.0;
        let mut weighted_requests = 0_i64;

        for row in rows {
            summary.total_requests += row.total_requests;
            summary.successful_requests += row.successful_requests;
            summary.failed_requests += row.failed_requests;
            summary.tokens_issued += row.tokens_issued;
            summary.espi_requests += row.espi_requests;
            summary.consent_grants += row.consent_grants;
            summary.consent_withdrawals += row.consent_withdrawals;
            summary.peak_unique_principals = summary.peak_unique_principals.max(row.unique_principals);
            if let Some(avg) = row.average_response_time_ms {
                // Days without requests still carry a timing sample
                let weight = row.total_requests.max(1);
                weighted_time += avg * weight as f64;
                weighted_requests += weight;
            }
        }

        if summary.total_requests > 0 {
            summary.success_rate =
                Some(summary.successful_requests as f64 / summary.total_requests as f64);
        }
        if weighted_requests > 0 {
            summary.average_response_time_ms = Some(weighted_time / weighted_requests as f64);
        }
        summary
    }
}
