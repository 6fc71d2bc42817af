// ABOUTME: Integration tests for the daily metrics rollup, metric queries, and retention pruning
// ABOUTME: Audit events are written with fixed timestamps so each test controls the rolled-up day
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use greenbutton_authorization::metrics::timing::InMemoryUsageTimings;
use greenbutton_authorization::resources::ServerResources;
use greenbutton_authorization::security::audit::{
    AuditEvent, AuditEventType, AuditQuery, AuditSeverity,
};
use greenbutton_core::errors::ErrorCode;
use serde_json::json;
use std::sync::Arc;

mod common;

const CLIENT: &str = "third_party_1700000000000_abcdef";

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).unwrap()
}

fn event(event_type: AuditEventType, hour: u32) -> AuditEvent {
    AuditEvent::new(event_type, AuditSeverity::Info, "test event")
        .with_client_id(CLIENT)
        .with_timestamp(at(hour))
}

async fn seed_day(resources: &ServerResources) {
    let auditor = &resources.auditor;
    auditor
        .log_event(event(AuditEventType::TokenIssued, 1).with_principal("alice"))
        .await;
    auditor
        .log_event(event(AuditEventType::TokenIssued, 2).with_principal("bob"))
        .await;
    auditor
        .log_event(
            event(AuditEventType::ResourceAccessed, 3)
                .with_principal("alice")
                .with_payload(json!({ "espi_specific": true })),
        )
        .await;
    auditor
        .log_event(
            event(AuditEventType::ResourceAccessed, 4)
                .with_success(false)
                .with_payload(json!({ "espi_specific": false })),
        )
        .await;
    auditor
        .log_event(event(AuditEventType::AuthenticationFailed, 5).with_success(false))
        .await;
    auditor
        .log_event(event(AuditEventType::ConsentGranted, 6).with_principal("alice"))
        .await;
    auditor
        .log_event(event(AuditEventType::ConsentRevoked, 7).with_principal("bob"))
        .await;
    // Next day, outside the rollup window
    auditor
        .log_event(
            event(AuditEventType::TokenIssued, 0).with_timestamp(at(0) + Duration::days(1)),
        )
        .await;
}

#[tokio::test]
async fn test_rollup_counts_one_day() -> Result<()> {
    let timings = Arc::new(InMemoryUsageTimings::new());
    timings.record(CLIENT, day(), 120.0);
    timings.record(CLIENT, day(), 80.0);
    let resources =
        ServerResources::builder(common::test_config(), common::create_test_database().await?)
            .with_usage_timings(Arc::clone(&timings) as _)
            .with_notification_transport(Arc::new(common::RecordingTransport::default()))
            .build()?;
    seed_day(&resources).await;

    let report = resources.metrics.rollup(day()).await?;
    assert_eq!(report.date, day());
    assert_eq!(report.events_processed, 7);
    assert_eq!(report.clients, 1);

    let metrics = resources.metrics.query(CLIENT, day(), day()).await?;
    assert_eq!(metrics.daily.len(), 1);
    let row = &metrics.daily[0];
    assert_eq!(row.total_requests, 5);
    assert_eq!(row.successful_requests, 3);
    assert_eq!(row.failed_requests, 2);
    assert_eq!(row.tokens_issued, 2);
    assert_eq!(row.espi_requests, 1);
    assert_eq!(row.consent_grants, 1);
    assert_eq!(row.consent_withdrawals, 1);
    assert_eq!(row.unique_principals, 2);
    assert_eq!(row.average_response_time_ms, Some(100.0));

    assert_eq!(metrics.summary.days, 1);
    assert_eq!(metrics.summary.total_requests, 5);
    Ok(())
}

#[tokio::test]
async fn test_rollup_is_idempotent() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    seed_day(&resources).await;

    let first = resources.metrics.rollup(day()).await?;
    let second = resources.metrics.rollup(day()).await?;
    assert_eq!(first.clients, second.clients);
    assert_eq!(first.events_processed, second.events_processed);

    let metrics = resources.metrics.query(CLIENT, day(), day()).await?;
    assert_eq!(metrics.daily.len(), 1);
    assert_eq!(metrics.daily[0].total_requests, 5);
    assert!(metrics.daily[0].average_response_time_ms.is_none());
    Ok(())
}

#[tokio::test]
async fn test_quiet_day_writes_no_rows() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let quiet = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();

    let report = resources.metrics.rollup(quiet).await?;
    assert_eq!(report.clients, 0);
    assert!(resources
        .metrics
        .query(CLIENT, quiet, quiet)
        .await?
        .daily
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn test_query_rejects_inverted_window() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;

    let error = resources
        .metrics
        .query(CLIENT, day(), day() - Duration::days(1))
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidInput);
    Ok(())
}

#[tokio::test]
async fn test_rollup_yesterday_uses_previous_utc_day() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    seed_day(&resources).await;

    let now = Utc.with_ymd_and_hms(2025, 3, 11, 2, 30, 0).unwrap();
    let report = resources.metrics.rollup_yesterday(now).await?;
    assert_eq!(report.date, day());
    assert_eq!(report.clients, 1);
    Ok(())
}

#[tokio::test]
async fn test_prune_removes_rows_past_retention() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    seed_day(&resources).await;
    resources.metrics.rollup(day()).await?;

    let within = day() + Duration::days(30);
    assert_eq!(resources.metrics.prune(within).await?, 0);

    let beyond = day() + Duration::days(400);
    assert_eq!(resources.metrics.prune(beyond).await?, 1);
    assert!(resources
        .metrics
        .query(CLIENT, day(), day())
        .await?
        .daily
        .is_empty());
    Ok(())
}

#[tokio::test]
async fn test_audit_prune_keeps_recent_events() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    seed_day(&resources).await;

    let now = at(12) + Duration::days(30);
    assert_eq!(resources.auditor.prune(now).await?, 0);

    let later = at(12) + Duration::days(365);
    let removed = resources.auditor.prune(later).await?;
    assert_eq!(removed, 7);

    let remaining = resources.auditor.query(&AuditQuery::default()).await?;
    assert_eq!(remaining.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_pending_rollup_catches_up_missed_days() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    seed_day(&resources).await;
    resources.metrics.rollup(day()).await?;

    // Two nightly runs were missed
    let now = Utc.with_ymd_and_hms(2025, 3, 13, 0, 5, 0).unwrap();
    let reports = resources.metrics.rollup_pending(now).await?;
    let dates: Vec<_> = reports.iter().map(|report| report.date).collect();
    assert_eq!(
        dates,
        vec![day() + Duration::days(1), day() + Duration::days(2)]
    );
    assert_eq!(reports[0].events_processed, 1);
    assert_eq!(reports[1].events_processed, 0);

    let daily = resources
        .metrics
        .query(CLIENT, day(), day() + Duration::days(2))
        .await?
        .daily;
    assert_eq!(daily.len(), 2);
    assert_eq!(daily[1].tokens_issued, 1);

    // Quiet days count as covered
    assert!(resources.metrics.rollup_pending(now).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_pending_rollup_without_history_covers_yesterday() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    seed_day(&resources).await;

    let now = Utc.with_ymd_and_hms(2025, 3, 11, 2, 30, 0).unwrap();
    let reports = resources.metrics.rollup_pending(now).await?;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].date, day());
    assert_eq!(reports[0].clients, 1);
    Ok(())
}
