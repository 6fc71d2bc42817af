// ABOUTME: Integration tests for queued BatchList delivery to Third Party notify URIs
// ABOUTME: A recording transport stands in for HTTP so retries and failures are observable
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use anyhow::Result;
use greenbutton_authorization::security::audit::{AuditEventType, AuditQuery};
use greenbutton_core::errors::ErrorCode;
use std::time::Duration;

mod common;

const USAGE_POINT: &str =
    "https://datacustodian.example.com/espi/1_1/resource/Subscription/5/UsagePoint/1";

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_notification_delivered_as_batch_list() -> Result<()> {
    let (resources, transport) = common::create_test_resources().await?;
    let credentials = resources
        .registry
        .register(common::energy_client_request("Notified"))
        .await?;
    let view = resources.registry.get(&credentials.client_id).await?;

    resources
        .notifications
        .notify_client(&view, vec![USAGE_POINT.to_owned()])?;
    wait_for(|| !transport.deliveries().is_empty()).await;

    let deliveries = transport.deliveries();
    assert_eq!(deliveries.len(), 1);
    let (notify_uri, body) = &deliveries[0];
    assert_eq!(notify_uri, "https://thirdparty.example.com/espi/notify");
    assert!(body.contains("<BatchList xmlns=\"http://naesb.org/espi\">"));
    assert!(body.contains(&format!("<resources>{USAGE_POINT}</resources>")));
    Ok(())
}

#[tokio::test]
async fn test_transient_failures_are_retried() -> Result<()> {
    let (resources, transport) = common::create_test_resources().await?;
    let credentials = resources
        .registry
        .register(common::energy_client_request("Flaky Endpoint"))
        .await?;
    let view = resources.registry.get(&credentials.client_id).await?;

    transport.fail_next(2);
    resources
        .notifications
        .notify_client(&view, vec![USAGE_POINT.to_owned()])?;
    wait_for(|| !transport.deliveries().is_empty()).await;

    assert_eq!(transport.deliveries().len(), 1);
    assert_eq!(transport.attempts(), 3);
    Ok(())
}

#[tokio::test]
async fn test_exhausted_retries_are_audited() -> Result<()> {
    let (resources, transport) = common::create_test_resources().await?;
    let credentials = resources
        .registry
        .register(common::energy_client_request("Dead Endpoint"))
        .await?;
    let view = resources.registry.get(&credentials.client_id).await?;
    let max_retries = resources.config.notifications.retry.max_retries;

    transport.fail_next(max_retries + 1);
    resources
        .notifications
        .notify_client(&view, vec![USAGE_POINT.to_owned()])?;

    let query = AuditQuery {
        client_id: Some(credentials.client_id.clone()),
        event_types: vec![AuditEventType::NotificationFailed],
        ..AuditQuery::default()
    };
    let mut failures = Vec::new();
    for _ in 0..200 {
        failures = resources.auditor.query(&query).await?;
        if !failures.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(failures.len(), 1);
    assert!(!failures[0].success);
    assert!(transport.deliveries().is_empty());
    assert_eq!(transport.attempts(), max_retries + 1);
    Ok(())
}

#[tokio::test]
async fn test_notify_requires_uri_and_resources() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let credentials = resources
        .registry
        .register(common::admin_client_request("No Notify URI"))
        .await?;
    let view = resources.registry.get(&credentials.client_id).await?;

    let error = resources
        .notifications
        .notify_client(&view, vec![USAGE_POINT.to_owned()])
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidInput);

    let credentials = resources
        .registry
        .register(common::energy_client_request("Empty Batch"))
        .await?;
    let view = resources.registry.get(&credentials.client_id).await?;
    let error = resources
        .notifications
        .notify_client(&view, Vec::new())
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidInput);
    Ok(())
}
