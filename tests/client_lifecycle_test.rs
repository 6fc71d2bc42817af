// ABOUTME: Integration tests for client status transitions, automatic lockout, and bulk operations
// ABOUTME: Verifies engine synchronisation and that deletion cascades without touching audit history
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use anyhow::Result;
use chrono::Utc;
use greenbutton_authorization::lifecycle::{
    BulkOperationKind, LockoutPolicy, StatusAction, StatusUpdateRequest,
};
use greenbutton_authorization::oauth2_server::InMemoryTokenEngine;
use greenbutton_authorization::resources::ServerResources;
use greenbutton_authorization::security::audit::{AuditEventType, AuditQuery};
use greenbutton_core::errors::ErrorCode;
use greenbutton_core::models::ClientStatus;
use std::collections::BTreeSet;
use std::sync::Arc;

mod common;

async fn resources_with_engine() -> Result<(ServerResources, Arc<InMemoryTokenEngine>)> {
    let mut config = common::test_config();
    config.lockout = LockoutPolicy {
        max_failures: 3,
        lockout_minutes: 15,
    };
    let engine = Arc::new(InMemoryTokenEngine::new());
    let resources = ServerResources::builder(config, common::create_test_database().await?)
        .with_engine(Arc::clone(&engine) as _)
        .with_notification_transport(Arc::new(common::RecordingTransport::default()))
        .build()?;
    Ok((resources, engine))
}

#[tokio::test]
async fn test_suspend_and_activate() -> Result<()> {
    let (resources, engine) = resources_with_engine().await?;
    let client_id = resources
        .registry
        .register(common::energy_client_request("Suspendable"))
        .await?
        .client_id;

    let view = resources
        .lifecycle
        .suspend(&client_id, Some(60), Some("investigating".to_owned()))
        .await?;
    assert_eq!(view.status, ClientStatus::Suspended);
    assert!(view.locked_until.unwrap() > Utc::now());
    assert_eq!(view.status_reason.as_deref(), Some("investigating"));
    assert!(!engine.client(&client_id).unwrap().enabled);

    let view = resources
        .lifecycle
        .update_status(
            &client_id,
            StatusUpdateRequest {
                action: StatusAction::Activate,
                lock_minutes: None,
                reason: Some("cleared".to_owned()),
            },
        )
        .await?;
    assert_eq!(view.status, ClientStatus::Active);
    assert!(view.locked_until.is_none());
    assert!(engine.client(&client_id).unwrap().enabled);
    Ok(())
}

#[tokio::test]
async fn test_non_positive_lock_rejected() -> Result<()> {
    let (resources, _) = resources_with_engine().await?;
    let client_id = resources
        .registry
        .register(common::energy_client_request("Bad Lock"))
        .await?
        .client_id;

    let error = resources
        .lifecycle
        .suspend(&client_id, Some(0), None)
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidInput);
    Ok(())
}

#[tokio::test]
async fn test_revoked_is_terminal() -> Result<()> {
    let (resources, engine) = resources_with_engine().await?;
    let client_id = resources
        .registry
        .register(common::energy_client_request("Terminal"))
        .await?
        .client_id;

    let view = resources
        .lifecycle
        .revoke(&client_id, Some("contract ended".to_owned()))
        .await?;
    assert_eq!(view.status, ClientStatus::Revoked);
    let state = engine.client(&client_id).unwrap();
    assert!(!state.enabled);
    assert_eq!(state.revocations, vec![None]);

    let error = resources
        .lifecycle
        .activate(&client_id, None)
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidStateTransition);

    let error = resources
        .lifecycle
        .suspend(&client_id, None, None)
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidStateTransition);

    // Revoking again is a no-op
    let view = resources.lifecycle.revoke(&client_id, None).await?;
    assert_eq!(view.status, ClientStatus::Revoked);
    assert_eq!(engine.client(&client_id).unwrap().revocations.len(), 1);

    let error = resources
        .registry
        .update(&client_id, common::energy_client_request("Renamed"))
        .await
        .unwrap_err();
    assert_eq!(error.error, "client_inactive");
    Ok(())
}

#[tokio::test]
async fn test_lockout_after_repeated_failures() -> Result<()> {
    let (resources, engine) = resources_with_engine().await?;
    let credentials = resources
        .registry
        .register(common::energy_client_request("Brute Forced"))
        .await?;
    let client_id = credentials.client_id.clone();

    for _ in 0..2 {
        let outcome = resources
            .lifecycle
            .record_authentication_failure(&client_id)
            .await?;
        assert!(!outcome.locked_out);
    }
    let outcome = resources
        .lifecycle
        .record_authentication_failure(&client_id)
        .await?;
    assert!(outcome.locked_out);
    assert_eq!(outcome.failure_count, 3);

    let view = resources.registry.get(&client_id).await?;
    assert_eq!(view.status, ClientStatus::Suspended);
    assert!(view.locked_until.unwrap() > Utc::now());
    assert!(!engine.client(&client_id).unwrap().enabled);

    // A correct secret resets the counter but the client stays suspended
    let error = resources
        .registry
        .authenticate(&client_id, &credentials.client_secret)
        .await
        .unwrap_err();
    assert_eq!(error.error, "client_inactive");
    let view = resources.registry.get(&client_id).await?;
    assert_eq!(view.failure_count, 0);
    assert_eq!(view.status, ClientStatus::Suspended);

    let locked = resources
        .auditor
        .query(&AuditQuery {
            client_id: Some(client_id.clone()),
            event_types: vec![AuditEventType::ClientLockedOut],
            ..AuditQuery::default()
        })
        .await?;
    assert_eq!(locked.len(), 1);

    let view = resources.lifecycle.activate(&client_id, None).await?;
    assert_eq!(view.status, ClientStatus::Active);
    assert_eq!(view.failure_count, 0);
    assert!(view.locked_until.is_none());
    resources
        .registry
        .authenticate(&client_id, &credentials.client_secret)
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_failures_counted_through_authenticate() -> Result<()> {
    let (resources, _) = resources_with_engine().await?;
    let client_id = resources
        .registry
        .register(common::energy_client_request("Wrong Secret"))
        .await?
        .client_id;

    for _ in 0..3 {
        let error = resources
            .registry
            .authenticate(&client_id, "not-the-secret")
            .await
            .unwrap_err();
        assert_eq!(error.error, "invalid_client");
    }

    let view = resources.registry.get(&client_id).await?;
    assert_eq!(view.status, ClientStatus::Suspended);
    assert_eq!(view.failure_count, 3);
    Ok(())
}

#[tokio::test]
async fn test_delete_cascades_and_keeps_audit() -> Result<()> {
    let (resources, engine) = resources_with_engine().await?;
    let client_id = resources
        .registry
        .register(common::energy_client_request("Deleted"))
        .await?
        .client_id;

    let cert = common::generate_certificate("Deleted Client")?;
    resources
        .certificates
        .upload(&client_id, cert.cert.der(), "admin")
        .await?;
    let scopes: BTreeSet<String> = [common::ENERGY_SCOPE.to_owned()].into();
    resources
        .consent
        .record_consent(&client_id, "customer-1", &scopes, &BTreeSet::new())
        .await?;

    resources.registry.delete(&client_id).await?;

    let error = resources.registry.get(&client_id).await.unwrap_err();
    assert_eq!(error.code, ErrorCode::ResourceNotFound);
    assert!(resources.certificates.list(&client_id).await?.is_empty());
    assert!(resources.consent.get(&client_id, "customer-1").await?.is_none());
    assert!(engine.client(&client_id).is_none());

    let history = resources
        .auditor
        .query(&AuditQuery {
            client_id: Some(client_id.clone()),
            ..AuditQuery::default()
        })
        .await?;
    assert!(history
        .iter()
        .any(|e| e.event_type == AuditEventType::ClientRegistered));
    assert!(history
        .iter()
        .any(|e| e.event_type == AuditEventType::ClientDeleted));

    let error = resources.registry.delete(&client_id).await.unwrap_err();
    assert_eq!(error.code, ErrorCode::ResourceNotFound);
    Ok(())
}

#[tokio::test]
async fn test_bulk_suspend_reports_per_client() -> Result<()> {
    let (resources, _) = resources_with_engine().await?;
    let first = resources
        .registry
        .register(common::energy_client_request("Bulk One"))
        .await?
        .client_id;
    let second = resources
        .registry
        .register(common::energy_client_request("Bulk Two"))
        .await?
        .client_id;

    let report = resources
        .registry
        .bulk(
            BulkOperationKind::Suspend,
            &[
                first.clone(),
                "third_party_missing".to_owned(),
                second.clone(),
                first.clone(),
            ],
        )
        .await;

    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert!(!report.results[1].success);
    assert!(report.results[1].error.is_some());

    assert_eq!(
        resources.registry.get(&first).await?.status,
        ClientStatus::Suspended
    );
    assert_eq!(
        resources.registry.get(&second).await?.status,
        ClientStatus::Suspended
    );
    Ok(())
}

#[tokio::test]
async fn test_client_health_summarises_recent_metrics() -> Result<()> {
    let (resources, _) = resources_with_engine().await?;
    let client_id = resources
        .registry
        .register(common::energy_client_request("Healthy"))
        .await?
        .client_id;

    let health = resources
        .lifecycle
        .health(&client_id, Utc::now().date_naive())
        .await?;
    assert_eq!(health.status, ClientStatus::Active);
    assert!(!health.locked);
    assert_eq!(health.recent.days, 0);
    Ok(())
}

async fn resources_with_slow_engine() -> Result<ServerResources> {
    let mut config = common::test_config();
    config.lockout = LockoutPolicy {
        max_failures: 3,
        lockout_minutes: 15,
    };
    let engine = Arc::new(common::ScriptedEngine::slow_updates(
        std::time::Duration::from_millis(300),
    ));
    Ok(
        ServerResources::builder(config, common::create_test_database().await?)
            .with_engine(engine as _)
            .with_notification_transport(Arc::new(common::RecordingTransport::default()))
            .build()?,
    )
}

#[tokio::test]
async fn test_revoke_during_metadata_update_stays_revoked() -> Result<()> {
    let resources = resources_with_slow_engine().await?;
    let client_id = resources
        .registry
        .register(common::energy_client_request("Racing Update"))
        .await?
        .client_id;

    let registry = Arc::clone(&resources.registry);
    let update_id = client_id.clone();
    let update = tokio::spawn(async move {
        let mut request = common::energy_client_request("Renamed During Revoke");
        request.redirect_uris = None;
        registry.update(&update_id, request).await
    });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let revoked = resources
        .lifecycle
        .revoke(&client_id, Some("compromised".to_owned()))
        .await?;
    assert_eq!(revoked.status, ClientStatus::Revoked);

    let error = update.await?.unwrap_err();
    assert_eq!(error.error, "client_inactive");

    let view = resources.registry.get(&client_id).await?;
    assert_eq!(view.status, ClientStatus::Revoked);
    assert_eq!(view.client_name, "Racing Update");
    Ok(())
}

#[tokio::test]
async fn test_lockout_during_metadata_update_is_kept() -> Result<()> {
    let resources = resources_with_slow_engine().await?;
    let client_id = resources
        .registry
        .register(common::energy_client_request("Locked Mid Update"))
        .await?
        .client_id;

    let registry = Arc::clone(&resources.registry);
    let update_id = client_id.clone();
    let update = tokio::spawn(async move {
        let mut request = common::energy_client_request("Renamed During Lockout");
        request.redirect_uris = None;
        registry.update(&update_id, request).await
    });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    for _ in 0..3 {
        resources
            .lifecycle
            .record_authentication_failure(&client_id)
            .await?;
    }

    let view = update.await?.unwrap();
    assert_eq!(view.client_name, "Renamed During Lockout");
    assert_eq!(view.status, ClientStatus::Suspended);

    let client = resources.database.get_client(&client_id).await?.unwrap();
    assert_eq!(client.status, ClientStatus::Suspended);
    assert_eq!(client.failure_count, 3);
    assert!(client.locked_until.unwrap() > Utc::now());
    Ok(())
}

#[tokio::test]
async fn test_stale_transition_reports_conflict() -> Result<()> {
    let (resources, _) = resources_with_engine().await?;
    let client_id = resources
        .registry
        .register(common::energy_client_request("Stale Writer"))
        .await?
        .client_id;
    resources.lifecycle.revoke(&client_id, None).await?;

    let written = resources
        .database
        .transition_client_status(
            &client_id,
            &greenbutton_authorization::database::StatusTransition {
                from: &[ClientStatus::Active, ClientStatus::Suspended],
                to: ClientStatus::Active,
                reason: None,
                locked_until: None,
                reset_failures: true,
                updated_at: Utc::now(),
            },
        )
        .await?;
    assert!(!written);
    let client = resources.database.get_client(&client_id).await?.unwrap();
    assert_eq!(client.status, ClientStatus::Revoked);
    Ok(())
}
