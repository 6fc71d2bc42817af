// ABOUTME: Integration tests for the per-client, per-customer consent ledger
// ABOUTME: Covers consent deltas, decision merging, denial redirects, and revocation
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use anyhow::Result;
use greenbutton_authorization::consent::{ConsentDecision, ConsentOutcome, ConsentRequirement};
use greenbutton_authorization::oauth2_server::InMemoryTokenEngine;
use greenbutton_authorization::resources::ServerResources;
use greenbutton_authorization::security::audit::{AuditEventType, AuditQuery};
use greenbutton_core::errors::ErrorCode;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

mod common;

const CUSTOMER: &str = "retail-customer-42";

fn scopes(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

async fn registered_client(resources: &ServerResources) -> Result<String> {
    Ok(resources
        .registry
        .register(common::energy_client_request("Consent Client"))
        .await?
        .client_id)
}

#[tokio::test]
async fn test_consent_required_until_approved() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let client_id = registered_client(&resources).await?;
    let requested = scopes(&["openid", common::ENERGY_SCOPE]);

    let requirement = resources
        .consent
        .check(&client_id, CUSTOMER, &requested)
        .await?;
    assert_eq!(requirement, ConsentRequirement::Required(requested.clone()));

    let record = resources
        .consent
        .record_consent(&client_id, CUSTOMER, &requested, &BTreeSet::new())
        .await?;
    assert!(record.espi_specific);
    assert_eq!(record.approved_scopes, requested);

    let requirement = resources
        .consent
        .check(&client_id, CUSTOMER, &requested)
        .await?;
    assert_eq!(requirement, ConsentRequirement::NotRequired);

    // Only the new scope is asked for
    let wider = scopes(&["openid", "profile", common::ENERGY_SCOPE]);
    let requirement = resources.consent.check(&client_id, CUSTOMER, &wider).await?;
    assert_eq!(requirement, ConsentRequirement::Required(scopes(&["profile"])));
    Ok(())
}

#[tokio::test]
async fn test_machine_to_machine_never_requires_consent() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let client_id = resources
        .registry
        .register(common::admin_client_request("Batch"))
        .await?
        .client_id;

    let requirement = resources
        .consent
        .check(&client_id, CUSTOMER, &scopes(&["DataCustodian_Admin_Access"]))
        .await?;
    assert_eq!(requirement, ConsentRequirement::NotRequired);
    Ok(())
}

#[tokio::test]
async fn test_unregistered_scope_rejected() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let client_id = registered_client(&resources).await?;

    let error = resources
        .consent
        .check(&client_id, CUSTOMER, &scopes(&["email"]))
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidInput);
    Ok(())
}

#[tokio::test]
async fn test_suspended_client_cannot_collect_consent() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let client_id = registered_client(&resources).await?;
    resources.lifecycle.suspend(&client_id, None, None).await?;

    let error = resources
        .consent
        .check(&client_id, CUSTOMER, &scopes(&["openid"]))
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::PermissionDenied);

    let error = resources
        .consent
        .check("third_party_missing", CUSTOMER, &scopes(&["openid"]))
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::ResourceNotFound);
    Ok(())
}

#[tokio::test]
async fn test_decisions_merge() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let client_id = registered_client(&resources).await?;

    resources
        .consent
        .record_consent(
            &client_id,
            CUSTOMER,
            &scopes(&["openid", "profile"]),
            &BTreeSet::new(),
        )
        .await?;

    let record = resources
        .consent
        .record_consent(
            &client_id,
            CUSTOMER,
            &scopes(&[common::ENERGY_SCOPE]),
            &scopes(&["profile"]),
        )
        .await?;

    assert_eq!(
        record.approved_scopes,
        scopes(&["openid", common::ENERGY_SCOPE])
    );
    assert_eq!(record.denied_scopes, scopes(&["profile"]));
    assert!(record.espi_specific);

    let error = resources
        .consent
        .record_consent(
            &client_id,
            CUSTOMER,
            &scopes(&["openid"]),
            &scopes(&["openid"]),
        )
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidInput);
    Ok(())
}

#[tokio::test]
async fn test_submit_decision_with_partial_approval() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let client_id = registered_client(&resources).await?;

    let decision = ConsentDecision {
        principal_name: CUSTOMER.to_owned(),
        scopes: BTreeMap::from([
            (common::ENERGY_SCOPE.to_owned(), true),
            ("profile".to_owned(), false),
        ]),
        redirect_uri: None,
        state: None,
    };
    let outcome = resources.consent.submit_decision(&client_id, &decision).await?;

    assert_eq!(
        outcome,
        ConsentOutcome::Approved {
            approved_scopes: scopes(&[common::ENERGY_SCOPE]),
            denied_scopes: scopes(&["profile"]),
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_full_denial_redirects_with_access_denied() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let client_id = registered_client(&resources).await?;

    let decision = ConsentDecision {
        principal_name: CUSTOMER.to_owned(),
        scopes: BTreeMap::from([(common::ENERGY_SCOPE.to_owned(), false)]),
        redirect_uri: None,
        state: Some("xyz".to_owned()),
    };
    let outcome = resources.consent.submit_decision(&client_id, &decision).await?;

    let ConsentOutcome::Denied {
        redirect_uri: Some(redirect_uri),
    } = &outcome
    else {
        panic!("expected a denial redirect, got {outcome:?}");
    };
    assert!(redirect_uri.starts_with("https://thirdparty.example.com/callback?"));
    assert!(redirect_uri.contains("error=access_denied"));
    assert!(redirect_uri.contains("state=xyz"));

    let denied = resources
        .auditor
        .query(&AuditQuery {
            client_id: Some(client_id.clone()),
            event_types: vec![AuditEventType::ConsentDenied],
            ..AuditQuery::default()
        })
        .await?;
    assert_eq!(denied.len(), 1);
    assert!(!denied[0].success);
    assert_eq!(denied[0].principal_name.as_deref(), Some(CUSTOMER));
    Ok(())
}

#[tokio::test]
async fn test_denial_with_unregistered_redirect_rejected() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let client_id = registered_client(&resources).await?;

    let decision = ConsentDecision {
        principal_name: CUSTOMER.to_owned(),
        scopes: BTreeMap::from([("openid".to_owned(), false)]),
        redirect_uri: Some("https://attacker.example.net/steal".to_owned()),
        state: None,
    };
    let error = resources
        .consent
        .submit_decision(&client_id, &decision)
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidInput);

    let empty = ConsentDecision {
        scopes: BTreeMap::new(),
        ..decision
    };
    let error = resources
        .consent
        .submit_decision(&client_id, &empty)
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidInput);
    Ok(())
}

#[tokio::test]
async fn test_revoke_consent_revokes_engine_authorizations() -> Result<()> {
    let engine = Arc::new(InMemoryTokenEngine::new());
    let resources =
        ServerResources::builder(common::test_config(), common::create_test_database().await?)
            .with_engine(Arc::clone(&engine) as _)
            .with_notification_transport(Arc::new(common::RecordingTransport::default()))
            .build()?;
    let client_id = registered_client(&resources).await?;
    resources
        .consent
        .record_consent(
            &client_id,
            CUSTOMER,
            &scopes(&[common::ENERGY_SCOPE]),
            &BTreeSet::new(),
        )
        .await?;

    assert!(resources.consent.revoke(&client_id, CUSTOMER).await?);
    assert!(resources.consent.get(&client_id, CUSTOMER).await?.is_none());
    assert_eq!(
        engine.client(&client_id).unwrap().revocations,
        vec![Some(CUSTOMER.to_owned())]
    );

    // Second revocation finds nothing
    assert!(!resources.consent.revoke(&client_id, CUSTOMER).await?);

    let requirement = resources
        .consent
        .check(&client_id, CUSTOMER, &scopes(&[common::ENERGY_SCOPE]))
        .await?;
    assert!(matches!(requirement, ConsentRequirement::Required(_)));
    Ok(())
}

#[tokio::test]
async fn test_consent_screen_and_principal_listing() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let client_id = registered_client(&resources).await?;

    let screen = resources
        .consent
        .consent_screen(&client_id, &scopes(&["openid", common::ENERGY_SCOPE]))
        .await?;
    assert_eq!(screen.client_name, "Consent Client");
    assert_eq!(screen.scopes.len(), 2);
    assert!(screen.espi_specific);

    resources
        .consent
        .record_consent(&client_id, CUSTOMER, &scopes(&["openid"]), &BTreeSet::new())
        .await?;
    let records = resources.consent.list_for_principal(CUSTOMER).await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].client_id, client_id);
    assert!(!records[0].espi_specific);
    Ok(())
}

#[tokio::test]
async fn test_consent_write_survives_failing_audit_store() -> Result<()> {
    let resources = ServerResources::builder(
        common::test_config(),
        common::create_test_database().await?,
    )
    .with_audit_store(Arc::new(common::FailingAuditStore))
    .with_notification_transport(Arc::new(common::RecordingTransport::default()))
    .build()?;
    let client_id = registered_client(&resources).await?;
    let requested = scopes(&["openid", common::ENERGY_SCOPE]);

    let record = resources
        .consent
        .record_consent(&client_id, CUSTOMER, &requested, &BTreeSet::new())
        .await?;
    assert_eq!(record.approved_scopes, requested);

    let stored = resources.consent.get(&client_id, CUSTOMER).await?.unwrap();
    assert_eq!(stored.approved_scopes, requested);
    assert_eq!(
        resources.consent.check(&client_id, CUSTOMER, &requested).await?,
        ConsentRequirement::NotRequired
    );

    assert!(resources.consent.revoke(&client_id, CUSTOMER).await?);
    assert!(resources.consent.get(&client_id, CUSTOMER).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_failed_consent_revocation_is_still_audited() -> Result<()> {
    let resources = ServerResources::builder(
        common::test_config(),
        common::create_test_database().await?,
    )
    .with_engine(Arc::new(common::ScriptedEngine::failing_revocations()))
    .with_notification_transport(Arc::new(common::RecordingTransport::default()))
    .build()?;
    let client_id = registered_client(&resources).await?;
    let requested = scopes(&["openid"]);
    resources
        .consent
        .record_consent(&client_id, CUSTOMER, &requested, &BTreeSet::new())
        .await?;

    let error = resources
        .consent
        .revoke(&client_id, CUSTOMER)
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::ExternalServiceError);
    assert!(resources.consent.get(&client_id, CUSTOMER).await?.is_some());

    let revocations: Vec<_> = common::audit_events(&resources)
        .await?
        .into_iter()
        .filter(|event| event.event_type == AuditEventType::ConsentRevoked)
        .collect();
    assert_eq!(revocations.len(), 1);
    assert!(!revocations[0].success);
    assert_eq!(revocations[0].principal_name.as_deref(), Some(CUSTOMER));
    Ok(())
}
