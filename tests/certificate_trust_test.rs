// ABOUTME: Integration tests for client certificate upload, validation, supersession, and revocation
// ABOUTME: Uses rcgen-generated certificates and fail-safe revocation checking
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use anyhow::Result;
use chrono::{TimeZone, Utc};
use greenbutton_authorization::certificates::{
    fingerprint, CertificateFailure, CertificatePolicy, StaticRevocationList,
};
use greenbutton_authorization::resources::ServerResources;
use greenbutton_core::errors::ErrorCode;
use greenbutton_core::models::CertificateStatus;
use std::sync::Arc;

mod common;

async fn resources_with_policy(
    policy: CertificatePolicy,
    checker: Option<Arc<dyn greenbutton_authorization::certificates::RevocationChecker>>,
) -> Result<ServerResources> {
    let mut config = common::test_config();
    config.certificates = policy;
    let mut builder = ServerResources::builder(config, common::create_test_database().await?)
        .with_notification_transport(Arc::new(common::RecordingTransport::default()));
    if let Some(checker) = checker {
        builder = builder.with_revocation_checker(checker);
    }
    Ok(builder.build()?)
}

async fn client_with_certificate(
    resources: &ServerResources,
    common_name: &str,
) -> Result<(String, rcgen::CertifiedKey)> {
    let client_id = resources
        .registry
        .register(common::energy_client_request(common_name))
        .await?
        .client_id;
    let cert = common::generate_certificate(common_name)?;
    resources
        .certificates
        .upload(&client_id, cert.cert.pem().as_bytes(), "admin@utility.example.com")
        .await?;
    Ok((client_id, cert))
}

#[tokio::test]
async fn test_uploaded_certificate_resolves_client() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let (client_id, cert) = client_with_certificate(&resources, "Third Party").await?;

    let validation = resources.certificates.validate(cert.cert.der()).await;
    assert!(validation.valid, "{:?}", validation.reason);
    assert_eq!(validation.client_id.as_deref(), Some(client_id.as_str()));
    let info = validation.certificate.clone().unwrap();
    assert!(info.subject_dn.contains("Third Party"));
    assert_eq!(info.fingerprint, fingerprint::fingerprint(cert.cert.der()));

    assert_eq!(validation.into_client_id()?, client_id);

    let records = resources.certificates.list(&client_id).await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, CertificateStatus::Active);
    assert_eq!(records[0].uploaded_by, "admin@utility.example.com");
    Ok(())
}

#[tokio::test]
async fn test_unknown_certificate_has_no_client() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let stranger = common::generate_certificate("Stranger")?;

    let validation = resources.certificates.validate(stranger.cert.der()).await;
    assert!(!validation.valid);
    assert_eq!(validation.failure, Some(CertificateFailure::NoClient));
    assert_eq!(
        validation.into_client_id().unwrap_err().error,
        "no_client_for_certificate"
    );
    Ok(())
}

#[tokio::test]
async fn test_malformed_certificate_rejected() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;

    let validation = resources.certificates.validate(b"definitely not a certificate").await;
    assert!(!validation.valid);
    assert_eq!(validation.failure, Some(CertificateFailure::Malformed));
    assert!(validation.certificate.is_none());
    assert_eq!(
        validation.into_client_id().unwrap_err().error,
        "certificate_invalid"
    );
    Ok(())
}

#[tokio::test]
async fn test_validity_window_enforced() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let (_, cert) = client_with_certificate(&resources, "Time Bound").await?;

    let before = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
    let validation = resources.certificates.validate_at(cert.cert.der(), before).await;
    assert_eq!(validation.failure, Some(CertificateFailure::NotYetValid));

    let expired = common::generate_certificate_with("Expired", |params| {
        params.not_before = rcgen::date_time_ymd(2019, 1, 1);
        params.not_after = rcgen::date_time_ymd(2020, 1, 1);
    })?;
    let validation = resources.certificates.validate(expired.cert.der()).await;
    assert_eq!(validation.failure, Some(CertificateFailure::Expired));
    Ok(())
}

#[tokio::test]
async fn test_key_usage_without_digital_signature_rejected() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let signing_only = common::generate_certificate_with("CA Only", |params| {
        params.key_usages = vec![rcgen::KeyUsagePurpose::KeyCertSign];
    })?;

    let validation = resources.certificates.validate(signing_only.cert.der()).await;
    assert_eq!(validation.failure, Some(CertificateFailure::KeyUsage));

    let no_usage = common::generate_certificate_with("No Usage", |params| {
        params.key_usages = Vec::new();
    })?;
    let validation = resources.certificates.validate(no_usage.cert.der()).await;
    assert_eq!(validation.failure, Some(CertificateFailure::NoClient));
    Ok(())
}

#[tokio::test]
async fn test_required_extension_policy() -> Result<()> {
    let resources = resources_with_policy(
        CertificatePolicy {
            check_revocation: false,
            // Authority Information Access
            required_extensions: vec!["1.3.6.1.5.5.7.1.1".to_owned()],
        },
        None,
    )
    .await?;
    let cert = common::generate_certificate("Missing AIA")?;

    let validation = resources.certificates.validate(cert.cert.der()).await;
    assert_eq!(validation.failure, Some(CertificateFailure::MissingExtension));
    Ok(())
}

#[tokio::test]
async fn test_new_upload_supersedes_active_certificate() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let (client_id, old_cert) = client_with_certificate(&resources, "Rotating Cert").await?;

    let new_cert = common::generate_certificate("Rotating Cert v2")?;
    resources
        .certificates
        .upload(&client_id, new_cert.cert.der(), "admin")
        .await?;

    let records = resources.certificates.list(&client_id).await?;
    assert_eq!(records.len(), 2);
    assert_eq!(
        records
            .iter()
            .filter(|r| r.status == CertificateStatus::Active)
            .count(),
        1
    );

    let validation = resources.certificates.validate(old_cert.cert.der()).await;
    assert_eq!(validation.failure, Some(CertificateFailure::Revoked));
    assert_eq!(validation.client_id.as_deref(), Some(client_id.as_str()));

    let validation = resources.certificates.validate(new_cert.cert.der()).await;
    assert!(validation.valid);
    Ok(())
}

#[tokio::test]
async fn test_revoke_by_fingerprint_is_idempotent() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let (_, cert) = client_with_certificate(&resources, "Revoked Cert").await?;

    let colon_form = fingerprint::fingerprint(cert.cert.der())
        .to_uppercase()
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":");

    assert!(resources
        .certificates
        .revoke(&colon_form, Some("key compromise"))
        .await?);
    assert!(!resources.certificates.revoke(&colon_form, None).await?);
    assert!(!resources.certificates.revoke("00ff", None).await?);

    let validation = resources.certificates.validate(cert.cert.der()).await;
    assert_eq!(validation.failure, Some(CertificateFailure::Revoked));
    assert!(validation.reason.unwrap().contains("key compromise"));
    Ok(())
}

#[tokio::test]
async fn test_inactive_client_certificate_rejected() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let (client_id, cert) = client_with_certificate(&resources, "Suspended Cert").await?;
    resources.lifecycle.suspend(&client_id, None, None).await?;

    let validation = resources.certificates.validate(cert.cert.der()).await;
    assert_eq!(validation.failure, Some(CertificateFailure::ClientInactive));
    assert_eq!(validation.into_client_id().unwrap_err().error, "client_inactive");
    Ok(())
}

#[tokio::test]
async fn test_upload_rejections() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let (client_id, cert) = client_with_certificate(&resources, "Upload Rules").await?;

    let error = resources
        .certificates
        .upload("third_party_missing", cert.cert.der(), "admin")
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::ResourceNotFound);

    let expired = common::generate_certificate_with("Expired Upload", |params| {
        params.not_before = rcgen::date_time_ymd(2019, 1, 1);
        params.not_after = rcgen::date_time_ymd(2020, 1, 1);
    })?;
    let error = resources
        .certificates
        .upload(&client_id, expired.cert.der(), "admin")
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidInput);
    assert!(error.message.starts_with("certificate_invalid"));

    resources.lifecycle.revoke(&client_id, None).await?;
    let fresh = common::generate_certificate("After Revoke")?;
    let error = resources
        .certificates
        .upload(&client_id, fresh.cert.der(), "admin")
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidStateTransition);
    Ok(())
}

#[tokio::test]
async fn test_revocation_check_fails_safe() -> Result<()> {
    let policy = CertificatePolicy {
        check_revocation: true,
        required_extensions: Vec::new(),
    };

    let unreachable = resources_with_policy(
        policy.clone(),
        Some(Arc::new(common::UnreachableRevocationChecker)),
    )
    .await?;
    let (_, cert) = client_with_certificate(&unreachable, "Unreachable OCSP").await?;
    let validation = unreachable.certificates.validate(cert.cert.der()).await;
    assert_eq!(validation.failure, Some(CertificateFailure::Revoked));
    assert_eq!(
        validation.into_client_id().unwrap_err().error,
        "certificate_revoked"
    );

    let unconfigured = resources_with_policy(policy, None).await?;
    let (_, cert) = client_with_certificate(&unconfigured, "No Checker").await?;
    let validation = unconfigured.certificates.validate(cert.cert.der()).await;
    assert_eq!(validation.failure, Some(CertificateFailure::Revoked));
    Ok(())
}

#[tokio::test]
async fn test_issuer_revocation_list_consulted() -> Result<()> {
    let list = Arc::new(StaticRevocationList::new());
    let resources = resources_with_policy(
        CertificatePolicy {
            check_revocation: true,
            required_extensions: Vec::new(),
        },
        Some(Arc::clone(&list) as _),
    )
    .await?;
    let (_, cert) = client_with_certificate(&resources, "Listed Serial").await?;

    let validation = resources.certificates.validate(cert.cert.der()).await;
    assert!(validation.valid, "{:?}", validation.reason);
    let serial = validation.certificate.unwrap().serial_number;

    list.revoke_serial(&serial.to_uppercase());
    let validation = resources.certificates.validate(cert.cert.der()).await;
    assert_eq!(validation.failure, Some(CertificateFailure::Revoked));
    Ok(())
}

#[tokio::test]
async fn test_trailing_bytes_do_not_mint_a_second_fingerprint() -> Result<()> {
    let (resources, _) = common::create_test_resources().await?;
    let (client_a, cert) = client_with_certificate(&resources, "Original Holder").await?;
    let client_b = resources
        .registry
        .register(common::energy_client_request("Padding Claimant"))
        .await?
        .client_id;

    let mut padded = cert.cert.der().to_vec();
    padded.push(0x00);

    let error = resources
        .certificates
        .upload(&client_b, &padded, "admin")
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidInput);
    assert!(resources.certificates.list(&client_b).await?.is_empty());

    let validation = resources.certificates.validate(&padded).await;
    assert!(!validation.valid);
    assert_eq!(validation.failure, Some(CertificateFailure::Malformed));

    let validation = resources.certificates.validate(cert.cert.der()).await;
    assert_eq!(validation.client_id.as_deref(), Some(client_a.as_str()));
    Ok(())
}

#[tokio::test]
async fn test_validation_survives_failing_audit_store() -> Result<()> {
    let resources = ServerResources::builder(
        common::test_config(),
        common::create_test_database().await?,
    )
    .with_audit_store(Arc::new(common::FailingAuditStore))
    .with_notification_transport(Arc::new(common::RecordingTransport::default()))
    .build()?;
    let (client_id, cert) = client_with_certificate(&resources, "Unaudited Holder").await?;

    let validation = resources.certificates.validate(cert.cert.der()).await;
    assert!(validation.valid, "{:?}", validation.reason);
    assert_eq!(validation.client_id.as_deref(), Some(client_id.as_str()));

    let stranger = common::generate_certificate("Unaudited Stranger")?;
    let validation = resources.certificates.validate(stranger.cert.der()).await;
    assert_eq!(validation.failure, Some(CertificateFailure::NoClient));

    let fingerprint = fingerprint::fingerprint(cert.cert.der());
    assert!(resources.certificates.revoke(&fingerprint, None).await?);
    Ok(())
}
