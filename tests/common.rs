// ABOUTME: Shared test utilities for integration tests
// ABOUTME: In-memory database setup, resource wiring, request builders, and injectable collaborators
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::unwrap_used
)]
//! Shared test utilities for `greenbutton_authorization`

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use greenbutton_authorization::{
    certificates::{revocation::RevocationChecker, CertificateInfo},
    config::environment::{ServerConfig, DEFAULT_PRINCIPAL_TOKEN_AUDIENCE},
    database::Database,
    middleware::PrincipalClaims,
    notifications::NotificationTransport,
    oauth2_server::{
        ClientRegistrationRequest, EngineClientRegistration, InMemoryTokenEngine,
        TokenIssuanceEngine,
    },
    resources::ServerResources,
    security::audit::{AuditEvent, AuditQuery, AuditStore},
};
use greenbutton_core::errors::{AppError, AppResult};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };
        let _ = tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .try_init();
    });
}

/// Fresh in-memory database
pub async fn create_test_database() -> Result<Database> {
    init_test_logging();
    Ok(Database::new("sqlite::memory:").await?)
}

/// Admin bearer key configured by [`test_config`]
pub const ADMIN_API_KEY: &str = "test-admin-key";

/// Principal token secret configured by [`test_config`]
pub const PRINCIPAL_TOKEN_SECRET: &str = "test-principal-secret";

/// Default configuration with fast notification retries and route credentials
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.notifications.retry.base_delay = Duration::from_millis(1);
    config.access.admin_api_key = Some(ADMIN_API_KEY.to_owned());
    config.access.principal_token_secret = Some(PRINCIPAL_TOKEN_SECRET.to_owned());
    config
}

/// Session token for `principal` as the login front end would issue it
pub fn principal_token(principal: &str) -> String {
    let claims = PrincipalClaims::new(
        principal,
        DEFAULT_PRINCIPAL_TOKEN_AUDIENCE,
        Utc::now(),
        chrono::Duration::minutes(15),
    );
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(PRINCIPAL_TOKEN_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Resources over a fresh database with a recording notification transport
pub async fn create_test_resources() -> Result<(ServerResources, Arc<RecordingTransport>)> {
    create_test_resources_with(test_config()).await
}

/// Resources over a fresh database with the given configuration
pub async fn create_test_resources_with(
    config: ServerConfig,
) -> Result<(ServerResources, Arc<RecordingTransport>)> {
    let database = create_test_database().await?;
    let transport = Arc::new(RecordingTransport::default());
    let resources = ServerResources::builder(config, database)
        .with_notification_transport(Arc::clone(&transport) as Arc<dyn NotificationTransport>)
        .build()?;
    Ok((resources, transport))
}

/// The Green Button scope used across tests
pub const ENERGY_SCOPE: &str = "FB=4_5_15;IntervalDuration=3600;BlockDuration=monthly;HistoryLength=13";

/// Registration request for a typical three-legged Third Party
pub fn energy_client_request(name: &str) -> ClientRegistrationRequest {
    ClientRegistrationRequest {
        client_name: Some(name.to_owned()),
        redirect_uris: Some(vec!["https://thirdparty.example.com/callback".to_owned()]),
        grant_types: Some(vec![
            "authorization_code".to_owned(),
            "refresh_token".to_owned(),
        ]),
        scope: Some(format!("openid profile {ENERGY_SCOPE}")),
        notify_uri: Some("https://thirdparty.example.com/espi/notify".to_owned()),
        ..ClientRegistrationRequest::default()
    }
}

/// Registration request for a machine-to-machine client
pub fn admin_client_request(name: &str) -> ClientRegistrationRequest {
    ClientRegistrationRequest {
        client_name: Some(name.to_owned()),
        grant_types: Some(vec!["client_credentials".to_owned()]),
        scope: Some("DataCustodian_Admin_Access".to_owned()),
        ..ClientRegistrationRequest::default()
    }
}

/// Every stored audit event
pub async fn audit_events(resources: &ServerResources) -> Result<Vec<AuditEvent>> {
    Ok(resources.auditor.query(&AuditQuery::default()).await?)
}

/// Self-signed v3 certificate valid from 2024 to 2099
pub fn generate_certificate(common_name: &str) -> Result<rcgen::CertifiedKey> {
    generate_certificate_with(common_name, |_| {})
}

/// Self-signed certificate with customised parameters
pub fn generate_certificate_with(
    common_name: &str,
    customize: impl FnOnce(&mut rcgen::CertificateParams),
) -> Result<rcgen::CertifiedKey> {
    let key_pair = rcgen::KeyPair::generate()?;
    let mut params = rcgen::CertificateParams::new(vec!["thirdparty.example.com".to_owned()])?;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name);
    params.key_usages = vec![rcgen::KeyUsagePurpose::DigitalSignature];
    params.not_before = rcgen::date_time_ymd(2024, 1, 1);
    params.not_after = rcgen::date_time_ymd(2099, 12, 31);
    customize(&mut params);
    let cert = params.self_signed(&key_pair)?;
    Ok(rcgen::CertifiedKey { cert, key_pair })
}

/// Notification transport that records deliveries and can fail a set number of times
#[derive(Default)]
pub struct RecordingTransport {
    deliveries: Mutex<Vec<(String, String)>>,
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
}

impl RecordingTransport {
    /// Fail the next `count` sends
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Successful deliveries as (`notify_uri`, body)
    pub fn deliveries(&self) -> Vec<(String, String)> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Every send attempt, successful or not
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send(&self, notify_uri: &str, body: &str) -> AppResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::external_unavailable("notify_uri", "connection refused"));
        }
        self.deliveries
            .lock()
            .unwrap()
            .push((notify_uri.to_owned(), body.to_owned()));
        Ok(())
    }
}

/// Audit store whose writes always fail
pub struct FailingAuditStore;

#[async_trait]
impl AuditStore for FailingAuditStore {
    async fn append(&self, _event: &AuditEvent) -> AppResult<()> {
        Err(AppError::database("audit store offline"))
    }

    async fn query(&self, _query: &AuditQuery) -> AppResult<Vec<AuditEvent>> {
        Err(AppError::database("audit store offline"))
    }

    async fn prune_before(&self, _cutoff: DateTime<Utc>) -> AppResult<u64> {
        Err(AppError::database("audit store offline"))
    }
}

/// Revocation checker that is never reachable
pub struct UnreachableRevocationChecker;

#[async_trait]
impl RevocationChecker for UnreachableRevocationChecker {
    async fn is_revoked(&self, _certificate: &CertificateInfo) -> AppResult<bool> {
        Err(AppError::external_unavailable("ocsp", "responder timed out"))
    }
}

/// Token engine delegating to an in-memory engine, with a slow `update_client`
/// and an optionally failing `revoke_authorizations`
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    pub inner: InMemoryTokenEngine,
    pub update_delay: Duration,
    pub fail_revocations: bool,
}

impl ScriptedEngine {
    pub fn slow_updates(delay: Duration) -> Self {
        Self {
            update_delay: delay,
            ..Self::default()
        }
    }

    pub fn failing_revocations() -> Self {
        Self {
            fail_revocations: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl TokenIssuanceEngine for ScriptedEngine {
    async fn register_client(&self, registration: &EngineClientRegistration) -> AppResult<()> {
        self.inner.register_client(registration).await
    }

    async fn update_client(&self, registration: &EngineClientRegistration) -> AppResult<()> {
        tokio::time::sleep(self.update_delay).await;
        self.inner.update_client(registration).await
    }

    async fn set_client_enabled(&self, client_id: &str, enabled: bool) -> AppResult<()> {
        self.inner.set_client_enabled(client_id, enabled).await
    }

    async fn remove_client(&self, client_id: &str) -> AppResult<()> {
        self.inner.remove_client(client_id).await
    }

    async fn revoke_authorizations(
        &self,
        client_id: &str,
        principal_name: Option<&str>,
    ) -> AppResult<()> {
        if self.fail_revocations {
            return Err(AppError::external_service("token engine", "revocation endpoint refused"));
        }
        self.inner.revoke_authorizations(client_id, principal_name).await
    }
}
