// ABOUTME: Resource container wiring the registry, lifecycle, consent, certificates, and metrics
// ABOUTME: Collaborators are injected through a builder so tests can swap engines and stores
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! # Server Resources
//!
//! Builds every service once from a [`ServerConfig`] and a [`Database`] and
//! hands them to the HTTP layer and the scheduler behind one cloneable value.

use crate::cache::memory::InMemoryCache;
use crate::certificates::revocation::RevocationChecker;
use crate::certificates::CertificateTrustStore;
use crate::config::environment::ServerConfig;
use crate::consent::ConsentLedger;
use crate::database::Database;
use crate::lifecycle::{ClientLifecycleManager, ClientViewCache};
use crate::metrics::timing::{InMemoryUsageTimings, UsageTimingSource};
use crate::metrics::MetricsAggregator;
use crate::middleware::RequestAuth;
use crate::notifications::{HttpNotificationTransport, NotificationQueue, NotificationTransport};
use crate::oauth2_server::client_registration::ClientRegistry;
use crate::oauth2_server::{ClientView, InMemoryTokenEngine, TokenIssuanceEngine};
use crate::scheduler::{JobScheduler, NightlyRollupJob, RetentionPruneJob};
use crate::security::audit::{AuditStore, SecurityAuditor};
use greenbutton_core::errors::AppResult;
use std::sync::Arc;
use std::time::Duration;

/// Per-request timeout for outbound notification delivery
const NOTIFICATION_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared services
#[derive(Clone)]
pub struct ServerResources {
    /// Configuration the services were built from
    pub config: Arc<ServerConfig>,
    /// Persistent store
    pub database: Database,
    /// Security audit trail
    pub auditor: SecurityAuditor,
    /// Token-issuance engine
    pub engine: Arc<dyn TokenIssuanceEngine>,
    /// Client registry
    pub registry: Arc<ClientRegistry>,
    /// Status transitions and lockout
    pub lifecycle: ClientLifecycleManager,
    /// Client certificate trust
    pub certificates: Arc<CertificateTrustStore>,
    /// Consent ledger
    pub consent: ConsentLedger,
    /// Daily metrics
    pub metrics: MetricsAggregator,
    /// Outbound Third Party notifications
    pub notifications: NotificationQueue,
    /// Route guards
    pub auth: Arc<RequestAuth>,
}

impl ServerResources {
    /// Start a builder
    #[must_use]
    pub fn builder(config: ServerConfig, database: Database) -> ServerResourcesBuilder {
        ServerResourcesBuilder {
            config,
            database,
            engine: None,
            audit_store: None,
            revocation_checker: None,
            timings: None,
            transport: None,
        }
    }

    /// Scheduler with the rollup and prune jobs at their configured intervals
    #[must_use]
    pub fn scheduler(&self) -> JobScheduler {
        let retention = &self.config.retention;
        JobScheduler::new()
            .with_job(Arc::new(NightlyRollupJob::new(
                self.metrics.clone(),
                retention.rollup_interval,
            )))
            .with_job(Arc::new(RetentionPruneJob::new(
                self.metrics.clone(),
                self.auditor.clone(),
                retention.prune_interval,
            )))
    }
}

/// Builder for [`ServerResources`]
///
/// Unset collaborators default to the in-process token engine, the database
/// audit store, no revocation checker, in-memory usage timings, and the HTTP
/// notification transport.
pub struct ServerResourcesBuilder {
    config: ServerConfig,
    database: Database,
    engine: Option<Arc<dyn TokenIssuanceEngine>>,
    audit_store: Option<Arc<dyn AuditStore>>,
    revocation_checker: Option<Arc<dyn RevocationChecker>>,
    timings: Option<Arc<dyn UsageTimingSource>>,
    transport: Option<Arc<dyn NotificationTransport>>,
}

impl ServerResourcesBuilder {
    /// Use an external token-issuance engine
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<dyn TokenIssuanceEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Write audit events somewhere other than the database
    #[must_use]
    pub fn with_audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(store);
        self
    }

    /// Consult a CRL/OCSP collaborator during certificate validation
    #[must_use]
    pub fn with_revocation_checker(mut self, checker: Arc<dyn RevocationChecker>) -> Self {
        self.revocation_checker = Some(checker);
        self
    }

    /// Source of per-client response times for the rollup
    #[must_use]
    pub fn with_usage_timings(mut self, timings: Arc<dyn UsageTimingSource>) -> Self {
        self.timings = Some(timings);
        self
    }

    /// Deliver notifications through a custom transport
    #[must_use]
    pub fn with_notification_transport(mut self, transport: Arc<dyn NotificationTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Wire every service and spawn the notification worker
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP notification transport cannot be built
    pub fn build(self) -> AppResult<ServerResources> {
        let Self {
            config,
            database,
            engine,
            audit_store,
            revocation_checker,
            timings,
            transport,
        } = self;

        let engine = engine.unwrap_or_else(|| Arc::new(InMemoryTokenEngine::new()));
        let audit_store = audit_store.unwrap_or_else(|| Arc::new(database.clone()));
        let auditor = SecurityAuditor::new(audit_store)
            .with_retention_days(config.retention.audit_retention_days);
        let timings = timings.unwrap_or_else(|| Arc::new(InMemoryUsageTimings::new()));
        let transport: Arc<dyn NotificationTransport> = match transport {
            Some(transport) => transport,
            None => Arc::new(HttpNotificationTransport::new(NOTIFICATION_HTTP_TIMEOUT)?),
        };
        let cache: ClientViewCache = Arc::new(InMemoryCache::<ClientView>::new(&config.cache));
        let engine_timeout = config.registration.token_engine_timeout;

        let metrics = MetricsAggregator::new(database.clone(), auditor.clone(), timings)
            .with_retention_days(config.retention.metrics_retention_days);
        let lifecycle = ClientLifecycleManager::new(
            database.clone(),
            auditor.clone(),
            metrics.clone(),
            Arc::clone(&engine),
            Arc::clone(&cache),
        )
        .with_policy(config.lockout)
        .with_engine_timeout(engine_timeout);
        let registry = ClientRegistry::new(
            database.clone(),
            auditor.clone(),
            lifecycle.clone(),
            Arc::clone(&engine),
            cache,
            config.registration.clone(),
        );

        let mut certificates =
            CertificateTrustStore::new(database.clone(), auditor.clone(), config.certificates.clone());
        if let Some(checker) = revocation_checker {
            certificates = certificates.with_revocation_checker(checker);
        }

        let consent = ConsentLedger::new(database.clone(), auditor.clone(), Arc::clone(&engine))
            .with_engine_timeout(engine_timeout);
        let (notifications, _worker) =
            NotificationQueue::start(transport, auditor.clone(), &config.notifications);
        let auth = Arc::new(RequestAuth::new(&config.access));

        Ok(ServerResources {
            config: Arc::new(config),
            database,
            auditor,
            engine,
            registry: Arc::new(registry),
            lifecycle,
            certificates: Arc::new(certificates),
            consent,
            metrics,
            notifications,
            auth,
        })
    }
}
