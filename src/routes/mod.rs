// ABOUTME: HTTP surface for registration, client administration, consent, certificates, and metrics
// ABOUTME: Thin axum handlers delegating to the services held by ServerResources
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! Route module
//!
//! Each domain module exposes a `*Routes::routes(resources)` constructor.
//! Handlers only translate between HTTP and the service layer; protocol
//! endpoints answer with `OAuth2Error` bodies and management endpoints with
//! `AppError` bodies.

/// Certificate upload, listing, revocation, and validation
pub mod certificates;
/// Client administration, status changes, and bulk operations
pub mod clients;
/// Consent screen, decisions, and revocation
pub mod consent;
/// Liveness and readiness probes
pub mod health;
/// Daily metrics queries and manual rollup
pub mod metrics;
/// Dynamic client registration
pub mod registration;

pub use certificates::CertificateRoutes;
pub use clients::ClientAdminRoutes;
pub use consent::ConsentRoutes;
pub use health::HealthRoutes;
pub use metrics::MetricsRoutes;
pub use registration::RegistrationRoutes;

use crate::resources::ServerResources;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Every route with request tracing
pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .merge(HealthRoutes::routes(Arc::clone(&resources)))
        .merge(RegistrationRoutes::routes(Arc::clone(&resources)))
        .merge(ClientAdminRoutes::routes(Arc::clone(&resources)))
        .merge(ConsentRoutes::routes(Arc::clone(&resources)))
        .merge(CertificateRoutes::routes(Arc::clone(&resources)))
        .merge(MetricsRoutes::routes(resources))
        .layer(TraceLayer::new_for_http())
}
