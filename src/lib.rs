// ABOUTME: Library entry point for the Green Button (ESPI) authorization layer
// ABOUTME: Scope grammar, client registry, certificate trust, consent ledger, audit, and metrics
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

#![deny(unsafe_code)]

//! # Green Button Authorization
//!
//! The OAuth 2.0 authorization layer of a Green Button Connect My Data
//! Data Custodian. It registers Third Party clients, interprets Green Button
//! scope strings, tracks retail customer consent, trusts client certificates
//! for mutual TLS, and keeps an append-only audit trail rolled up into daily
//! per-client metrics.
//!
//! Token issuance itself is delegated to an external engine reached through
//! [`oauth2_server::TokenIssuanceEngine`].
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use greenbutton_authorization::config::environment::ServerConfig;
//! use greenbutton_authorization::database::Database;
//! use greenbutton_authorization::resources::ServerResources;
//! use greenbutton_core::errors::AppResult;
//!
//! #[tokio::main]
//! async fn main() -> AppResult<()> {
//!     let config = ServerConfig::from_env();
//!     let database = Database::new(&config.database_url).await?;
//!     let resources = ServerResources::builder(config, database).build()?;
//!     println!("Registry ready, HTTPS enforced: {}", resources.config.registration.enforce_https);
//!     Ok(())
//! }
//! ```

/// TTL and LRU cache abstraction for client views
pub mod cache;

/// Client certificate parsing, fingerprinting, and trust decisions
pub mod certificates;

/// Environment-driven configuration
pub mod config;

/// Consent ledger and consent delta computation
pub mod consent;

/// SQLite persistence
pub mod database;

/// Client status transitions, lockout, and bulk operations
pub mod lifecycle;

/// Structured logging setup
pub mod logging;

/// Admin and principal route guards
pub mod middleware;

/// Daily per-client metrics rolled up from the audit trail
pub mod metrics;

/// Outbound Third Party `BatchList` notifications
pub mod notifications;

/// Client registration, redirect URI policy, and the token engine seam
pub mod oauth2_server;

/// Dependency container wiring every service
pub mod resources;

/// HTTP routes
pub mod routes;

/// Interval scheduler for rollup and retention jobs
pub mod scheduler;

/// Green Button scope grammar
pub mod scopes;

/// Security audit trail
pub mod security;
