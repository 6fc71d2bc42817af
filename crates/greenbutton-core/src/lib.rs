// ABOUTME: Core types and constants for the Green Button authorization layer
// ABOUTME: Foundation crate with error handling, record models, pagination, and constants
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

#![deny(unsafe_code)]

//! # Green Button Core
//!
//! Foundation crate providing shared types for the Green Button (ESPI)
//! authorization layer. This crate is designed to change infrequently, enabling
//! incremental compilation benefits in the workspace.
//!
//! ## Modules
//!
//! - **errors**: Unified error handling with `AppError`, `ErrorCode`, and `DatabaseError`
//! - **constants**: Protocol constants (scopes, token policy, retention horizons)
//! - **models**: Persisted records (clients, certificates, consent, daily metrics)
//! - **pagination**: Offset pagination for management listings

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Application constants organized by domain
pub mod constants;

/// Persisted record models shared by the store and the services
pub mod models;

/// Offset-based pagination for listing endpoints
pub mod pagination;
