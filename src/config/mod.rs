// ABOUTME: Configuration module for the Green Button authorization server
// ABOUTME: Re-exports the environment-driven server configuration and its sections
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! Configuration module
//!
//! - **Environment**: server configuration read from environment variables,
//!   with typed sections for registration, certificates, lifecycle, retention,
//!   caching, and notifications

/// Environment and server configuration
pub mod environment;

pub use environment::{RegistrationConfig, RetentionConfig, ServerConfig};
