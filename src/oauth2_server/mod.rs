// ABOUTME: ESPI client registry on top of an external OAuth 2.0 token-issuance engine
// ABOUTME: Provides RFC 7591 style registration with ESPI compliance rules and client management
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

/// ESPI dynamic client registration and management
pub mod client_registration;
/// Registration request/response models and the OAuth 2.0 wire error
pub mod models;
/// Redirect URI security policy
pub mod redirect_uri;
/// Contract with the external token-issuance engine
pub mod token_engine;

// Client registry
pub use client_registration::ClientRegistry;

// Request/response models

/// Client registration request
pub use models::ClientRegistrationRequest;
/// One-time credentials returned by registration
pub use models::ClientCredentials;
/// Client view without secret material
pub use models::ClientView;
/// OAuth 2.0 error response
pub use models::OAuth2Error;
/// One-time secret returned by rotation
pub use models::ClientSecretRotation;

// Collaborator contracts

/// Redirect URI policy
pub use redirect_uri::RedirectUriPolicy;
/// Token engine contract and in-process implementation
pub use token_engine::{
    AccessTokenFormat, EngineClientRegistration, InMemoryTokenEngine, TokenIssuanceEngine,
    TokenPolicy,
};
