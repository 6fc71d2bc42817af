// ABOUTME: Contract with the external OAuth 2.0 token-issuance engine plus an in-process implementation
// ABOUTME: The registry supplies client records and token policy; tokens themselves are never minted here
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use async_trait::async_trait;
use dashmap::DashMap;
use greenbutton_core::constants::token_policy::{
    DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_REFRESH_TOKEN_TTL_SECS, DEFAULT_REUSE_REFRESH_TOKENS,
};
use greenbutton_core::errors::{AppError, AppResult};
use greenbutton_core::models::{GrantType, RegisteredClient, TokenEndpointAuthMethod};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

/// Access token representation requested from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTokenFormat {
    /// Opaque reference token validated by introspection
    Reference,
    /// Self-contained signed token
    SelfContained,
}

/// Token settings handed to the engine for every ESPI client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPolicy {
    /// Access token representation
    pub access_token_format: AccessTokenFormat,
    /// Access token lifetime in seconds
    pub access_token_ttl_secs: i64,
    /// Refresh token lifetime in seconds
    pub refresh_token_ttl_secs: i64,
    /// Whether a refresh token may be presented more than once
    pub reuse_refresh_tokens: bool,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            access_token_format: AccessTokenFormat::Reference,
            access_token_ttl_secs: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            refresh_token_ttl_secs: DEFAULT_REFRESH_TOKEN_TTL_SECS,
            reuse_refresh_tokens: DEFAULT_REUSE_REFRESH_TOKENS,
        }
    }
}

/// Client record as the engine stores it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineClientRegistration {
    /// Public client identifier
    pub client_id: String,
    /// Argon2id hash the engine verifies secrets against
    pub client_secret_hash: String,
    /// Allowed grants
    pub grant_types: Vec<GrantType>,
    /// Allowed token endpoint authentication methods
    pub auth_methods: Vec<TokenEndpointAuthMethod>,
    /// Registered redirect URIs
    pub redirect_uris: Vec<String>,
    /// Scopes the client may request
    pub scopes: BTreeSet<String>,
    /// Whether the engine must show the consent step
    pub require_consent: bool,
    /// Token settings
    pub token_policy: TokenPolicy,
}

impl EngineClientRegistration {
    /// Build the engine view of a stored client
    #[must_use]
    pub fn from_client(client: &RegisteredClient, token_policy: &TokenPolicy) -> Self {
        Self {
            client_id: client.client_id.clone(),
            client_secret_hash: client.client_secret_hash.clone(),
            grant_types: client.grant_types.clone(),
            auth_methods: client.auth_methods.clone(),
            redirect_uris: client.redirect_uris.clone(),
            scopes: client.scopes.clone(),
            require_consent: client.require_consent,
            token_policy: token_policy.clone(),
        }
    }
}

/// External token-issuance engine client storage contract
#[async_trait]
pub trait TokenIssuanceEngine: Send + Sync {
    /// Make a newly registered client known to the engine
    async fn register_client(&self, registration: &EngineClientRegistration) -> AppResult<()>;

    /// Replace the engine's copy of a client
    async fn update_client(&self, registration: &EngineClientRegistration) -> AppResult<()>;

    /// Allow or refuse token issuance for a client
    async fn set_client_enabled(&self, client_id: &str, enabled: bool) -> AppResult<()>;

    /// Forget a client entirely
    async fn remove_client(&self, client_id: &str) -> AppResult<()>;

    /// Revoke issued authorizations for a client, optionally for one principal only
    async fn revoke_authorizations(&self, client_id: &str, principal_name: Option<&str>)
        -> AppResult<()>;
}

/// Run an engine call under a timeout
///
/// Timeouts surface as `ExternalServiceUnavailable`; nothing is retried.
///
/// # Errors
///
/// Returns the call's own error, or a timeout error
pub async fn call_engine<T, F>(timeout: Duration, operation: &'static str, call: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>> + Send,
{
    if let Ok(result) = tokio::time::timeout(timeout, call).await {
        result.map_err(|e| {
            tracing::error!(operation, error = %e, "Token engine call failed");
            e
        })
    } else {
        tracing::error!(
            operation,
            timeout_ms = timeout.as_millis() as u64,
            "Token engine call timed out"
        );
        Err(AppError::external_unavailable(
            "token engine",
            format!("{operation} timed out after {}ms", timeout.as_millis()),
        ))
    }
}

/// Engine state kept for a client by [`InMemoryTokenEngine`]
#[derive(Debug, Clone)]
pub struct EngineClientState {
    /// Last registration received
    pub registration: EngineClientRegistration,
    /// Whether issuance is allowed
    pub enabled: bool,
    /// Authorization revocations received, `None` meaning all principals
    pub revocations: Vec<Option<String>>,
}

/// In-process engine used by the standalone server and tests
#[derive(Debug, Default)]
pub struct InMemoryTokenEngine {
    clients: DashMap<String, EngineClientState>,
}

impl InMemoryTokenEngine {
    /// Create an empty engine
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a client's engine state
    #[must_use]
    pub fn client(&self, client_id: &str) -> Option<EngineClientState> {
        self.clients.get(client_id).map(|entry| entry.value().clone())
    }

    /// Number of clients known to the engine
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no clients are known
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl TokenIssuanceEngine for InMemoryTokenEngine {
    async fn register_client(&self, registration: &EngineClientRegistration) -> AppResult<()> {
        self.clients.insert(
            registration.client_id.clone(),
            EngineClientState {
                registration: registration.clone(),
                enabled: true,
                revocations: Vec::new(),
            },
        );
        Ok(())
    }

    async fn update_client(&self, registration: &EngineClientRegistration) -> AppResult<()> {
        let mut entry = self
            .clients
            .get_mut(&registration.client_id)
            .ok_or_else(|| AppError::not_found(format!("Engine client {}", registration.client_id)))?;
        entry.registration = registration.clone();
        Ok(())
    }

    async fn set_client_enabled(&self, client_id: &str, enabled: bool) -> AppResult<()> {
        let mut entry = self
            .clients
            .get_mut(client_id)
            .ok_or_else(|| AppError::not_found(format!("Engine client {client_id}")))?;
        entry.enabled = enabled;
        Ok(())
    }

    async fn remove_client(&self, client_id: &str) -> AppResult<()> {
        self.clients.remove(client_id);
        Ok(())
    }

    async fn revoke_authorizations(
        &self,
        client_id: &str,
        principal_name: Option<&str>,
    ) -> AppResult<()> {
        if let Some(mut entry) = self.clients.get_mut(client_id) {
            entry.revocations.push(principal_name.map(str::to_owned));
        }
        Ok(())
    }
}
