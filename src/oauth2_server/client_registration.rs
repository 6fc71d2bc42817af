// ABOUTME: ESPI dynamic client registration and management (RFC 7591 / RFC 7592)
// ABOUTME: Validates metadata, issues credentials, syncs the token engine, and authenticates clients
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use super::models::{
    ClientCredentials, ClientRegistrationRequest, ClientSecretRotation, ClientView, OAuth2Error,
};
use super::redirect_uri::RedirectUriPolicy;
use super::token_engine::{call_engine, EngineClientRegistration, TokenIssuanceEngine, TokenPolicy};
use crate::cache::client_view_key;
use crate::config::RegistrationConfig;
use crate::database::{ClientListFilter, Database};
use crate::lifecycle::{
    BulkOperationKind, BulkOperationReport, ClientLifecycleManager, ClientViewCache,
    StatusUpdateRequest,
};
use crate::scopes::{self, ParsedScope};
use crate::security::audit::{AuditEvent, AuditEventType, AuditSeverity, SecurityAuditor};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use greenbutton_core::constants::registration::{CLIENT_ID_RANDOM_BYTES, CLIENT_SECRET_BYTES};
use greenbutton_core::errors::{AppError, AppResult};
use greenbutton_core::models::{
    ClientStatus, GrantType, RecordMetadata, RegisteredClient, TokenEndpointAuthMethod,
};
use greenbutton_core::pagination::{Page, PageRequest};
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registration metadata after every compliance check passed
struct ValidatedMetadata {
    client_name: String,
    redirect_uris: Vec<String>,
    grant_types: Vec<GrantType>,
    auth_method: TokenEndpointAuthMethod,
    scopes: BTreeSet<String>,
    notify_uri: Option<String>,
    warnings: Vec<String>,
}

/// ESPI client registry
pub struct ClientRegistry {
    database: Database,
    auditor: SecurityAuditor,
    lifecycle: ClientLifecycleManager,
    engine: Arc<dyn TokenIssuanceEngine>,
    cache: ClientViewCache,
    config: RegistrationConfig,
    redirect_policy: RedirectUriPolicy,
}

impl ClientRegistry {
    /// Create a registry
    #[must_use]
    pub fn new(
        database: Database,
        auditor: SecurityAuditor,
        lifecycle: ClientLifecycleManager,
        engine: Arc<dyn TokenIssuanceEngine>,
        cache: ClientViewCache,
        config: RegistrationConfig,
    ) -> Self {
        let redirect_policy = RedirectUriPolicy::new(config.enforce_https);
        Self {
            database,
            auditor,
            lifecycle,
            engine,
            cache,
            config,
            redirect_policy,
        }
    }

    /// Token policy handed to the engine for every client
    #[must_use]
    pub const fn token_policy(&self) -> &TokenPolicy {
        &self.config.token_policy
    }

    /// Register a new ESPI client
    ///
    /// The store insert happens first so a duplicate `client_id` surfaces as
    /// a retryable conflict. If the engine then refuses the client, the row
    /// is removed again.
    ///
    /// # Errors
    ///
    /// Returns `invalid_client_metadata` for the first failed compliance
    /// check, `temporarily_unavailable` on an identifier collision, and
    /// `server_error` for store or engine failures
    pub async fn register(
        &self,
        request: ClientRegistrationRequest,
    ) -> Result<ClientCredentials, OAuth2Error> {
        let metadata = self.validate(&request)?;

        let client_id = self.generate_client_id()?;
        let client_secret = generate_client_secret()?;
        let client_secret_hash = hash_client_secret(&client_secret)?;

        let now = Utc::now();
        let mut client = RegisteredClient {
            metadata: RecordMetadata::new(now),
            client_id: client_id.clone(),
            client_name: metadata.client_name,
            client_secret_hash,
            grant_types: metadata.grant_types,
            auth_methods: vec![metadata.auth_method],
            redirect_uris: metadata.redirect_uris,
            scopes: metadata.scopes,
            status: ClientStatus::Active,
            status_reason: None,
            require_consent: true,
            rate_limit_per_minute: request
                .rate_limit_per_minute
                .unwrap_or(self.config.default_rate_limit_per_minute),
            max_concurrent_sessions: request
                .max_concurrent_sessions
                .unwrap_or(self.config.default_max_concurrent_sessions),
            failure_count: 0,
            locked_until: None,
            notify_uri: metadata.notify_uri,
            issued_at: now,
            secret_expires_at: self.secret_expiry(now),
        };
        client.require_consent = !client.is_machine_to_machine();

        self.database.insert_client(&client).await.map_err(|e| {
            warn!(client_id = %client_id, error = %e, "Failed to store client registration");
            OAuth2Error::from(e)
        })?;

        let registration = EngineClientRegistration::from_client(&client, &self.config.token_policy);
        if let Err(e) = call_engine(
            self.config.token_engine_timeout,
            "register_client",
            self.engine.register_client(&registration),
        )
        .await
        {
            if let Err(cleanup) = self.database.delete_client_cascade(&client_id).await {
                warn!(client_id = %client_id, error = %cleanup, "Failed to remove client after engine rejection");
            }
            return Err(OAuth2Error::from(e));
        }

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::ClientRegistered,
                    AuditSeverity::Info,
                    format!("Client {} registered as {client_id}", client.client_name),
                )
                .with_client_id(&client_id)
                .with_payload(json!({
                    "client_name": client.client_name,
                    "grant_types": client.grant_types,
                    "scope": client.scope_string(),
                    "require_consent": client.require_consent,
                    "warnings": metadata.warnings,
                })),
            )
            .await;

        info!(client_id = %client_id, require_consent = client.require_consent, "Registered ESPI client");

        Ok(ClientCredentials {
            client_id,
            client_secret,
            client_id_issued_at: now.timestamp(),
            client_secret_expires_at: client.secret_expires_at.map_or(0, |at| at.timestamp()),
            scope: client.scope_string(),
            scope_descriptions: client.scopes.iter().map(|s| scopes::describe_scope(s)).collect(),
            client_name: client.client_name,
            redirect_uris: client.redirect_uris,
            grant_types: client.grant_types,
            token_endpoint_auth_method: metadata.auth_method,
            require_consent: client.require_consent,
            token_policy: self.config.token_policy.clone(),
            warnings: metadata.warnings,
        })
    }

    /// Update a client's metadata
    ///
    /// Omitted fields keep their stored values and the merged metadata is
    /// validated exactly like a registration. `client_id` never changes.
    ///
    /// # Errors
    ///
    /// Returns `invalid_client` for an unknown client, `client_inactive` for
    /// a revoked one, `invalid_client_metadata` for a failed check, and
    /// `server_error` for store or engine failures
    pub async fn update(
        &self,
        client_id: &str,
        request: ClientRegistrationRequest,
    ) -> Result<ClientView, OAuth2Error> {
        let mut client = self.load(client_id).await.map_err(OAuth2Error::from)?;
        if client.status == ClientStatus::Revoked {
            return Err(OAuth2Error::client_inactive(format!(
                "Client {client_id} is revoked"
            )));
        }

        let merged = ClientRegistrationRequest {
            client_name: request.client_name.or_else(|| Some(client.client_name.clone())),
            redirect_uris: request
                .redirect_uris
                .or_else(|| Some(client.redirect_uris.clone())),
            grant_types: request.grant_types.or_else(|| {
                Some(client.grant_types.iter().map(ToString::to_string).collect())
            }),
            scope: request.scope.or_else(|| Some(client.scope_string())),
            token_endpoint_auth_method: request.token_endpoint_auth_method.or_else(|| {
                client.auth_methods.first().map(ToString::to_string)
            }),
            notify_uri: request.notify_uri.or_else(|| client.notify_uri.clone()),
            rate_limit_per_minute: request.rate_limit_per_minute,
            max_concurrent_sessions: request.max_concurrent_sessions,
        };
        let metadata = self.validate(&merged)?;

        let mut changed = Vec::new();
        if metadata.client_name != client.client_name {
            changed.push("client_name");
        }
        if metadata.redirect_uris != client.redirect_uris {
            changed.push("redirect_uris");
        }
        if metadata.grant_types != client.grant_types {
            changed.push("grant_types");
        }
        if metadata.scopes != client.scopes {
            changed.push("scope");
        }
        if metadata.notify_uri != client.notify_uri {
            changed.push("notify_uri");
        }

        client.client_name = metadata.client_name;
        client.redirect_uris = metadata.redirect_uris;
        client.grant_types = metadata.grant_types;
        client.auth_methods = vec![metadata.auth_method];
        client.scopes = metadata.scopes;
        client.notify_uri = metadata.notify_uri;
        if let Some(limit) = merged.rate_limit_per_minute {
            client.rate_limit_per_minute = limit;
        }
        if let Some(sessions) = merged.max_concurrent_sessions {
            client.max_concurrent_sessions = sessions;
        }
        client.require_consent = !client.is_machine_to_machine();
        client.metadata.touch(Utc::now());

        let registration = EngineClientRegistration::from_client(&client, &self.config.token_policy);
        call_engine(
            self.config.token_engine_timeout,
            "update_client",
            self.engine.update_client(&registration),
        )
        .await
        .map_err(OAuth2Error::from)?;
        let written = self
            .database
            .update_client_metadata(&client)
            .await
            .map_err(OAuth2Error::from)?;
        self.invalidate(client_id).await;
        if !written {
            return Err(self.unwritten_client_error(client_id).await.into());
        }
        let client = self.load(client_id).await.map_err(OAuth2Error::from)?;

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::ClientUpdated,
                    AuditSeverity::Info,
                    format!("Client {client_id} updated"),
                )
                .with_client_id(client_id)
                .with_payload(json!({ "changed": changed, "warnings": metadata.warnings })),
            )
            .await;

        Ok(ClientView::from(&client))
    }

    /// Error for a conditional write that matched no row
    async fn unwritten_client_error(&self, client_id: &str) -> AppError {
        match self.load(client_id).await {
            Ok(_) => AppError::invalid_transition(format!(
                "Client {client_id} was revoked while the change was in progress"
            ))
            .with_resource_id(client_id),
            Err(e) => e,
        }
    }

    /// Client view without secret material, served from the cache when possible
    ///
    /// # Errors
    ///
    /// Returns not-found or a store failure
    pub async fn get(&self, client_id: &str) -> AppResult<ClientView> {
        let key = client_view_key(client_id);
        if let Some(view) = self.cache.get(&key).await {
            debug!(client_id, "Client view cache hit");
            return Ok(view);
        }
        let view = ClientView::from(&self.load(client_id).await?);
        self.cache.set(&key, view.clone()).await;
        Ok(view)
    }

    /// List clients with filtering, sorting, and pagination
    ///
    /// # Errors
    ///
    /// Returns a store failure
    pub async fn list(
        &self,
        filter: &ClientListFilter,
        page: PageRequest,
    ) -> AppResult<Page<ClientView>> {
        let clients = self.database.list_clients(filter, page).await?;
        Ok(clients.map(|client| ClientView::from(&client)))
    }

    /// Delete a client with its certificates and consent records
    ///
    /// # Errors
    ///
    /// Returns not-found or a store failure
    pub async fn delete(&self, client_id: &str) -> AppResult<()> {
        self.lifecycle.delete(client_id).await
    }

    /// Replace a client's secret, returning the new plaintext once
    ///
    /// # Errors
    ///
    /// Returns not-found, an invalid transition for revoked clients, or an
    /// engine/store failure
    pub async fn rotate_secret(&self, client_id: &str) -> AppResult<ClientSecretRotation> {
        let mut client = self.load(client_id).await?;
        if client.status == ClientStatus::Revoked {
            return Err(AppError::invalid_transition(format!(
                "Client {client_id} is revoked; its secret cannot be rotated"
            ))
            .with_resource_id(client_id));
        }

        let client_secret = generate_client_secret().map_err(|e| AppError::internal(e.to_string()))?;
        client.client_secret_hash =
            hash_client_secret(&client_secret).map_err(|e| AppError::internal(e.to_string()))?;
        let now = Utc::now();
        client.secret_expires_at = self.secret_expiry(now);
        client.metadata.touch(now);

        let registration = EngineClientRegistration::from_client(&client, &self.config.token_policy);
        call_engine(
            self.config.token_engine_timeout,
            "update_client",
            self.engine.update_client(&registration),
        )
        .await?;
        let written = self
            .database
            .update_client_secret(
                client_id,
                &client.client_secret_hash,
                client.secret_expires_at,
                now,
            )
            .await?;
        self.invalidate(client_id).await;
        if !written {
            return Err(self.unwritten_client_error(client_id).await);
        }

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::ClientSecretRotated,
                    AuditSeverity::Warning,
                    format!("Secret rotated for client {client_id}"),
                )
                .with_client_id(client_id),
            )
            .await;

        Ok(ClientSecretRotation {
            client_id: client.client_id,
            client_secret,
            client_secret_expires_at: client.secret_expires_at.map_or(0, |at| at.timestamp()),
        })
    }

    /// Authenticate a client by secret
    ///
    /// The attempt is recorded before status is checked, so failures against
    /// a suspended client still count and a success still resets the counter.
    ///
    /// # Errors
    ///
    /// Returns `invalid_client` for an unknown client, a wrong secret, or an
    /// expired secret, and `client_inactive` for a suspended or revoked client
    pub async fn authenticate(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<ClientView, OAuth2Error> {
        let client = self
            .database
            .get_client(client_id)
            .await
            .map_err(OAuth2Error::from)?
            .ok_or_else(|| {
                warn!(client_id, "Authentication attempted for unknown client");
                OAuth2Error::invalid_client("Client authentication failed")
            })?;

        if !verify_client_secret(client_secret, &client.client_secret_hash) {
            match self.lifecycle.record_authentication_failure(client_id).await {
                Ok(outcome) if outcome.locked_out => {
                    warn!(client_id, failure_count = outcome.failure_count, "Client locked out");
                }
                Ok(_) => {}
                Err(e) => warn!(client_id, error = %e, "Failed to record authentication failure"),
            }
            return Err(OAuth2Error::invalid_client("Client authentication failed"));
        }

        if let Err(e) = self.lifecycle.record_authentication_success(client_id).await {
            warn!(client_id, error = %e, "Failed to record authentication success");
        }

        let now = Utc::now();
        if client.status != ClientStatus::Active {
            return Err(OAuth2Error::client_inactive(format!(
                "Client {client_id} is {}",
                client.status
            )));
        }
        if client.is_secret_expired(now) {
            return Err(OAuth2Error::invalid_client("Client secret has expired"));
        }

        let mut view = ClientView::from(&client);
        view.failure_count = 0;
        Ok(view)
    }

    /// Apply an administrator status update
    ///
    /// # Errors
    ///
    /// Returns the lifecycle transition error
    pub async fn update_status(
        &self,
        client_id: &str,
        request: StatusUpdateRequest,
    ) -> AppResult<ClientView> {
        self.lifecycle.update_status(client_id, request).await
    }

    /// Apply a bulk operation; each client succeeds or fails independently
    pub async fn bulk(
        &self,
        operation: BulkOperationKind,
        client_ids: &[String],
    ) -> BulkOperationReport {
        self.lifecycle.bulk(operation, client_ids).await
    }

    async fn load(&self, client_id: &str) -> AppResult<RegisteredClient> {
        self.database
            .get_client(client_id)
            .await?
            .ok_or_else(|| AppError::not_found("Client").with_resource_id(client_id))
    }

    async fn invalidate(&self, client_id: &str) {
        self.cache.invalidate(&client_view_key(client_id)).await;
    }

    fn secret_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.config
            .client_secret_ttl_days
            .filter(|days| *days > 0)
            .map(|days| now + Duration::days(days))
    }

    /// Run the registration compliance checks; the first violation wins
    fn validate(
        &self,
        request: &ClientRegistrationRequest,
    ) -> Result<ValidatedMetadata, OAuth2Error> {
        let client_name = request
            .client_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| OAuth2Error::invalid_client_metadata("client_name is required"))?
            .to_owned();

        let requested_grants = request
            .grant_types
            .clone()
            .unwrap_or_else(|| vec![GrantType::AuthorizationCode.as_str().to_owned()]);
        let redirect_uris = request.redirect_uris.clone().unwrap_or_default();

        let wants_code = requested_grants
            .iter()
            .any(|grant| grant == GrantType::AuthorizationCode.as_str());
        if wants_code && redirect_uris.is_empty() {
            return Err(OAuth2Error::invalid_client_metadata(
                "redirect_uris must not be empty for the authorization_code grant",
            ));
        }

        for uri in &redirect_uris {
            self.redirect_policy.validate(uri).map_err(|reason| {
                warn!(redirect_uri = %uri, reason = %reason, "Rejected redirect_uri");
                OAuth2Error::invalid_client_metadata(format!("Invalid redirect_uri {uri}: {reason}"))
            })?;
        }

        if requested_grants.is_empty() {
            return Err(OAuth2Error::invalid_client_metadata(
                "grant_types must not be empty",
            ));
        }
        let mut grant_types = Vec::with_capacity(requested_grants.len());
        for grant in &requested_grants {
            let grant = grant
                .parse::<GrantType>()
                .map_err(OAuth2Error::invalid_client_metadata)?;
            if !grant_types.contains(&grant) {
                grant_types.push(grant);
            }
        }

        let auth_method = request
            .token_endpoint_auth_method
            .as_deref()
            .map_or(Ok(TokenEndpointAuthMethod::default()), str::parse)
            .map_err(OAuth2Error::invalid_client_metadata)?;

        if let Some(notify_uri) = &request.notify_uri {
            self.redirect_policy.validate(notify_uri).map_err(|reason| {
                OAuth2Error::invalid_client_metadata(format!("Invalid notify_uri {notify_uri}: {reason}"))
            })?;
        }

        if request.rate_limit_per_minute == Some(0) {
            return Err(OAuth2Error::invalid_client_metadata(
                "rate_limit_per_minute must be positive",
            ));
        }
        if request.max_concurrent_sessions == Some(0) {
            return Err(OAuth2Error::invalid_client_metadata(
                "max_concurrent_sessions must be positive",
            ));
        }

        let scopes = scopes::split_scope_string(request.scope.as_deref().unwrap_or_default());
        let warnings: Vec<String> = scopes
            .iter()
            .filter(|scope| {
                matches!(scopes::classify(scope), ParsedScope::Other(_))
                    && !scopes::is_espi_specific(scope)
            })
            .map(|scope| {
                warn!(client_name = %client_name, scope = %scope, "Registering non-ESPI scope");
                format!("scope {scope} is not defined by ESPI")
            })
            .collect();

        Ok(ValidatedMetadata {
            client_name,
            redirect_uris,
            grant_types,
            auth_method,
            scopes,
            notify_uri: request.notify_uri.clone(),
            warnings,
        })
    }

    /// `{prefix}{unix millis}_{random hex}`
    fn generate_client_id(&self) -> Result<String, OAuth2Error> {
        let mut suffix = [0u8; CLIENT_ID_RANDOM_BYTES];
        SystemRandom::new().fill(&mut suffix).map_err(|e| {
            tracing::error!(error = ?e, "System RNG failure while generating client_id");
            OAuth2Error::server_error("Unable to generate client identifier")
        })?;
        Ok(format!(
            "{}{}_{}",
            self.config.client_id_prefix,
            Utc::now().timestamp_millis(),
            hex::encode(suffix)
        ))
    }
}

/// 256-bit random secret, base64 encoded
fn generate_client_secret() -> Result<String, OAuth2Error> {
    let mut secret = [0u8; CLIENT_SECRET_BYTES];
    SystemRandom::new().fill(&mut secret).map_err(|e| {
        tracing::error!(error = ?e, "System RNG failure - cannot generate secure client secret");
        OAuth2Error::server_error("Unable to generate client secret")
    })?;
    Ok(general_purpose::STANDARD.encode(secret))
}

/// Hash a client secret for storage using Argon2id with a random salt
fn hash_client_secret(secret: &str) -> Result<String, OAuth2Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            tracing::error!(error = %e, "Argon2 password hashing failed");
            OAuth2Error::server_error("Unable to protect client secret")
        })
}

/// Constant-time verification via Argon2; unparseable hashes never verify
fn verify_client_secret(secret: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::error!("Stored client secret hash cannot be parsed");
        return false;
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}
