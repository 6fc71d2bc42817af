// ABOUTME: Registered Third Party client record with grant types, auth methods, and status
// ABOUTME: Encodes the status state machine and lockout checks used by the lifecycle manager
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use super::RecordMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// OAuth 2.0 grant types an ESPI client may register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Three-legged retail customer authorization
    AuthorizationCode,
    /// Machine-to-machine access, no retail customer involved
    ClientCredentials,
    /// Refresh of previously issued access tokens
    RefreshToken,
}

impl GrantType {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "client_credentials" => Ok(Self::ClientCredentials),
            "refresh_token" => Ok(Self::RefreshToken),
            other => Err(format!("unsupported_grant_type: {other}")),
        }
    }
}

/// Token endpoint client authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// HTTP Basic with client id and secret
    #[default]
    ClientSecretBasic,
    /// Credentials in the form body
    ClientSecretPost,
    /// Public client
    None,
}

impl TokenEndpointAuthMethod {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
            Self::None => "none",
        }
    }
}

impl fmt::Display for TokenEndpointAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenEndpointAuthMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client_secret_basic" => Ok(Self::ClientSecretBasic),
            "client_secret_post" => Ok(Self::ClientSecretPost),
            "none" => Ok(Self::None),
            other => Err(format!("unsupported token_endpoint_auth_method: {other}")),
        }
    }
}

/// Client status
///
/// `Active -> Suspended -> Active` may cycle; `Revoked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    /// May authenticate and obtain tokens
    Active,
    /// Temporarily barred, manually or by lockout
    Suspended,
    /// Permanently barred
    Revoked,
}

impl ClientStatus {
    /// Stored name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Revoked => "revoked",
        }
    }

    /// Whether `self -> next` is an allowed transition
    ///
    /// Re-applying the current non-terminal status is allowed so that a
    /// repeated suspension can extend a lock.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Revoked, _) => false,
            (Self::Active | Self::Suspended, _) => true,
        }
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "revoked" => Ok(Self::Revoked),
            other => Err(format!("unknown client status: {other}")),
        }
    }
}

/// Stored Third Party client registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClient {
    /// Internal id and timestamps
    pub metadata: RecordMetadata,
    /// Public client identifier, immutable after creation
    pub client_id: String,
    /// Display name shown on the consent screen
    pub client_name: String,
    /// Argon2id hash of the client secret
    pub client_secret_hash: String,
    /// Allowed grant types
    pub grant_types: Vec<GrantType>,
    /// Allowed token endpoint authentication methods
    pub auth_methods: Vec<TokenEndpointAuthMethod>,
    /// Registered redirect URIs in registration order
    pub redirect_uris: Vec<String>,
    /// Scopes the client may request
    pub scopes: BTreeSet<String>,
    /// Current status
    pub status: ClientStatus,
    /// Reason recorded with the last status change
    pub status_reason: Option<String>,
    /// Whether retail customers must approve access
    pub require_consent: bool,
    /// Requests per minute
    pub rate_limit_per_minute: u32,
    /// Maximum concurrent sessions
    pub max_concurrent_sessions: u32,
    /// Consecutive authentication failures
    pub failure_count: u32,
    /// Lock expiry set on automatic or timed suspension
    pub locked_until: Option<DateTime<Utc>>,
    /// Third Party notification endpoint for `BatchList` delivery
    pub notify_uri: Option<String>,
    /// When the client id was issued
    pub issued_at: DateTime<Utc>,
    /// When the current secret stops being accepted
    pub secret_expires_at: Option<DateTime<Utc>>,
}

impl RegisteredClient {
    /// Whether the only registered grant is `client_credentials`
    #[must_use]
    pub fn is_machine_to_machine(&self) -> bool {
        !self.grant_types.is_empty()
            && self
                .grant_types
                .iter()
                .all(|grant| *grant == GrantType::ClientCredentials)
    }

    /// Whether a timed lock is still in force at `now`
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// Whether the current secret has expired at `now`
    #[must_use]
    pub fn is_secret_expired(&self, now: DateTime<Utc>) -> bool {
        self.secret_expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// Scopes as a space-delimited OAuth scope string
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}
