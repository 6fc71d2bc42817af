// ABOUTME: Protocol and policy constants for the Green Button authorization layer
// ABOUTME: Scope names, token-policy defaults, lockout defaults, and retention horizons
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! Constants module
//!
//! Constants are grouped by domain. Values that operators may override are
//! only defaults here; the live values come from `ServerConfig`.

/// Green Button scope grammar keys and fixed administrative scopes
pub mod scopes {
    /// Key carrying the function-block (feature) reference; its presence marks an ESPI scope
    pub const FEATURE_KEY: &str = "FB";
    /// Interval length in seconds
    pub const INTERVAL_DURATION_KEY: &str = "IntervalDuration";
    /// Billing block granularity
    pub const BLOCK_DURATION_KEY: &str = "BlockDuration";
    /// History depth in months
    pub const HISTORY_LENGTH_KEY: &str = "HistoryLength";
    /// Field separator inside a Green Button scope string
    pub const FIELD_SEPARATOR: char = ';';

    /// Data Custodian administrative scope
    pub const DATA_CUSTODIAN_ADMIN_ACCESS: &str = "DataCustodian_Admin_Access";
    /// Third Party administrative scope
    pub const THIRD_PARTY_ADMIN_ACCESS: &str = "ThirdParty_Admin_Access";
    /// `OpenID` Connect scope
    pub const OPENID: &str = "openid";
    /// Profile scope
    pub const PROFILE: &str = "profile";

    /// Substrings that mark a non-grammar scope as ESPI-specific
    pub const ESPI_ROLE_MARKERS: [&str; 2] = ["DataCustodian", "ThirdParty"];
}

/// Token policy handed to the token-issuance engine
pub mod token_policy {
    /// Access token lifetime: 6 hours
    pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 6 * 60 * 60;
    /// Refresh token lifetime: 60 hours
    pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: i64 = 60 * 60 * 60;
    /// Refresh tokens may be presented more than once
    pub const DEFAULT_REUSE_REFRESH_TOKENS: bool = true;
}

/// Dynamic client registration defaults
pub mod registration {
    /// Prefix for generated client identifiers
    pub const DEFAULT_CLIENT_ID_PREFIX: &str = "third_party_";
    /// Client secret entropy in bytes (256 bits)
    pub const CLIENT_SECRET_BYTES: usize = 32;
    /// Random suffix entropy in bytes for generated client identifiers
    pub const CLIENT_ID_RANDOM_BYTES: usize = 6;
    /// Default per-client rate limit (requests per minute)
    pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 100;
    /// Default maximum concurrent sessions
    pub const DEFAULT_MAX_CONCURRENT_SESSIONS: u32 = 5;
    /// Timeout applied to token-engine calls
    pub const DEFAULT_TOKEN_ENGINE_TIMEOUT_SECS: u64 = 10;
}

/// Client lifecycle defaults
pub mod lifecycle {
    /// Authentication failures before automatic lockout
    pub const DEFAULT_MAX_FAILURES: u32 = 5;
    /// Lockout duration applied on automatic suspension
    pub const DEFAULT_LOCKOUT_MINUTES: i64 = 30;
}

/// Retention horizons and scheduling intervals
pub mod retention {
    /// Audit events older than this are pruned
    pub const AUDIT_RETENTION_DAYS: i64 = 365;
    /// Daily metric rows older than this are pruned
    pub const METRICS_RETENTION_DAYS: i64 = 365;
    /// Nightly rollup interval
    pub const ROLLUP_INTERVAL_SECS: u64 = 24 * 60 * 60;
    /// Monthly prune interval
    pub const PRUNE_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;
}

/// Client view cache defaults
pub mod cache {
    /// Cached client views expire after five minutes
    pub const DEFAULT_CLIENT_CACHE_TTL_SECS: u64 = 300;
    /// Upper bound on cached client views
    pub const DEFAULT_CLIENT_CACHE_MAX_ENTRIES: usize = 1000;
}

/// Outbound Third Party notification defaults
pub mod notifications {
    /// Delivery attempts after the first failure
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    /// Bounded queue capacity
    pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
    /// Backoff base delay in milliseconds
    pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
    /// ESPI namespace used in `BatchList` documents
    pub const ESPI_NAMESPACE: &str = "http://naesb.org/espi";
}
