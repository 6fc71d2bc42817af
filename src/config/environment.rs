// ABOUTME: Environment configuration for the Green Button authorization server
// ABOUTME: Reads typed settings with defaults; invalid values fall back to defaults with a warning
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! Environment-based configuration management

use crate::cache::CacheConfig;
use crate::certificates::CertificatePolicy;
use crate::lifecycle::LockoutPolicy;
use crate::notifications::{NotificationConfig, RetryPolicy};
use crate::oauth2_server::{AccessTokenFormat, TokenPolicy};
use greenbutton_core::constants::{cache, lifecycle, notifications, registration, retention, token_policy};
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 8081;
/// Default database URL
pub const DEFAULT_DATABASE_URL: &str = "sqlite:./data/greenbutton.db";

/// Dynamic client registration settings
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// Reject plain-HTTP and non-loopback IP redirect URIs
    pub enforce_https: bool,
    /// Prefix for generated client identifiers
    pub client_id_prefix: String,
    /// Token settings handed to the engine for every client
    pub token_policy: TokenPolicy,
    /// Client secret lifetime; `None` means secrets never expire
    pub client_secret_ttl_days: Option<i64>,
    /// Timeout applied to every token-engine call
    pub token_engine_timeout: Duration,
    /// Default requests per minute for new clients
    pub default_rate_limit_per_minute: u32,
    /// Default concurrent session cap for new clients
    pub default_max_concurrent_sessions: u32,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            enforce_https: true,
            client_id_prefix: registration::DEFAULT_CLIENT_ID_PREFIX.to_owned(),
            token_policy: TokenPolicy::default(),
            client_secret_ttl_days: None,
            token_engine_timeout: Duration::from_secs(
                registration::DEFAULT_TOKEN_ENGINE_TIMEOUT_SECS,
            ),
            default_rate_limit_per_minute: registration::DEFAULT_RATE_LIMIT_PER_MINUTE,
            default_max_concurrent_sessions: registration::DEFAULT_MAX_CONCURRENT_SESSIONS,
        }
    }
}

/// Retention horizons and scheduled job intervals
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Daily metric rows older than this many days are pruned
    pub metrics_retention_days: i64,
    /// Audit events older than this many days are pruned
    pub audit_retention_days: i64,
    /// Interval of the rollup job
    pub rollup_interval: Duration,
    /// Interval of the prune job
    pub prune_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            metrics_retention_days: retention::METRICS_RETENTION_DAYS,
            audit_retention_days: retention::AUDIT_RETENTION_DAYS,
            rollup_interval: Duration::from_secs(retention::ROLLUP_INTERVAL_SECS),
            prune_interval: Duration::from_secs(retention::PRUNE_INTERVAL_SECS),
        }
    }
}

/// Default audience expected in principal session tokens
pub const DEFAULT_PRINCIPAL_TOKEN_AUDIENCE: &str = "greenbutton-authorization";

/// Credentials guarding the management and consent routes
///
/// Both credentials are optional. Without an admin key every admin route is
/// refused, and without a token secret every consent route is refused.
#[derive(Clone)]
pub struct AccessConfig {
    /// Bearer key for `/admin/*` and `/certificates/*`
    pub admin_api_key: Option<String>,
    /// HS256 secret shared with the Data Custodian login front end
    pub principal_token_secret: Option<String>,
    /// Required `aud` claim of principal session tokens
    pub principal_token_audience: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            admin_api_key: None,
            principal_token_secret: None,
            principal_token_audience: DEFAULT_PRINCIPAL_TOKEN_AUDIENCE.to_owned(),
        }
    }
}

impl std::fmt::Debug for AccessConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessConfig")
            .field("admin_api_key", &self.admin_api_key.as_ref().map(|_| "****"))
            .field(
                "principal_token_secret",
                &self.principal_token_secret.as_ref().map(|_| "****"),
            )
            .field("principal_token_audience", &self.principal_token_audience)
            .finish()
    }
}

/// Complete server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// sqlx database URL
    pub database_url: String,
    /// Registration settings
    pub registration: RegistrationConfig,
    /// Certificate trust settings
    pub certificates: CertificatePolicy,
    /// Automatic lockout settings
    pub lockout: LockoutPolicy,
    /// Retention and scheduling
    pub retention: RetentionConfig,
    /// Client view cache
    pub cache: CacheConfig,
    /// Outbound notifications
    pub notifications: NotificationConfig,
    /// Route credentials
    pub access: AccessConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            database_url: DEFAULT_DATABASE_URL.to_owned(),
            registration: RegistrationConfig::default(),
            certificates: CertificatePolicy::default(),
            lockout: LockoutPolicy::default(),
            retention: RetentionConfig::default(),
            cache: CacheConfig::default(),
            notifications: NotificationConfig::default(),
            access: AccessConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Unset variables take their defaults. Unparseable values are logged
    /// and replaced by the default rather than failing startup.
    #[must_use]
    pub fn from_env() -> Self {
        let token_policy = TokenPolicy {
            access_token_format: AccessTokenFormat::Reference,
            access_token_ttl_secs: env_parse(
                "ESPI_ACCESS_TOKEN_TTL_SECS",
                token_policy::DEFAULT_ACCESS_TOKEN_TTL_SECS,
            ),
            refresh_token_ttl_secs: env_parse(
                "ESPI_REFRESH_TOKEN_TTL_SECS",
                token_policy::DEFAULT_REFRESH_TOKEN_TTL_SECS,
            ),
            reuse_refresh_tokens: env_bool(
                "ESPI_REUSE_REFRESH_TOKENS",
                token_policy::DEFAULT_REUSE_REFRESH_TOKENS,
            ),
        };

        let registration = RegistrationConfig {
            enforce_https: env_bool("ESPI_ENFORCE_HTTPS", true),
            client_id_prefix: env::var("ESPI_CLIENT_ID_PREFIX")
                .ok()
                .filter(|prefix| !prefix.trim().is_empty())
                .unwrap_or_else(|| registration::DEFAULT_CLIENT_ID_PREFIX.to_owned()),
            token_policy,
            client_secret_ttl_days: env_optional("ESPI_CLIENT_SECRET_TTL_DAYS"),
            token_engine_timeout: Duration::from_secs(env_parse(
                "ESPI_TOKEN_ENGINE_TIMEOUT_SECS",
                registration::DEFAULT_TOKEN_ENGINE_TIMEOUT_SECS,
            )),
            default_rate_limit_per_minute: env_parse(
                "ESPI_DEFAULT_RATE_LIMIT",
                registration::DEFAULT_RATE_LIMIT_PER_MINUTE,
            ),
            default_max_concurrent_sessions: env_parse(
                "ESPI_DEFAULT_MAX_SESSIONS",
                registration::DEFAULT_MAX_CONCURRENT_SESSIONS,
            ),
        };

        let certificates = CertificatePolicy {
            check_revocation: env_bool("ESPI_CERT_REVOCATION_CHECK", false),
            required_extensions: env::var("ESPI_CERT_REQUIRED_EXTENSIONS")
                .map(|value| parse_list(&value))
                .unwrap_or_default(),
        };

        let lockout = LockoutPolicy {
            max_failures: env_parse("ESPI_MAX_AUTH_FAILURES", lifecycle::DEFAULT_MAX_FAILURES),
            lockout_minutes: env_parse("ESPI_LOCKOUT_MINUTES", lifecycle::DEFAULT_LOCKOUT_MINUTES),
        };

        let retention = RetentionConfig {
            metrics_retention_days: env_parse(
                "ESPI_METRICS_RETENTION_DAYS",
                retention::METRICS_RETENTION_DAYS,
            ),
            audit_retention_days: env_parse(
                "ESPI_AUDIT_RETENTION_DAYS",
                retention::AUDIT_RETENTION_DAYS,
            ),
            rollup_interval: Duration::from_secs(env_parse(
                "ESPI_ROLLUP_INTERVAL_SECS",
                retention::ROLLUP_INTERVAL_SECS,
            )),
            prune_interval: Duration::from_secs(env_parse(
                "ESPI_PRUNE_INTERVAL_SECS",
                retention::PRUNE_INTERVAL_SECS,
            )),
        };

        let cache = CacheConfig {
            max_entries: env_parse(
                "ESPI_CLIENT_CACHE_MAX_ENTRIES",
                cache::DEFAULT_CLIENT_CACHE_MAX_ENTRIES,
            ),
            default_ttl: Duration::from_secs(env_parse(
                "ESPI_CLIENT_CACHE_TTL_SECS",
                cache::DEFAULT_CLIENT_CACHE_TTL_SECS,
            )),
            ..CacheConfig::default()
        };

        let notifications = NotificationConfig {
            queue_capacity: env_parse(
                "ESPI_NOTIFY_QUEUE_CAPACITY",
                notifications::DEFAULT_QUEUE_CAPACITY,
            )
            .max(1),
            retry: RetryPolicy {
                max_retries: env_parse("ESPI_NOTIFY_MAX_RETRIES", notifications::DEFAULT_MAX_RETRIES),
                ..RetryPolicy::default()
            },
        };

        let access = AccessConfig {
            admin_api_key: env_secret("ESPI_ADMIN_API_KEY"),
            principal_token_secret: env_secret("ESPI_PRINCIPAL_TOKEN_SECRET"),
            principal_token_audience: env::var("ESPI_PRINCIPAL_TOKEN_AUDIENCE")
                .ok()
                .filter(|audience| !audience.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PRINCIPAL_TOKEN_AUDIENCE.to_owned()),
        };

        Self {
            http_port: env_parse("HTTP_PORT", DEFAULT_HTTP_PORT),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_owned()),
            registration,
            certificates,
            lockout,
            retention,
            cache,
            notifications,
            access,
        }
    }

    /// One-line summary for startup logging; never includes credentials
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "http_port={} database={} enforce_https={} client_id_prefix={} access_ttl={}s \
             refresh_ttl={}s revocation_check={} max_failures={} lockout={}m \
             metrics_retention={}d audit_retention={}d cache_ttl={}s notify_retries={} \
             admin_auth={} principal_auth={}",
            self.http_port,
            redact_database_url(&self.database_url),
            self.registration.enforce_https,
            self.registration.client_id_prefix,
            self.registration.token_policy.access_token_ttl_secs,
            self.registration.token_policy.refresh_token_ttl_secs,
            self.certificates.check_revocation,
            self.lockout.max_failures,
            self.lockout.lockout_minutes,
            self.retention.metrics_retention_days,
            self.retention.audit_retention_days,
            self.cache.default_ttl.as_secs(),
            self.notifications.retry.max_retries,
            configured(self.access.admin_api_key.as_ref()),
            configured(self.access.principal_token_secret.as_ref()),
        )
    }
}

/// Parse an environment variable, falling back to `default` when unset or invalid
fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!(key, value = %raw, error = %e, default = %default, "Invalid configuration value, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Parse an optional numeric environment variable; invalid values count as unset
fn env_optional<T>(key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "Invalid configuration value, ignoring");
            None
        }
    }
}

/// Read a credential; blank values count as unset
fn env_secret(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

const fn configured(value: Option<&String>) -> &'static str {
    if value.is_some() {
        "configured"
    } else {
        "disabled"
    }
}

/// Parse a boolean environment variable accepting `true/false/1/0/yes/no`
fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => parse_bool(&raw).unwrap_or_else(|| {
            warn!(key, value = %raw, default, "Invalid boolean configuration value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a comma-separated list, dropping blanks
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Hide credentials embedded in a database URL
fn redact_database_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        _ => url.to_owned(),
    }
}
