// ABOUTME: SQLite persistence for clients, certificates, consent, audit events, and daily metrics
// ABOUTME: Uniqueness is enforced by constraints; cascades are explicit transactional operations
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! # Database Management
//!
//! Each table family lives in its own `impl Database` block. Uniqueness of
//! `client_id`, of certificate fingerprints, and of the single active
//! certificate per client is enforced by the schema so that concurrent
//! writers surface a conflict instead of overwriting each other.

mod audit;
mod certificates;
mod clients;
mod consent;
mod metrics;

pub use clients::{ClientListFilter, ClientSortField, StatusTransition};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use greenbutton_core::errors::{AppError, AppResult, DatabaseError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

/// Database manager for the authorization layer
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect and run migrations
    ///
    /// File databases are created when missing. In-memory databases use a
    /// single long-lived connection so every query sees the same schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the connection fails, or a
    /// migration fails
    pub async fn new(database_url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::config(format!("Invalid DATABASE_URL {database_url}: {e}")))?
            .create_if_missing(true);

        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().connect_with(options).await?
        };

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get a reference to the database pool
    #[must_use]
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run database migrations
    ///
    /// # Errors
    ///
    /// Returns an error if any `CREATE` statement fails
    pub async fn migrate(&self) -> AppResult<()> {
        self.migrate_clients().await?;
        self.migrate_certificates().await?;
        self.migrate_consent().await?;
        self.migrate_audit().await?;
        self.migrate_metrics().await?;
        Ok(())
    }

    /// Cheap liveness probe
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot serve a query
    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Fixed-width RFC 3339 form so stored timestamps sort lexicographically
pub(crate) fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(value: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            DatabaseError::Serialization(format!("Invalid stored timestamp {value}: {e}")).into()
        })
}

pub(crate) fn parse_optional_timestamp(value: Option<String>) -> AppResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_date(value: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| {
        DatabaseError::Serialization(format!("Invalid stored date {value}: {e}")).into()
    })
}

/// Decode a stored enum column through its `FromStr` impl
pub(crate) fn parse_column<T>(value: &str) -> AppResult<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| DatabaseError::Serialization(e).into())
}

/// Decode a JSON array column
pub(crate) fn parse_json<T>(value: &str) -> AppResult<T>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_str(value).map_err(|e| DatabaseError::from(e).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let earlier = DateTime::parse_from_rfc3339("2025-01-09T23:59:59Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = DateTime::parse_from_rfc3339("2025-01-10T00:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(format_timestamp(earlier) < format_timestamp(later));
        assert_eq!(parse_timestamp(&format_timestamp(later)).unwrap(), later);
    }

    #[tokio::test]
    async fn test_in_memory_database_migrates() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.health_check().await.unwrap();
        // Migrations are idempotent
        db.migrate().await.unwrap();
    }
}
