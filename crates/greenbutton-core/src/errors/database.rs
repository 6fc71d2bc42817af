// ABOUTME: Structured error types for store operations
// ABOUTME: Distinguishes unique-constraint conflicts from other query failures
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use thiserror::Error;

/// Errors raised by the persistent store
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Row lookup returned nothing where one was required
    #[error("{entity_type} not found: {entity_id}")]
    NotFound {
        /// Entity kind, e.g. "client"
        entity_type: &'static str,
        /// Identifier that was looked up
        entity_id: String,
    },

    /// Unique constraint violated (duplicate client id or fingerprint)
    #[error("Unique constraint violated: {context}")]
    Conflict {
        /// Driver message naming the constraint
        context: String,
    },

    /// Pool or connection failure
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Any other query failure
    #[error("Database query failed: {context}")]
    QueryError {
        /// Driver message
        context: String,
    },

    /// Stored column could not be decoded into its domain type
    #[error("Stored value could not be decoded: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DatabaseError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

#[cfg(feature = "database-errors")]
impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Database(db_error) if db_error.is_unique_violation() => Self::Conflict {
                context: db_error.message().to_owned(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(error.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(error.to_string())
            }
            other => Self::QueryError {
                context: other.to_string(),
            },
        }
    }
}
