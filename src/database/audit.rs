// ABOUTME: Append-only audit event storage backing the security auditor
// ABOUTME: Supports filtered queries and retention pruning; events are never updated
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use super::{format_timestamp, parse_column, parse_json, parse_timestamp, Database};
use crate::security::audit::{AuditEvent, AuditQuery, AuditStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use greenbutton_core::errors::{AppResult, DatabaseError};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

impl Database {
    pub(super) async fn migrate_audit(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS espi_audit_events (
                event_id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                client_id TEXT,
                principal_name TEXT,
                success INTEGER NOT NULL,
                description TEXT NOT NULL,
                payload TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_espi_audit_timestamp ON espi_audit_events(timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_espi_audit_client ON espi_audit_events(client_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AuditStore for Database {
    async fn append(&self, event: &AuditEvent) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO espi_audit_events (
                event_id, event_type, severity, timestamp, client_id, principal_name,
                success, description, payload
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .bind(event.event_id.to_string())
        .bind(event.event_type.as_str())
        .bind(event.severity.as_str())
        .bind(format_timestamp(event.timestamp))
        .bind(&event.client_id)
        .bind(&event.principal_name)
        .bind(event.success)
        .bind(&event.description)
        .bind(serde_json::to_string(&event.payload)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> AppResult<Vec<AuditEvent>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            r"
            SELECT event_id, event_type, severity, timestamp, client_id, principal_name,
                   success, description, payload
            FROM espi_audit_events WHERE 1 = 1
            ",
        );
        if let Some(client_id) = &query.client_id {
            builder.push(" AND client_id = ").push_bind(client_id.clone());
        }
        if let Some(principal) = &query.principal_name {
            builder.push(" AND principal_name = ").push_bind(principal.clone());
        }
        if !query.event_types.is_empty() {
            builder.push(" AND event_type IN (");
            let mut separated = builder.separated(", ");
            for event_type in &query.event_types {
                separated.push_bind(event_type.as_str());
            }
            separated.push_unseparated(")");
        }
        if let Some(success) = query.success {
            builder.push(" AND success = ").push_bind(success);
        }
        if let Some(since) = query.since {
            builder.push(" AND timestamp >= ").push_bind(format_timestamp(since));
        }
        if let Some(until) = query.until {
            builder.push(" AND timestamp < ").push_bind(format_timestamp(until));
        }

        if let Some(limit) = query.limit {
            builder
                .push(" ORDER BY timestamp DESC, event_id LIMIT ")
                .push_bind(i64::from(limit));
        } else {
            builder.push(" ORDER BY timestamp ASC, event_id");
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_event).collect()
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM espi_audit_events WHERE timestamp < ?1")
            .bind(format_timestamp(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_event(row: &SqliteRow) -> AppResult<AuditEvent> {
    let event_id: String = row.try_get("event_id")?;
    let event_id = Uuid::parse_str(&event_id).map_err(|e| {
        DatabaseError::Serialization(format!("Invalid audit event id {event_id}: {e}"))
    })?;

    Ok(AuditEvent {
        event_id,
        event_type: parse_column(&row.try_get::<String, _>("event_type")?)?,
        severity: parse_column(&row.try_get::<String, _>("severity")?)?,
        timestamp: parse_timestamp(&row.try_get::<String, _>("timestamp")?)?,
        client_id: row.try_get("client_id")?,
        principal_name: row.try_get("principal_name")?,
        success: row.try_get("success")?,
        description: row.try_get("description")?,
        payload: parse_json(&row.try_get::<String, _>("payload")?)?,
    })
}
