// ABOUTME: Consent record persistence keyed by client and principal
// ABOUTME: Writes are upserts so the latest merged decision replaces the stored row
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use super::{format_timestamp, parse_json, parse_timestamp, Database};
use greenbutton_core::errors::{AppResult, DatabaseError};
use greenbutton_core::models::{ConsentRecord, RecordMetadata};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

const CONSENT_COLUMNS: &str = r"
    id, client_id, principal_name, approved_scopes, denied_scopes, espi_specific,
    decided_at, description, created_at, updated_at
";

impl Database {
    pub(super) async fn migrate_consent(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS espi_consents (
                id TEXT NOT NULL UNIQUE,
                client_id TEXT NOT NULL,
                principal_name TEXT NOT NULL,
                approved_scopes TEXT NOT NULL,
                denied_scopes TEXT NOT NULL,
                espi_specific INTEGER NOT NULL,
                decided_at TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (client_id, principal_name)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_espi_consents_principal ON espi_consents(principal_name)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Stored consent for a client and principal
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a column cannot be decoded
    pub async fn get_consent(
        &self,
        client_id: &str,
        principal_name: &str,
    ) -> AppResult<Option<ConsentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {CONSENT_COLUMNS} FROM espi_consents WHERE client_id = ?1 AND principal_name = ?2"
        ))
        .bind(client_id)
        .bind(principal_name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_consent).transpose()
    }

    /// Insert or replace the consent row for the record's key
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails
    pub async fn upsert_consent(&self, record: &ConsentRecord) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO espi_consents (
                id, client_id, principal_name, approved_scopes, denied_scopes, espi_specific,
                decided_at, description, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (client_id, principal_name) DO UPDATE SET
                approved_scopes = excluded.approved_scopes,
                denied_scopes = excluded.denied_scopes,
                espi_specific = excluded.espi_specific,
                decided_at = excluded.decided_at,
                description = excluded.description,
                updated_at = excluded.updated_at
            ",
        )
        .bind(record.metadata.id.to_string())
        .bind(&record.client_id)
        .bind(&record.principal_name)
        .bind(serde_json::to_string(&record.approved_scopes)?)
        .bind(serde_json::to_string(&record.denied_scopes)?)
        .bind(record.espi_specific)
        .bind(format_timestamp(record.decided_at))
        .bind(&record.metadata.description)
        .bind(format_timestamp(record.metadata.created_at))
        .bind(format_timestamp(record.metadata.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete the consent row; returns `false` if none existed
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails
    pub async fn delete_consent(&self, client_id: &str, principal_name: &str) -> AppResult<bool> {
        let result =
            sqlx::query("DELETE FROM espi_consents WHERE client_id = ?1 AND principal_name = ?2")
                .bind(client_id)
                .bind(principal_name)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every consent a principal has given, ordered by client
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a column cannot be decoded
    pub async fn list_consents_for_principal(
        &self,
        principal_name: &str,
    ) -> AppResult<Vec<ConsentRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONSENT_COLUMNS} FROM espi_consents WHERE principal_name = ?1 ORDER BY client_id"
        ))
        .bind(principal_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_consent).collect()
    }
}

fn row_to_consent(row: &SqliteRow) -> AppResult<ConsentRecord> {
    let id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| DatabaseError::Serialization(format!("Invalid consent row id {id}: {e}")))?;

    Ok(ConsentRecord {
        metadata: RecordMetadata {
            id,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
            description: row.try_get("description")?,
        },
        client_id: row.try_get("client_id")?,
        principal_name: row.try_get("principal_name")?,
        approved_scopes: parse_json(&row.try_get::<String, _>("approved_scopes")?)?,
        denied_scopes: parse_json(&row.try_get::<String, _>("denied_scopes")?)?,
        espi_specific: row.try_get("espi_specific")?,
        decided_at: parse_timestamp(&row.try_get::<String, _>("decided_at")?)?,
    })
}
