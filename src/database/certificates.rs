// ABOUTME: Client certificate persistence keyed by SHA-256 fingerprint
// ABOUTME: Uploads supersede the prior active certificate in the same transaction
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use super::{format_timestamp, parse_column, parse_optional_timestamp, parse_timestamp, Database};
use chrono::{DateTime, Utc};
use greenbutton_core::errors::{AppResult, DatabaseError};
use greenbutton_core::models::certificate::SUPERSEDED_REASON;
use greenbutton_core::models::{CertificateRecord, RecordMetadata};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

const CERTIFICATE_COLUMNS: &str = r"
    id, client_id, serial_number, subject_dn, issuer_dn, not_before, not_after,
    fingerprint, status, revocation_reason, revoked_at, uploaded_by,
    description, created_at, updated_at
";

impl Database {
    pub(super) async fn migrate_certificates(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS espi_client_certificates (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                serial_number TEXT NOT NULL,
                subject_dn TEXT NOT NULL,
                issuer_dn TEXT NOT NULL,
                not_before TEXT NOT NULL,
                not_after TEXT NOT NULL,
                fingerprint TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL CHECK (status IN ('active', 'revoked')),
                revocation_reason TEXT,
                revoked_at TEXT,
                uploaded_by TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // At most one active certificate per client
        sqlx::query(
            r"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_espi_certificates_one_active
            ON espi_client_certificates(client_id) WHERE status = 'active'
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_espi_certificates_client ON espi_client_certificates(client_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store a new active certificate, revoking the client's current one
    ///
    /// Returns the fingerprint of the superseded certificate, if any.
    ///
    /// # Errors
    ///
    /// Returns a conflict error if the fingerprint is already stored; the
    /// prior certificate stays active in that case
    pub async fn insert_certificate_superseding(
        &self,
        record: &CertificateRecord,
        now: DateTime<Utc>,
    ) -> AppResult<Option<String>> {
        let mut tx = self.pool.begin().await?;
        let stamp = format_timestamp(now);

        let superseded: Option<String> = sqlx::query(
            r"
            UPDATE espi_client_certificates
            SET status = 'revoked', revocation_reason = ?2, revoked_at = ?3, updated_at = ?3
            WHERE client_id = ?1 AND status = 'active'
            RETURNING fingerprint
            ",
        )
        .bind(&record.client_id)
        .bind(SUPERSEDED_REASON)
        .bind(&stamp)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.try_get("fingerprint"))
        .transpose()?;

        sqlx::query(
            r"
            INSERT INTO espi_client_certificates (
                id, client_id, serial_number, subject_dn, issuer_dn, not_before, not_after,
                fingerprint, status, revocation_reason, revoked_at, uploaded_by,
                description, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ",
        )
        .bind(record.metadata.id.to_string())
        .bind(&record.client_id)
        .bind(&record.serial_number)
        .bind(&record.subject_dn)
        .bind(&record.issuer_dn)
        .bind(format_timestamp(record.not_before))
        .bind(format_timestamp(record.not_after))
        .bind(&record.fingerprint)
        .bind(record.status.as_str())
        .bind(&record.revocation_reason)
        .bind(record.revoked_at.map(format_timestamp))
        .bind(&record.uploaded_by)
        .bind(&record.metadata.description)
        .bind(format_timestamp(record.metadata.created_at))
        .bind(format_timestamp(record.metadata.updated_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(superseded)
    }

    /// Look up a certificate by fingerprint regardless of status
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a column cannot be decoded
    pub async fn get_certificate_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> AppResult<Option<CertificateRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {CERTIFICATE_COLUMNS} FROM espi_client_certificates WHERE fingerprint = ?1"
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_certificate).transpose()
    }

    /// Mark an active certificate revoked
    ///
    /// Returns `false` if no active certificate has this fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn revoke_certificate(
        &self,
        fingerprint: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let stamp = format_timestamp(now);
        let result = sqlx::query(
            r"
            UPDATE espi_client_certificates
            SET status = 'revoked', revocation_reason = ?2, revoked_at = ?3, updated_at = ?3
            WHERE fingerprint = ?1 AND status = 'active'
            ",
        )
        .bind(fingerprint)
        .bind(reason)
        .bind(&stamp)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Every certificate a client has uploaded, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a column cannot be decoded
    pub async fn list_certificates(&self, client_id: &str) -> AppResult<Vec<CertificateRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {CERTIFICATE_COLUMNS} FROM espi_client_certificates WHERE client_id = ?1 ORDER BY created_at DESC, id"
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_certificate).collect()
    }
}

fn row_to_certificate(row: &SqliteRow) -> AppResult<CertificateRecord> {
    let id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id).map_err(|e| {
        DatabaseError::Serialization(format!("Invalid certificate row id {id}: {e}"))
    })?;
    let status: String = row.try_get("status")?;

    Ok(CertificateRecord {
        metadata: RecordMetadata {
            id,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
            description: row.try_get("description")?,
        },
        client_id: row.try_get("client_id")?,
        serial_number: row.try_get("serial_number")?,
        subject_dn: row.try_get("subject_dn")?,
        issuer_dn: row.try_get("issuer_dn")?,
        not_before: parse_timestamp(&row.try_get::<String, _>("not_before")?)?,
        not_after: parse_timestamp(&row.try_get::<String, _>("not_after")?)?,
        fingerprint: row.try_get("fingerprint")?,
        status: parse_column(&status)?,
        revocation_reason: row.try_get("revocation_reason")?,
        revoked_at: parse_optional_timestamp(row.try_get("revoked_at")?)?,
        uploaded_by: row.try_get("uploaded_by")?,
    })
}
