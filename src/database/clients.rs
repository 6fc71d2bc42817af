// ABOUTME: Registered client persistence with filtered, sorted, paginated listing
// ABOUTME: Client deletion cascades explicitly to certificates and consent, never to audit events
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use super::{
    format_timestamp, parse_column, parse_json, parse_optional_timestamp, parse_timestamp,
    Database,
};
use chrono::{DateTime, Utc};
use greenbutton_core::errors::{AppResult, DatabaseError};
use greenbutton_core::models::{ClientStatus, RecordMetadata, RegisteredClient};
use greenbutton_core::pagination::{Page, PageRequest};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

/// Sortable client columns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientSortField {
    /// Registration time
    #[default]
    CreatedAt,
    /// Display name
    ClientName,
    /// Client identifier
    ClientId,
}

impl ClientSortField {
    const fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::ClientName => "client_name",
            Self::ClientId => "client_id",
        }
    }
}

/// Filter and ordering for client listings
#[derive(Debug, Clone, Default)]
pub struct ClientListFilter {
    /// Only clients in this status
    pub status: Option<ClientStatus>,
    /// Case-insensitive substring of the client name
    pub name_contains: Option<String>,
    /// Sort column
    pub sort: ClientSortField,
    /// Sort descending
    pub descending: bool,
}

impl ClientListFilter {
    fn push_where(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        builder.push(" WHERE 1 = 1");
        if let Some(status) = self.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(name) = self.name_contains.as_deref().filter(|n| !n.is_empty()) {
            builder
                .push(" AND LOWER(client_name) LIKE ")
                .push_bind(format!("%{}%", name.to_lowercase()));
        }
    }
}

/// Conditional status change written by [`Database::transition_client_status`]
#[derive(Debug, Clone)]
pub struct StatusTransition<'a> {
    /// Stored statuses the transition may start from
    pub from: &'a [ClientStatus],
    /// Status written
    pub to: ClientStatus,
    /// Reason recorded with the change
    pub reason: Option<&'a str>,
    /// Lock expiry written, `None` clears any lock
    pub locked_until: Option<DateTime<Utc>>,
    /// Zero the failure counter
    pub reset_failures: bool,
    /// Write time
    pub updated_at: DateTime<Utc>,
}

const CLIENT_COLUMNS: &str = r"
    id, client_id, client_name, client_secret_hash, grant_types, auth_methods,
    redirect_uris, scopes, status, status_reason, require_consent,
    rate_limit_per_minute, max_concurrent_sessions, failure_count, locked_until,
    notify_uri, issued_at, secret_expires_at, description, created_at, updated_at
";

impl Database {
    pub(super) async fn migrate_clients(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS espi_clients (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL UNIQUE,
                client_name TEXT NOT NULL,
                client_secret_hash TEXT NOT NULL,
                grant_types TEXT NOT NULL,
                auth_methods TEXT NOT NULL,
                redirect_uris TEXT NOT NULL,
                scopes TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('active', 'suspended', 'revoked')),
                status_reason TEXT,
                require_consent INTEGER NOT NULL,
                rate_limit_per_minute INTEGER NOT NULL,
                max_concurrent_sessions INTEGER NOT NULL,
                failure_count INTEGER NOT NULL DEFAULT 0,
                locked_until TEXT,
                notify_uri TEXT,
                issued_at TEXT NOT NULL,
                secret_expires_at TEXT,
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_espi_clients_status ON espi_clients(status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert a new client
    ///
    /// # Errors
    ///
    /// Returns a conflict error if the `client_id` already exists
    pub async fn insert_client(&self, client: &RegisteredClient) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO espi_clients (
                id, client_id, client_name, client_secret_hash, grant_types, auth_methods,
                redirect_uris, scopes, status, status_reason, require_consent,
                rate_limit_per_minute, max_concurrent_sessions, failure_count, locked_until,
                notify_uri, issued_at, secret_expires_at, description, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
            ",
        )
        .bind(client.metadata.id.to_string())
        .bind(&client.client_id)
        .bind(&client.client_name)
        .bind(&client.client_secret_hash)
        .bind(serde_json::to_string(&client.grant_types)?)
        .bind(serde_json::to_string(&client.auth_methods)?)
        .bind(serde_json::to_string(&client.redirect_uris)?)
        .bind(serde_json::to_string(&client.scopes)?)
        .bind(client.status.as_str())
        .bind(&client.status_reason)
        .bind(client.require_consent)
        .bind(i64::from(client.rate_limit_per_minute))
        .bind(i64::from(client.max_concurrent_sessions))
        .bind(i64::from(client.failure_count))
        .bind(client.locked_until.map(format_timestamp))
        .bind(&client.notify_uri)
        .bind(format_timestamp(client.issued_at))
        .bind(client.secret_expires_at.map(format_timestamp))
        .bind(&client.metadata.description)
        .bind(format_timestamp(client.metadata.created_at))
        .bind(format_timestamp(client.metadata.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Rewrite a client's registration metadata
    ///
    /// Status, status reason, failure count, lock, and secret columns are left
    /// alone so a concurrent lifecycle change is never overwritten. Revoked
    /// clients are not updated; returns `false` when no row changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn update_client_metadata(&self, client: &RegisteredClient) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE espi_clients SET
                client_name = ?2,
                grant_types = ?3,
                auth_methods = ?4,
                redirect_uris = ?5,
                scopes = ?6,
                require_consent = ?7,
                rate_limit_per_minute = ?8,
                max_concurrent_sessions = ?9,
                notify_uri = ?10,
                description = ?11,
                updated_at = ?12
            WHERE client_id = ?1 AND status <> 'revoked'
            ",
        )
        .bind(&client.client_id)
        .bind(&client.client_name)
        .bind(serde_json::to_string(&client.grant_types)?)
        .bind(serde_json::to_string(&client.auth_methods)?)
        .bind(serde_json::to_string(&client.redirect_uris)?)
        .bind(serde_json::to_string(&client.scopes)?)
        .bind(client.require_consent)
        .bind(i64::from(client.rate_limit_per_minute))
        .bind(i64::from(client.max_concurrent_sessions))
        .bind(&client.notify_uri)
        .bind(&client.metadata.description)
        .bind(format_timestamp(client.metadata.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replace a client's secret hash and expiry
    ///
    /// Revoked clients are not updated; returns `false` when no row changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn update_client_secret(
        &self,
        client_id: &str,
        secret_hash: &str,
        secret_expires_at: Option<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE espi_clients SET
                client_secret_hash = ?2,
                secret_expires_at = ?3,
                updated_at = ?4
            WHERE client_id = ?1 AND status <> 'revoked'
            ",
        )
        .bind(client_id)
        .bind(secret_hash)
        .bind(secret_expires_at.map(format_timestamp))
        .bind(format_timestamp(updated_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply a status transition only if the stored status is one of `transition.from`
    ///
    /// Returns `false` when the stored status had already moved on, in which
    /// case nothing is written.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn transition_client_status(
        &self,
        client_id: &str,
        transition: &StatusTransition<'_>,
    ) -> AppResult<bool> {
        let mut update = QueryBuilder::<Sqlite>::new("UPDATE espi_clients SET status = ");
        update
            .push_bind(transition.to.as_str())
            .push(", status_reason = ")
            .push_bind(transition.reason)
            .push(", locked_until = ")
            .push_bind(transition.locked_until.map(format_timestamp))
            .push(", updated_at = ")
            .push_bind(format_timestamp(transition.updated_at));
        if transition.reset_failures {
            update.push(", failure_count = 0");
        }
        update.push(" WHERE client_id = ").push_bind(client_id);
        update.push(" AND status IN (");
        let mut statuses = update.separated(", ");
        for status in transition.from {
            statuses.push_bind(status.as_str());
        }
        statuses.push_unseparated(")");

        let result = update.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Look up a client by its public identifier
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored column cannot be decoded
    pub async fn get_client(&self, client_id: &str) -> AppResult<Option<RegisteredClient>> {
        let row = sqlx::query(&format!(
            "SELECT {CLIENT_COLUMNS} FROM espi_clients WHERE client_id = ?1"
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_client).transpose()
    }

    /// Atomically increment the failure counter, returning the new value
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn increment_client_failures(&self, client_id: &str) -> AppResult<Option<u32>> {
        let row = sqlx::query(
            r"
            UPDATE espi_clients SET failure_count = failure_count + 1
            WHERE client_id = ?1
            RETURNING failure_count
            ",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_get::<i64, _>("failure_count").map(|n| n as u32))
            .transpose()
            .map_err(Into::into)
    }

    /// Zero the failure counter without touching status or lock
    ///
    /// Returns `false` if the client does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn reset_client_failures(&self, client_id: &str) -> AppResult<bool> {
        let result = sqlx::query("UPDATE espi_clients SET failure_count = 0 WHERE client_id = ?1")
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List clients matching `filter`
    ///
    /// # Errors
    ///
    /// Returns an error if either query fails
    pub async fn list_clients(
        &self,
        filter: &ClientListFilter,
        page: PageRequest,
    ) -> AppResult<Page<RegisteredClient>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS total FROM espi_clients");
        filter.push_where(&mut count);
        let total: i64 = count.build().fetch_one(&self.pool).await?.try_get("total")?;

        let mut select =
            QueryBuilder::<Sqlite>::new(format!("SELECT {CLIENT_COLUMNS} FROM espi_clients"));
        filter.push_where(&mut select);
        let direction = if filter.descending { "DESC" } else { "ASC" };
        // client_id breaks ties so pages are stable
        select.push(format!(
            " ORDER BY {} {direction}, client_id {direction}",
            filter.sort.column()
        ));
        select
            .push(" LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(page.offset));

        let rows = select.build().fetch_all(&self.pool).await?;
        let clients = rows.iter().map(row_to_client).collect::<AppResult<Vec<_>>>()?;

        Ok(Page::new(clients, total as u64, page))
    }

    /// Delete a client with its certificates and consent records
    ///
    /// Audit events are left in place. Returns `false` if the client did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; nothing is deleted in that case
    pub async fn delete_client_cascade(&self, client_id: &str) -> AppResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM espi_client_certificates WHERE client_id = ?1")
            .bind(client_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM espi_consents WHERE client_id = ?1")
            .bind(client_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM espi_clients WHERE client_id = ?1")
            .bind(client_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }
}

fn row_to_client(row: &SqliteRow) -> AppResult<RegisteredClient> {
    let id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| DatabaseError::Serialization(format!("Invalid client row id {id}: {e}")))?;
    let status: String = row.try_get("status")?;

    Ok(RegisteredClient {
        metadata: RecordMetadata {
            id,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
            description: row.try_get("description")?,
        },
        client_id: row.try_get("client_id")?,
        client_name: row.try_get("client_name")?,
        client_secret_hash: row.try_get("client_secret_hash")?,
        grant_types: parse_json(&row.try_get::<String, _>("grant_types")?)?,
        auth_methods: parse_json(&row.try_get::<String, _>("auth_methods")?)?,
        redirect_uris: parse_json(&row.try_get::<String, _>("redirect_uris")?)?,
        scopes: parse_json(&row.try_get::<String, _>("scopes")?)?,
        status: parse_column(&status)?,
        status_reason: row.try_get("status_reason")?,
        require_consent: row.try_get("require_consent")?,
        rate_limit_per_minute: row.try_get::<i64, _>("rate_limit_per_minute")? as u32,
        max_concurrent_sessions: row.try_get::<i64, _>("max_concurrent_sessions")? as u32,
        failure_count: row.try_get::<i64, _>("failure_count")? as u32,
        locked_until: parse_optional_timestamp(row.try_get("locked_until")?)?,
        notify_uri: row.try_get("notify_uri")?,
        issued_at: parse_timestamp(&row.try_get::<String, _>("issued_at")?)?,
        secret_expires_at: parse_optional_timestamp(row.try_get("secret_expires_at")?)?,
    })
}
