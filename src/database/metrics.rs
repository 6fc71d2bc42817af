// ABOUTME: Daily per-client metric storage
// ABOUTME: A rollup replaces every row for its date so recomputation never double counts
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use super::{format_date, format_timestamp, parse_date, parse_timestamp, Database};
use chrono::{DateTime, NaiveDate, Utc};
use greenbutton_core::errors::AppResult;
use greenbutton_core::models::ClientMetricDaily;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

impl Database {
    pub(super) async fn migrate_metrics(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS espi_client_metrics_daily (
                client_id TEXT NOT NULL,
                metric_date TEXT NOT NULL,
                total_requests INTEGER NOT NULL,
                successful_requests INTEGER NOT NULL,
                failed_requests INTEGER NOT NULL,
                tokens_issued INTEGER NOT NULL,
                unique_principals INTEGER NOT NULL,
                espi_requests INTEGER NOT NULL,
                consent_grants INTEGER NOT NULL,
                consent_withdrawals INTEGER NOT NULL,
                average_response_time_ms REAL,
                computed_at TEXT NOT NULL,
                PRIMARY KEY (client_id, metric_date)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS espi_metrics_rollups (
                metric_date TEXT PRIMARY KEY,
                computed_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replace all metric rows for `date` with `rows` in one transaction
    ///
    /// The date is also marked as rolled up at `computed_at`, even when `rows`
    /// is empty, so quiet days are not recomputed by catch-up runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; prior rows are kept in that case
    pub async fn replace_daily_metrics(
        &self,
        date: NaiveDate,
        rows: &[ClientMetricDaily],
        computed_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let metric_date = format_date(date);

        sqlx::query("DELETE FROM espi_client_metrics_daily WHERE metric_date = ?1")
            .bind(&metric_date)
            .execute(&mut *tx)
            .await?;

        for row in rows {
            sqlx::query(
                r"
                INSERT INTO espi_client_metrics_daily (
                    client_id, metric_date, total_requests, successful_requests, failed_requests,
                    tokens_issued, unique_principals, espi_requests, consent_grants,
                    consent_withdrawals, average_response_time_ms, computed_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ",
            )
            .bind(&row.client_id)
            .bind(&metric_date)
            .bind(row.total_requests)
            .bind(row.successful_requests)
            .bind(row.failed_requests)
            .bind(row.tokens_issued)
            .bind(row.unique_principals)
            .bind(row.espi_requests)
            .bind(row.consent_grants)
            .bind(row.consent_withdrawals)
            .bind(row.average_response_time_ms)
            .bind(format_timestamp(row.computed_at))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r"
            INSERT INTO espi_metrics_rollups (metric_date, computed_at) VALUES (?1, ?2)
            ON CONFLICT(metric_date) DO UPDATE SET computed_at = excluded.computed_at
            ",
        )
        .bind(&metric_date)
        .bind(format_timestamp(computed_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Most recent date a rollup has completed for
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored date cannot be parsed
    pub async fn latest_rollup_date(&self) -> AppResult<Option<NaiveDate>> {
        let latest: Option<String> =
            sqlx::query_scalar("SELECT MAX(metric_date) FROM espi_metrics_rollups")
                .fetch_one(&self.pool)
                .await?;
        latest.as_deref().map(parse_date).transpose()
    }

    /// Daily rows for a client within `[from, to]`, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a column cannot be decoded
    pub async fn get_daily_metrics(
        &self,
        client_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<ClientMetricDaily>> {
        let rows = sqlx::query(
            r"
            SELECT client_id, metric_date, total_requests, successful_requests, failed_requests,
                   tokens_issued, unique_principals, espi_requests, consent_grants,
                   consent_withdrawals, average_response_time_ms, computed_at
            FROM espi_client_metrics_daily
            WHERE client_id = ?1 AND metric_date >= ?2 AND metric_date <= ?3
            ORDER BY metric_date
            ",
        )
        .bind(client_id)
        .bind(format_date(from))
        .bind(format_date(to))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_metric).collect()
    }

    /// Delete rows dated strictly before `cutoff`, returning the metric rows removed
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails
    pub async fn prune_daily_metrics_before(&self, cutoff: NaiveDate) -> AppResult<u64> {
        let cutoff = format_date(cutoff);
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM espi_client_metrics_daily WHERE metric_date < ?1")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM espi_metrics_rollups WHERE metric_date < ?1")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

fn row_to_metric(row: &SqliteRow) -> AppResult<ClientMetricDaily> {
    Ok(ClientMetricDaily {
        client_id: row.try_get("client_id")?,
        date: parse_date(&row.try_get::<String, _>("metric_date")?)?,
        total_requests: row.try_get("total_requests")?,
        successful_requests: row.try_get("successful_requests")?,
        failed_requests: row.try_get("failed_requests")?,
        tokens_issued: row.try_get("tokens_issued")?,
        unique_principals: row.try_get("unique_principals")?,
        espi_requests: row.try_get("espi_requests")?,
        consent_grants: row.try_get("consent_grants")?,
        consent_withdrawals: row.try_get("consent_withdrawals")?,
        average_response_time_ms: row.try_get("average_response_time_ms")?,
        computed_at: parse_timestamp(&row.try_get::<String, _>("computed_at")?)?,
    })
}
