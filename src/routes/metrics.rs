// ABOUTME: Metrics routes for per-client daily series and manual rollup triggers
// ABOUTME: Windows default to the last thirty days ending today
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use crate::metrics::{MetricsReport, RollupReport};
use crate::middleware::require_admin;
use crate::resources::ServerResources;
use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, NaiveDate, Utc};
use greenbutton_core::errors::AppError;
use serde::Deserialize;
use std::sync::Arc;

/// Default query window in days
const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Window of a metrics query
#[derive(Debug, Default, Deserialize)]
pub struct MetricsQuery {
    /// First day, inclusive
    pub from: Option<NaiveDate>,
    /// Last day, inclusive
    pub to: Option<NaiveDate>,
}

/// Body of a manual rollup
#[derive(Debug, Default, Deserialize)]
pub struct RollupRequest {
    /// Day to roll up; yesterday when absent
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// Metrics routes implementation
pub struct MetricsRoutes;

impl MetricsRoutes {
    /// Create all metrics routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/admin/clients/:client_id/metrics", get(Self::handle_query))
            .route("/admin/metrics/rollup", post(Self::handle_rollup))
            .route_layer(middleware::from_fn_with_state(
                Arc::clone(&resources),
                require_admin,
            ))
            .with_state(resources)
    }

    async fn handle_query(
        State(resources): State<Arc<ServerResources>>,
        Path(client_id): Path<String>,
        Query(query): Query<MetricsQuery>,
    ) -> Result<Json<MetricsReport>, AppError> {
        let to = query.to.unwrap_or_else(|| Utc::now().date_naive());
        let from = query
            .from
            .unwrap_or_else(|| to - Duration::days(DEFAULT_WINDOW_DAYS - 1));
        Ok(Json(resources.metrics.query(&client_id, from, to).await?))
    }

    async fn handle_rollup(
        State(resources): State<Arc<ServerResources>>,
        body: Option<Json<RollupRequest>>,
    ) -> Result<Json<RollupReport>, AppError> {
        let date = body.and_then(|Json(request)| request.date);
        let report = match date {
            Some(date) => resources.metrics.rollup(date).await?,
            None => resources.metrics.rollup_yesterday(Utc::now()).await?,
        };
        Ok(Json(report))
    }
}
