// ABOUTME: Client administration routes for listing, updating, status changes, and bulk operations
// ABOUTME: Also exposes secret rotation, health summaries, and Third Party notification triggers
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use crate::database::{ClientListFilter, ClientSortField};
use crate::lifecycle::{BulkOperationKind, BulkOperationReport, ClientHealth, StatusUpdateRequest};
use crate::oauth2_server::{ClientRegistrationRequest, ClientSecretRotation, ClientView, OAuth2Error};
use crate::middleware::require_admin;
use crate::resources::ServerResources;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use greenbutton_core::errors::AppError;
use greenbutton_core::models::ClientStatus;
use greenbutton_core::pagination::{Page, PageRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Query parameters of the client listing
#[derive(Debug, Default, Deserialize)]
pub struct ClientListQuery {
    /// Only clients in this status
    pub status: Option<ClientStatus>,
    /// Case-insensitive name substring
    pub name: Option<String>,
    /// Sort column
    pub sort: Option<ClientSortField>,
    /// `asc` (default) or `desc`
    pub order: Option<String>,
    /// Rows to skip
    pub offset: Option<u32>,
    /// Rows to return
    pub limit: Option<u32>,
}

/// Body of a revocation
#[derive(Debug, Default, Deserialize)]
pub struct RevokeClientRequest {
    /// Reason stored with the status
    #[serde(default)]
    pub reason: Option<String>,
}

/// Body of a bulk operation
#[derive(Debug, Deserialize)]
pub struct BulkOperationRequest {
    /// Operation applied to every client
    pub operation: BulkOperationKind,
    /// Target clients
    pub client_ids: Vec<String>,
}

/// Body of a notification trigger
#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    /// Resource URIs listed in the `BatchList`
    pub resources: Vec<String>,
}

/// Acknowledgement of a queued notification
#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyResponse {
    /// Client being notified
    pub client_id: String,
    /// Number of resources queued
    pub queued_resources: usize,
}

/// Client administration routes implementation
pub struct ClientAdminRoutes;

impl ClientAdminRoutes {
    /// Create all client administration routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/admin/clients", get(Self::handle_list))
            .route("/admin/clients/bulk", post(Self::handle_bulk))
            .route(
                "/admin/clients/:client_id",
                get(Self::handle_get)
                    .put(Self::handle_update)
                    .delete(Self::handle_delete),
            )
            .route("/admin/clients/:client_id/status", post(Self::handle_status))
            .route("/admin/clients/:client_id/revoke", post(Self::handle_revoke))
            .route(
                "/admin/clients/:client_id/rotate-secret",
                post(Self::handle_rotate_secret),
            )
            .route("/admin/clients/:client_id/health", get(Self::handle_health))
            .route("/admin/clients/:client_id/notify", post(Self::handle_notify))
            .route_layer(middleware::from_fn_with_state(
                Arc::clone(&resources),
                require_admin,
            ))
            .with_state(resources)
    }

    async fn handle_list(
        State(resources): State<Arc<ServerResources>>,
        Query(query): Query<ClientListQuery>,
    ) -> Result<Json<Page<ClientView>>, AppError> {
        let filter = ClientListFilter {
            status: query.status,
            name_contains: query.name,
            sort: query.sort.unwrap_or_default(),
            descending: query
                .order
                .as_deref()
                .is_some_and(|order| order.eq_ignore_ascii_case("desc")),
        };
        let page = PageRequest::new(query.offset, query.limit);
        Ok(Json(resources.registry.list(&filter, page).await?))
    }

    async fn handle_get(
        State(resources): State<Arc<ServerResources>>,
        Path(client_id): Path<String>,
    ) -> Result<Json<ClientView>, AppError> {
        Ok(Json(resources.registry.get(&client_id).await?))
    }

    async fn handle_update(
        State(resources): State<Arc<ServerResources>>,
        Path(client_id): Path<String>,
        Json(request): Json<ClientRegistrationRequest>,
    ) -> Result<Json<ClientView>, OAuth2Error> {
        Ok(Json(resources.registry.update(&client_id, request).await?))
    }

    async fn handle_delete(
        State(resources): State<Arc<ServerResources>>,
        Path(client_id): Path<String>,
    ) -> Result<StatusCode, AppError> {
        resources.registry.delete(&client_id).await?;
        Ok(StatusCode::NO_CONTENT)
    }

    async fn handle_status(
        State(resources): State<Arc<ServerResources>>,
        Path(client_id): Path<String>,
        Json(request): Json<StatusUpdateRequest>,
    ) -> Result<Json<ClientView>, AppError> {
        Ok(Json(
            resources.registry.update_status(&client_id, request).await?,
        ))
    }

    async fn handle_revoke(
        State(resources): State<Arc<ServerResources>>,
        Path(client_id): Path<String>,
        body: Option<Json<RevokeClientRequest>>,
    ) -> Result<Json<ClientView>, AppError> {
        let reason = body.and_then(|Json(request)| request.reason);
        Ok(Json(resources.lifecycle.revoke(&client_id, reason).await?))
    }

    async fn handle_rotate_secret(
        State(resources): State<Arc<ServerResources>>,
        Path(client_id): Path<String>,
    ) -> Result<Json<ClientSecretRotation>, AppError> {
        Ok(Json(resources.registry.rotate_secret(&client_id).await?))
    }

    async fn handle_health(
        State(resources): State<Arc<ServerResources>>,
        Path(client_id): Path<String>,
    ) -> Result<Json<ClientHealth>, AppError> {
        let today = Utc::now().date_naive();
        Ok(Json(resources.lifecycle.health(&client_id, today).await?))
    }

    async fn handle_notify(
        State(resources): State<Arc<ServerResources>>,
        Path(client_id): Path<String>,
        Json(request): Json<NotifyRequest>,
    ) -> Result<(StatusCode, Json<NotifyResponse>), AppError> {
        let client = resources.registry.get(&client_id).await?;
        let queued_resources = request.resources.len();
        resources
            .notifications
            .notify_client(&client, request.resources)?;
        Ok((
            StatusCode::ACCEPTED,
            Json(NotifyResponse {
                client_id,
                queued_resources,
            }),
        ))
    }

    async fn handle_bulk(
        State(resources): State<Arc<ServerResources>>,
        Json(request): Json<BulkOperationRequest>,
    ) -> Result<Json<BulkOperationReport>, AppError> {
        if request.client_ids.is_empty() {
            return Err(AppError::invalid_input("client_ids must not be empty"));
        }
        Ok(Json(
            resources
                .registry
                .bulk(request.operation, &request.client_ids)
                .await,
        ))
    }
}
