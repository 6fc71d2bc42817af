// ABOUTME: Consent routes for the consent screen, decisions, listings, and withdrawal
// ABOUTME: The principal always comes from the verified session token, never from the request
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use crate::consent::{ConsentDecision, ConsentOutcome, ConsentRequirement, ConsentScreen};
use crate::middleware::{require_principal, AuthenticatedPrincipal};
use crate::resources::ServerResources;
use crate::scopes;
use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::{delete, get},
    Extension, Json, Router,
};
use greenbutton_core::errors::AppError;
use greenbutton_core::models::ConsentRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Query of the consent screen
#[derive(Debug, Deserialize)]
pub struct ConsentScreenQuery {
    /// Space-delimited requested scopes
    pub scope: String,
}

/// Body of a consent decision
#[derive(Debug, Deserialize)]
pub struct ConsentDecisionBody {
    /// Scope to approved (`true`) or denied (`false`)
    pub scopes: BTreeMap<String, bool>,
    /// Registered redirect URI to continue with
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Opaque authorization request state echoed on denial
    #[serde(default)]
    pub state: Option<String>,
}

/// Consent screen plus the scopes still needing a decision
#[derive(Debug, Serialize, Deserialize)]
pub struct ConsentScreenResponse {
    /// Rendered screen for every requested scope
    #[serde(flatten)]
    pub screen: ConsentScreen,
    /// Whether a decision is needed, and for which scopes
    pub requirement: ConsentRequirement,
}

/// Withdrawal acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct ConsentRevokeResponse {
    /// Always `true`; withdrawing absent consent succeeds
    pub revoked: bool,
    /// Whether a stored record was removed
    pub removed: bool,
}

/// Consent routes implementation
pub struct ConsentRoutes;

impl ConsentRoutes {
    /// Create all consent routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(
                "/consent/:client_id",
                get(Self::handle_screen).post(Self::handle_decision),
            )
            .route(
                "/consent/:client_id/:principal",
                delete(Self::handle_revoke),
            )
            .route("/principals/:principal/consents", get(Self::handle_list))
            .route_layer(middleware::from_fn_with_state(
                Arc::clone(&resources),
                require_principal,
            ))
            .with_state(resources)
    }

    /// Path principals must name the caller
    fn ensure_self(principal: &AuthenticatedPrincipal, named: &str) -> Result<(), AppError> {
        if principal.name == named {
            Ok(())
        } else {
            Err(AppError::permission_denied(
                "Consent records can only be managed by their own principal",
            ))
        }
    }

    async fn handle_screen(
        State(resources): State<Arc<ServerResources>>,
        Extension(principal): Extension<AuthenticatedPrincipal>,
        Path(client_id): Path<String>,
        Query(query): Query<ConsentScreenQuery>,
    ) -> Result<Json<ConsentScreenResponse>, AppError> {
        let requested = scopes::split_scope_string(&query.scope);
        if requested.is_empty() {
            return Err(AppError::invalid_input("scope must not be empty"));
        }
        let screen = resources.consent.consent_screen(&client_id, &requested).await?;
        let requirement = resources
            .consent
            .check(&client_id, &principal.name, &requested)
            .await?;
        Ok(Json(ConsentScreenResponse {
            screen,
            requirement,
        }))
    }

    async fn handle_decision(
        State(resources): State<Arc<ServerResources>>,
        Extension(principal): Extension<AuthenticatedPrincipal>,
        Path(client_id): Path<String>,
        Json(body): Json<ConsentDecisionBody>,
    ) -> Result<Json<ConsentOutcome>, AppError> {
        let decision = ConsentDecision {
            principal_name: principal.name,
            scopes: body.scopes,
            redirect_uri: body.redirect_uri,
            state: body.state,
        };
        Ok(Json(
            resources
                .consent
                .submit_decision(&client_id, &decision)
                .await?,
        ))
    }

    async fn handle_revoke(
        State(resources): State<Arc<ServerResources>>,
        Extension(principal): Extension<AuthenticatedPrincipal>,
        Path((client_id, named)): Path<(String, String)>,
    ) -> Result<Json<ConsentRevokeResponse>, AppError> {
        Self::ensure_self(&principal, &named)?;
        let removed = resources.consent.revoke(&client_id, &principal.name).await?;
        Ok(Json(ConsentRevokeResponse {
            revoked: true,
            removed,
        }))
    }

    async fn handle_list(
        State(resources): State<Arc<ServerResources>>,
        Extension(principal): Extension<AuthenticatedPrincipal>,
        Path(named): Path<String>,
    ) -> Result<Json<Vec<ConsentRecord>>, AppError> {
        Self::ensure_self(&principal, &named)?;
        Ok(Json(
            resources
                .consent
                .list_for_principal(&principal.name)
                .await?,
        ))
    }
}
