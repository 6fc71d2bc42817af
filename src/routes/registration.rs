// ABOUTME: Dynamic client registration endpoint for ESPI Third Party clients
// ABOUTME: Answers with one-time credentials or an RFC 7591 error body
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use crate::oauth2_server::{ClientCredentials, ClientRegistrationRequest, OAuth2Error};
use crate::resources::ServerResources;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use std::sync::Arc;

/// Registration routes implementation
pub struct RegistrationRoutes;

impl RegistrationRoutes {
    /// Create the registration route
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/oauth2/register", post(Self::handle_register))
            .with_state(resources)
    }

    async fn handle_register(
        State(resources): State<Arc<ServerResources>>,
        Json(request): Json<ClientRegistrationRequest>,
    ) -> Result<(StatusCode, Json<ClientCredentials>), OAuth2Error> {
        let credentials = resources.registry.register(request).await?;
        Ok((StatusCode::CREATED, Json(credentials)))
    }
}
