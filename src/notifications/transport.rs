// ABOUTME: Delivery transport for BatchList notifications to a Third Party notify URI
// ABOUTME: Trait seam with a reqwest implementation posting application/xml
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

use async_trait::async_trait;
use greenbutton_core::errors::{AppError, AppResult};
use reqwest::Client;
use std::time::Duration;

/// Sends one rendered notification document
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// POST `body` to `notify_uri`; any non-2xx answer is an error
    async fn send(&self, notify_uri: &str, body: &str) -> AppResult<()>;
}

/// HTTP transport
#[derive(Clone)]
pub struct HttpNotificationTransport {
    client: Client,
}

impl HttpNotificationTransport {
    /// Build a transport with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NotificationTransport for HttpNotificationTransport {
    async fn send(&self, notify_uri: &str, body: &str) -> AppResult<()> {
        let response = self
            .client
            .post(notify_uri)
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(body.to_owned())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    AppError::external_unavailable("notify_uri", e.to_string())
                } else {
                    AppError::external_service("notify_uri", e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AppError::external_service(
                "notify_uri",
                format!("{notify_uri} answered {}", status.as_u16()),
            ))
        }
    }
}
