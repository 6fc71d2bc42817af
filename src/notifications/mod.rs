// ABOUTME: Outbound Third Party notification queue with bounded retry
// ABOUTME: A bounded channel feeds one worker task that delivers BatchList documents
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! # Third Party Notifications
//!
//! When new data is available for a subscription the Data Custodian posts an
//! ESPI `BatchList` to the client's `notify_uri`. Notifications are queued on
//! a bounded channel and delivered by a single worker task. Each failed
//! attempt is logged; after the retry budget is spent the notification is
//! dropped and a `NotificationFailed` audit event is written.
//!
//! The worker exits once every [`NotificationQueue`] handle has been dropped
//! and the channel is drained.

/// `BatchList` XML rendering
pub mod batch_list;
/// Delivery transport trait and HTTP implementation
pub mod transport;

pub use transport::{HttpNotificationTransport, NotificationTransport};

use crate::oauth2_server::ClientView;
use crate::security::audit::{AuditEvent, AuditEventType, AuditSeverity, SecurityAuditor};
use greenbutton_core::constants::notifications::{
    DEFAULT_MAX_RETRIES, DEFAULT_QUEUE_CAPACITY, DEFAULT_RETRY_BASE_DELAY_MS,
};
use greenbutton_core::errors::{AppError, AppResult, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Retry behaviour for failed deliveries
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first failure
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each later one
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based)
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Queue sizing and retry behaviour
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Notifications buffered before `enqueue` rejects
    pub queue_capacity: usize,
    /// Retry policy applied by the worker
    pub retry: RetryPolicy,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

/// One pending notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Client being notified
    pub client_id: String,
    /// Destination endpoint
    pub notify_uri: String,
    /// Resource URIs listed in the `BatchList`
    pub resources: Vec<String>,
}

/// Handle for submitting notifications
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    /// Create the queue and spawn its delivery worker
    #[must_use]
    pub fn start(
        transport: Arc<dyn NotificationTransport>,
        auditor: SecurityAuditor,
        config: &NotificationConfig,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let worker = NotificationWorker {
            transport,
            auditor,
            retry: config.retry.clone(),
        };
        let handle = tokio::spawn(worker.run(receiver));
        (Self { sender }, handle)
    }

    /// Queue a notification without waiting
    ///
    /// # Errors
    ///
    /// Returns a retryable unavailable error when the queue is full or the
    /// worker has stopped
    pub fn enqueue(&self, notification: Notification) -> AppResult<()> {
        self.sender.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(n) => AppError::new(
                ErrorCode::ResourceUnavailable,
                format!("Notification queue is full, dropped notification for {}", n.client_id),
            ),
            mpsc::error::TrySendError::Closed(n) => AppError::new(
                ErrorCode::ResourceUnavailable,
                format!("Notification worker stopped, dropped notification for {}", n.client_id),
            ),
        })
    }

    /// Queue a `BatchList` for a client's registered notify URI
    ///
    /// # Errors
    ///
    /// Returns invalid input when the client has no notify URI or no resources
    /// are given, or the errors of [`Self::enqueue`]
    pub fn notify_client(&self, client: &ClientView, resources: Vec<String>) -> AppResult<()> {
        let Some(notify_uri) = client.notify_uri.clone() else {
            return Err(AppError::invalid_input(format!(
                "client {} has no notify_uri",
                client.client_id
            )));
        };
        if resources.is_empty() {
            return Err(AppError::invalid_input("notification lists no resources"));
        }
        self.enqueue(Notification {
            client_id: client.client_id.clone(),
            notify_uri,
            resources,
        })
    }
}

struct NotificationWorker {
    transport: Arc<dyn NotificationTransport>,
    auditor: SecurityAuditor,
    retry: RetryPolicy,
}

impl NotificationWorker {
    async fn run(self, mut receiver: mpsc::Receiver<Notification>) {
        info!("Notification worker started");
        while let Some(notification) = receiver.recv().await {
            self.deliver(&notification).await;
        }
        info!("Notification worker stopped");
    }

    async fn deliver(&self, notification: &Notification) -> bool {
        let body = batch_list::render(&notification.resources);
        let mut last_error = String::new();

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay_for(attempt)).await;
            }
            match self.transport.send(&notification.notify_uri, &body).await {
                Ok(()) => {
                    debug!(
                        client_id = %notification.client_id,
                        attempt,
                        resources = notification.resources.len(),
                        "Delivered BatchList notification"
                    );
                    return true;
                }
                Err(e) => {
                    warn!(
                        client_id = %notification.client_id,
                        notify_uri = %notification.notify_uri,
                        attempt,
                        max_retries = self.retry.max_retries,
                        error = %e,
                        "Notification delivery failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        self.auditor
            .log_event(
                AuditEvent::new(
                    AuditEventType::NotificationFailed,
                    AuditSeverity::Warning,
                    format!(
                        "Notification to {} abandoned after {} attempts",
                        notification.client_id,
                        self.retry.max_retries + 1
                    ),
                )
                .with_client_id(&notification.client_id)
                .with_success(false)
                .with_payload(json!({
                    "notify_uri": notification.notify_uri,
                    "resources": notification.resources,
                    "error": last_error,
                })),
            )
            .await;
        false
    }
}
