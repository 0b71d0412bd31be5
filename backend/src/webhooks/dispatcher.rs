// Webhook Dispatcher - Signed, retried delivery of tenant events to registered endpoints

use chrono::Utc;
use futures::future::join_all;
use openoms_shared::{DeliveryStatus, WebhookDelivery};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::endpoint::{endpoints_from_settings, WebhookEndpoint};
use super::signing::{signature_header, EVENT_HEADER, SIGNATURE_HEADER};
use super::ssrf::{build_client, check_url, NetworkPolicy, SsrfError};
use crate::repository::{DeliveryLogRepository, RepositoryError, TenantSettingsReader};
use crate::tasks::BackgroundTasks;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to load tenant settings: {0}")]
    Settings(#[from] RepositoryError),
    #[error("Failed to serialize payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Exponential backoff: the delay before retry `k` is `base_delay * multiplier^(k-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 4,
        }
    }
}

impl RetryPolicy {
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub network: NetworkPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            network: NetworkPolicy::strict(),
        }
    }
}

/// Optional push of every dispatched event to in-process subscribers.
pub trait RealtimeBroadcaster: Send + Sync {
    fn broadcast(&self, tenant_id: Uuid, event_type: &str, payload: &serde_json::Value);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { status: u16, attempts: u32 },
    Failed { response_code: Option<u16>, error: String, attempts: u32 },
    /// Aborted by shutdown; nothing was recorded.
    Cancelled { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub url: String,
    pub outcome: DeliveryOutcome,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Delivered { .. })
    }
}

enum AttemptResult {
    Status(u16),
    Error(String),
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    settings: Arc<dyn TenantSettingsReader>,
    deliveries: Arc<dyn DeliveryLogRepository>,
    broadcaster: Option<Arc<dyn RealtimeBroadcaster>>,
    client: reqwest::Client,
    config: DispatcherConfig,
    tasks: BackgroundTasks,
}

impl WebhookDispatcher {
    pub fn new(
        settings: Arc<dyn TenantSettingsReader>,
        deliveries: Arc<dyn DeliveryLogRepository>,
        config: DispatcherConfig,
        tasks: BackgroundTasks,
    ) -> Result<Self, SsrfError> {
        let client = build_client(config.network, config.timeout)?;

        Ok(Self {
            settings,
            deliveries,
            broadcaster: None,
            client,
            config,
            tasks,
        })
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn RealtimeBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Fire-and-forget: call after the triggering transaction has committed.
    pub fn dispatch<T: Serialize>(&self, tenant_id: Uuid, event_type: &str, payload: &T) {
        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Dropping {} webhook for tenant {}: {}", event_type, tenant_id, e);
                return;
            }
        };

        let dispatcher = self.clone();
        let ctx = self.tasks.context();
        let event_type = event_type.to_string();

        self.tasks.spawn(async move {
            if let Err(e) = dispatcher.deliver(&ctx, tenant_id, &event_type, &payload).await {
                error!("Webhook dispatch of {} for tenant {} failed: {}", event_type, tenant_id, e);
            }
        });
    }

    /// Broadcast, then deliver to every eligible endpoint concurrently.
    pub async fn deliver(
        &self,
        ctx: &CancellationToken,
        tenant_id: Uuid,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<Vec<DeliveryReport>, DispatchError> {
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast(tenant_id, event_type, payload);
        }

        let Some(settings) = self.settings.tenant_settings(tenant_id).await? else {
            return Ok(Vec::new());
        };
        let endpoints = match endpoints_from_settings(&settings) {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!("Ignoring malformed webhook settings for tenant {}: {}", tenant_id, e);
                return Ok(Vec::new());
            }
        };

        let eligible: Vec<&WebhookEndpoint> =
            endpoints.iter().filter(|ep| ep.subscribes_to(event_type)).collect();
        if eligible.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::to_vec(payload)?;
        let deliveries = eligible
            .into_iter()
            .map(|endpoint| self.deliver_to_endpoint(ctx, tenant_id, event_type, endpoint, &body, payload));

        Ok(join_all(deliveries).await)
    }

    async fn deliver_to_endpoint(
        &self,
        ctx: &CancellationToken,
        tenant_id: Uuid,
        event_type: &str,
        endpoint: &WebhookEndpoint,
        body: &[u8],
        payload: &serde_json::Value,
    ) -> DeliveryReport {
        let signature = signature_header(&endpoint.secret, body);
        let retry = self.config.retry;
        let mut last_status = None;
        let mut last_error = String::new();

        for attempt in 1..=retry.total_attempts() {
            if attempt > 1 {
                let delay = retry.delay_before_retry(attempt - 1);
                debug!(
                    "Retrying {} webhook to {} in {:?} (attempt {}/{})",
                    event_type,
                    endpoint.url,
                    delay,
                    attempt,
                    retry.total_attempts()
                );
                tokio::select! {
                    _ = ctx.cancelled() => return cancelled(endpoint, attempt - 1),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let result = tokio::select! {
                _ = ctx.cancelled() => return cancelled(endpoint, attempt),
                result = self.attempt(endpoint, event_type, &signature, body) => result,
            };

            match result {
                AttemptResult::Status(status) if (200..300).contains(&status) => {
                    info!("Delivered {} webhook to {} ({})", event_type, endpoint.url, status);
                    self.record(tenant_id, endpoint, event_type, payload, DeliveryStatus::Success, Some(status), None)
                        .await;
                    return DeliveryReport {
                        url: endpoint.url.clone(),
                        outcome: DeliveryOutcome::Delivered { status, attempts: attempt },
                    };
                }
                AttemptResult::Status(status) => {
                    last_status = Some(status);
                    last_error = format!("unexpected status {}", status);
                }
                AttemptResult::Error(error) => {
                    last_status = None;
                    last_error = error;
                }
            }
        }

        warn!(
            "Webhook {} to {} failed after {} attempts: {}",
            event_type,
            endpoint.url,
            retry.total_attempts(),
            last_error
        );
        self.record(
            tenant_id,
            endpoint,
            event_type,
            payload,
            DeliveryStatus::Failed,
            last_status,
            Some(last_error.clone()),
        )
        .await;

        DeliveryReport {
            url: endpoint.url.clone(),
            outcome: DeliveryOutcome::Failed {
                response_code: last_status,
                error: last_error,
                attempts: retry.total_attempts(),
            },
        }
    }

    async fn attempt(
        &self,
        endpoint: &WebhookEndpoint,
        event_type: &str,
        signature: &str,
        body: &[u8],
    ) -> AttemptResult {
        let url = match check_url(&endpoint.url, self.config.network) {
            Ok(url) => url,
            Err(e) => return AttemptResult::Error(e.to_string()),
        };

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(EVENT_HEADER, event_type)
            .body(body.to_vec())
            .send()
            .await;

        match response {
            Ok(response) => AttemptResult::Status(response.status().as_u16()),
            Err(e) => AttemptResult::Error(error_chain(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        tenant_id: Uuid,
        endpoint: &WebhookEndpoint,
        event_type: &str,
        payload: &serde_json::Value,
        status: DeliveryStatus,
        response_code: Option<u16>,
        error: Option<String>,
    ) {
        let delivery = WebhookDelivery {
            id: Uuid::new_v4(),
            tenant_id,
            url: endpoint.url.clone(),
            event_type: event_type.to_string(),
            payload: payload.clone(),
            status: status.as_str().to_string(),
            response_code: response_code.map(i32::from),
            error,
            created_at: Utc::now(),
        };

        if let Err(e) = self.deliveries.append_delivery(&delivery).await {
            error!(
                "Failed to record {} delivery to {} for tenant {}: {}",
                status.as_str(),
                endpoint.url,
                tenant_id,
                e
            );
        }
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    pub async fn drain(&self) {
        self.tasks.drain().await;
    }

    pub fn shutdown(&self) {
        self.tasks.shutdown();
    }
}

fn cancelled(endpoint: &WebhookEndpoint, attempts: u32) -> DeliveryReport {
    debug!("Webhook delivery to {} cancelled", endpoint.url);
    DeliveryReport {
        url: endpoint.url.clone(),
        outcome: DeliveryOutcome::Cancelled { attempts },
    }
}

/// Display an error with its sources so a resolver rejection buried under
/// the client's connect error still names the address.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
