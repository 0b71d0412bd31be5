// Realtime Hub - In-process fan-out of dispatched events to live subscribers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::webhooks::RealtimeBroadcaster;

const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub tenant_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RealtimeHub {
    sender: broadcast::Sender<RealtimeMessage>,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Every tenant's messages.
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeMessage> {
        self.sender.subscribe()
    }

    pub fn subscribe_tenant(&self, tenant_id: Uuid) -> TenantSubscription {
        TenantSubscription {
            tenant_id,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn publish(&self, message: RealtimeMessage) -> usize {
        // No subscribers is not an error.
        self.sender.send(message).unwrap_or(0)
    }
}

impl RealtimeBroadcaster for RealtimeHub {
    fn broadcast(&self, tenant_id: Uuid, event_type: &str, payload: &serde_json::Value) {
        self.publish(RealtimeMessage {
            tenant_id,
            event_type: event_type.to_string(),
            payload: payload.clone(),
            timestamp: Utc::now(),
        });
    }
}

pub struct TenantSubscription {
    tenant_id: Uuid,
    receiver: broadcast::Receiver<RealtimeMessage>,
}

impl TenantSubscription {
    /// Next message for this tenant. Returns `None` once the hub is gone.
    /// Messages dropped because the subscriber lagged are skipped.
    pub async fn recv(&mut self) -> Option<RealtimeMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if message.tenant_id == self.tenant_id => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Realtime subscriber for tenant {} lagged by {} messages", self.tenant_id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
