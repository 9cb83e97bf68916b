//! Delivery fan-out: routes a finished reply to the live connection(s)
//! subscribed for its (tenant, user). Fire-and-forget — a disconnected or
//! saturated subscriber misses the event, nothing is redelivered.

use std::collections::HashMap;
use std::sync::Arc;

use murmur_schema::{delivery_channel, DeliveryEvent};
use tokio::sync::{mpsc, RwLock};

/// Subscription key: every session of one user within one tenant.
type UserKey = (i64, i64);

type Subscriber = mpsc::Sender<DeliveryEvent>;

pub struct DeliveryBus {
    subscribers: Arc<RwLock<HashMap<UserKey, Vec<Subscriber>>>>,
    capacity: usize,
}

impl DeliveryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Subscribe to all sessions of one (tenant, user). Dropping the
    /// receiver unsubscribes; the dead sender is pruned on the next publish.
    pub async fn subscribe(&self, tenant_id: i64, user_id: i64) -> mpsc::Receiver<DeliveryEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().await;
        subs.entry((tenant_id, user_id)).or_default().push(tx);
        rx
    }

    /// Publish an event on the channel derived from (tenant, user, session).
    pub async fn publish(
        &self,
        tenant_id: i64,
        user_id: i64,
        session_id: &str,
        event: DeliveryEvent,
    ) {
        self.publisher()
            .publish(tenant_id, user_id, session_id, event)
            .await;
    }

    pub fn publisher(&self) -> DeliveryPublisher {
        DeliveryPublisher {
            subscribers: self.subscribers.clone(),
        }
    }
}

/// Clone-able publishing handle for the worker.
#[derive(Clone)]
pub struct DeliveryPublisher {
    subscribers: Arc<RwLock<HashMap<UserKey, Vec<Subscriber>>>>,
}

impl DeliveryPublisher {
    pub async fn publish(
        &self,
        tenant_id: i64,
        user_id: i64,
        session_id: &str,
        event: DeliveryEvent,
    ) {
        let channel = delivery_channel(tenant_id, user_id, session_id);
        let mut subs = self.subscribers.write().await;
        let Some(senders) = subs.get_mut(&(tenant_id, user_id)) else {
            tracing::debug!(%channel, "no live subscribers");
            return;
        };

        senders.retain(|tx| !tx.is_closed());
        for tx in senders.iter() {
            // try_send: a full subscriber drops the event rather than
            // stalling the worker.
            let _ = tx.try_send(event.clone());
        }
        tracing::debug!(%channel, subscribers = senders.len(), "published delivery event");
        if senders.is_empty() {
            subs.remove(&(tenant_id, user_id));
        }
    }
}
