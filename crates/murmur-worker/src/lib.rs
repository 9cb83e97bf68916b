//! The single message worker: pulls queued messages, runs the tenant agent,
//! persists the exchange and fans the reply out to connected clients.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use murmur_agent::{ActionExecutor, AgentRegistry};
use murmur_bus::DeliveryPublisher;
use murmur_queue::{MessageQueue, QueueEntry};
use murmur_schema::{message_stream, DeliveryEvent, QueuedPayload};
use murmur_store::{insert_message, Store};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const CONSUMER_GROUP: &str = "message-workers";

const ERROR_REPLY: &str = "Sorry, I encountered an error processing your message.";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumer name within the group; must be unique per worker process.
    pub consumer: String,
    /// How long one queue read blocks before giving the loop a chance to
    /// notice shutdown.
    pub read_timeout: Duration,
    /// Pending entries idle longer than this are claimed for redelivery.
    pub claim_idle: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumer: "worker-1".to_string(),
            read_timeout: Duration::from_secs(5),
            claim_idle: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
    Draining,
}

pub struct Worker {
    store: Arc<Store>,
    queue: Arc<MessageQueue>,
    registry: Arc<AgentRegistry>,
    bus: DeliveryPublisher,
    config: WorkerConfig,
    state: watch::Sender<WorkerState>,
}

impl Worker {
    pub fn new(
        store: Arc<Store>,
        queue: Arc<MessageQueue>,
        registry: Arc<AgentRegistry>,
        bus: DeliveryPublisher,
        config: WorkerConfig,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Stopped);
        Self {
            store,
            queue,
            registry,
            bus,
            config,
            state,
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: WorkerState) {
        info!(state = ?next, "worker state");
        let _ = self.state.send(next);
    }

    /// Consume until cancelled. The in-flight message always finishes
    /// before the loop exits, so cancellation never loses an acked entry.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let streams = self.tenant_streams().await?;
        for stream in &streams {
            self.queue.ensure_group(stream, CONSUMER_GROUP).await?;
        }
        info!(consumer = %self.config.consumer, streams = streams.len(), "worker running");
        self.set_state(WorkerState::Running);

        while !cancel.is_cancelled() {
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = self.queue.read_group(
                    CONSUMER_GROUP,
                    &self.config.consumer,
                    &streams,
                    self.config.read_timeout,
                ) => read,
            };
            match read {
                Ok(Some(entry)) => self.process_draining(&entry, &cancel).await,
                Ok(None) => {
                    // Idle moment: pick up anything a crashed or wedged
                    // delivery left pending.
                    match self
                        .queue
                        .claim_stale(CONSUMER_GROUP, &self.config.consumer, self.config.claim_idle)
                        .await
                    {
                        Ok(Some(entry)) => {
                            warn!(entry_id = entry.id, stream = %entry.stream, "redelivering stale entry");
                            self.process_draining(&entry, &cancel).await;
                        }
                        Ok(None) => {}
                        Err(error) => error!(%error, "stale claim failed"),
                    }
                }
                Err(error) => {
                    error!(%error, "queue read failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        if self.state() != WorkerState::Draining {
            self.set_state(WorkerState::Draining);
        }
        self.set_state(WorkerState::Stopped);
        info!(consumer = %self.config.consumer, "worker stopped");
        Ok(())
    }

    async fn tenant_streams(&self) -> Result<Vec<String>> {
        let mut tenant_ids = self.store.list_tenant_ids().await?;
        if tenant_ids.is_empty() {
            warn!("no tenants provisioned, listening on the default stream");
            tenant_ids = vec![1];
        }
        Ok(tenant_ids.into_iter().map(message_stream).collect())
    }

    /// Process one entry to completion, flagging Draining if shutdown is
    /// requested while it is in flight. The entry always finishes.
    async fn process_draining(&self, entry: &QueueEntry, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            self.set_state(WorkerState::Draining);
        }
        let process = self.process_entry(entry);
        tokio::pin!(process);
        loop {
            tokio::select! {
                _ = cancel.cancelled(), if !cancel.is_cancelled() => {
                    self.set_state(WorkerState::Draining);
                }
                _ = &mut process => break,
            }
        }
    }

    /// One delivery attempt. Failures leave the entry pending so a later
    /// claim can retry it; only a fully persisted exchange is acked.
    async fn process_entry(&self, entry: &QueueEntry) {
        if let Err(error) = self.handle(entry).await {
            error!(entry_id = entry.id, stream = %entry.stream, %error, "message processing failed");
            self.publish_failure(entry).await;
        }
    }

    async fn handle(&self, entry: &QueueEntry) -> Result<()> {
        let payload =
            QueuedPayload::from_fields(&entry.fields).context("malformed queue entry")?;
        let agent = self.registry.get_or_create(payload.tenant_id).await?;
        let reply = agent
            .respond(
                payload.user_id,
                &payload.user_info,
                &payload.session_id,
                &payload.content,
            )
            .await?;

        let actions_taken = reply.actions.len();
        {
            let executor = ActionExecutor::new(payload.tenant_id);
            let payload = payload.clone();
            let reply = reply.clone();
            self.store
                .transact(move |tx| {
                    insert_message(
                        tx,
                        payload.tenant_id,
                        payload.user_id,
                        &payload.session_id,
                        "user",
                        &payload.content,
                    )?;
                    executor.apply(tx, payload.user_id, &reply.actions)?;
                    insert_message(
                        tx,
                        payload.tenant_id,
                        payload.user_id,
                        &payload.session_id,
                        "assistant",
                        &reply.response,
                    )?;
                    Ok(())
                })
                .await?;
        }

        self.bus
            .publish(
                payload.tenant_id,
                payload.user_id,
                &payload.session_id,
                DeliveryEvent::Message {
                    content: reply.response,
                    session_id: payload.session_id.clone(),
                    actions_taken,
                },
            )
            .await;

        self.queue.ack(&entry.stream, CONSUMER_GROUP, entry.id).await?;
        info!(
            entry_id = entry.id,
            tenant_id = payload.tenant_id,
            user_id = payload.user_id,
            actions_taken,
            "message processed"
        );
        Ok(())
    }

    /// Best-effort error notice to whoever is waiting. The raw fields may
    /// themselves be damaged, so every piece defaults rather than fails.
    async fn publish_failure(&self, entry: &QueueEntry) {
        let field_i64 = |name: &str| {
            entry
                .fields
                .get(name)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0)
        };
        let tenant_id = field_i64("tenant_id");
        let user_id = field_i64("user_id");
        let session_id = entry
            .fields
            .get("session_id")
            .cloned()
            .unwrap_or_default();

        let event = DeliveryEvent::Error {
            content: ERROR_REPLY.to_string(),
            session_id: session_id.clone(),
        };
        self.bus.publish(tenant_id, user_id, &session_id, event).await;
    }
}
