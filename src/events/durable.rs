use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::bus::{EventBus, EventHandler};
use super::event::Event;

/// Transport carrying serialized events to and from a partitioned log.
///
/// The actual broker (Kafka, Redpanda, ...) is out of scope here; the
/// durable bus only relies on this contract: `send` appends to the
/// partition selected by `key`, and messages sharing a key are received in
/// append order. Delivery is at-least-once.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn send(&self, topic: &str, key: &[u8], payload: Vec<u8>) -> anyhow::Result<()>;

    /// Next message on the topic, or `None` once the transport is closed
    /// and drained.
    async fn recv(&self, topic: &str) -> Option<Vec<u8>>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Broker-backed bus: at-least-once delivery, ordered per partition key.
///
/// Publish appends the envelope keyed by event id, so ordering
/// holds per event, not per user, since every event gets a fresh random
/// id. Subscribe runs one long-lived consuming loop per call; a handler
/// error is logged and the loop continues, so failed handling is silent
/// data loss (no retry, no dead-letter, no offset rollback).
pub struct DurableEventBus {
    transport: Arc<dyn BrokerTransport>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl DurableEventBus {
    pub fn new(transport: Arc<dyn BrokerTransport>) -> Self {
        Self {
            transport,
            consumers: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EventBus for DurableEventBus {
    async fn publish(&self, topic: &str, event: Event) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(&event)?;
        self.transport
            .send(topic, event.id.as_bytes(), payload)
            .await?;
        debug!(event_type = %event.event_type, topic, "event published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> anyhow::Result<()> {
        let transport = self.transport.clone();
        let topic = topic.to_string();

        let task = tokio::spawn(async move {
            while let Some(payload) = transport.recv(&topic).await {
                let event: Event = match serde_json::from_slice(&payload) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, topic, "skipping undecodable message");
                        continue;
                    }
                };
                if let Err(e) = handler.handle(event).await {
                    error!(error = %e, topic, "event handler failed, message dropped");
                }
            }
            debug!(topic, "consumer loop terminated");
        });

        self.consumers.lock().unwrap().push(task);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.transport.close().await?;
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.consumers.lock().unwrap());
        for task in tasks {
            // In-flight handler invocations run to completion.
            let _ = task.await;
        }
        info!("durable event bus closed");
        Ok(())
    }
}

const PARTITIONS: usize = 8;

struct TopicLog {
    partitions: Vec<Mutex<VecDeque<Vec<u8>>>>,
    arrival: Notify,
}

impl TopicLog {
    fn new() -> Self {
        Self {
            partitions: (0..PARTITIONS).map(|_| Mutex::new(VecDeque::new())).collect(),
            arrival: Notify::new(),
        }
    }

    fn try_pop(&self) -> Option<Vec<u8>> {
        for partition in &self.partitions {
            if let Some(payload) = partition.lock().unwrap().pop_front() {
                return Some(payload);
            }
        }
        None
    }
}

/// In-process partitioned log implementing [`BrokerTransport`] for dev
/// runs and tests: hash(key) picks the partition, each partition is FIFO.
pub struct InProcessBroker {
    topics: Mutex<HashMap<String, Arc<TopicLog>>>,
    closed: AtomicBool,
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn topic(&self, name: &str) -> Arc<TopicLog> {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TopicLog::new()))
            .clone()
    }
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for InProcessBroker {
    async fn send(&self, topic: &str, key: &[u8], payload: Vec<u8>) -> anyhow::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("broker closed");
        }
        let log = self.topic(topic);
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let partition = (hasher.finish() as usize) % PARTITIONS;
        log.partitions[partition].lock().unwrap().push_back(payload);
        log.arrival.notify_one();
        Ok(())
    }

    async fn recv(&self, topic: &str) -> Option<Vec<u8>> {
        let log = self.topic(topic);
        loop {
            if let Some(payload) = log.try_pop() {
                return Some(payload);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            log.arrival.notified().await;
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        for log in self.topics.lock().unwrap().values() {
            log.arrival.notify_waiters();
        }
        Ok(())
    }
}
