use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::bus::{EventBus, EventHandler};
use super::event::Event;

/// In-process fan-out bus.
///
/// Publish dispatches to every handler currently registered for the topic
/// as an independent tokio task: delivery is best-effort, concurrent and
/// unordered, and there is no backpressure. A handler error is logged and
/// neither surfaced to the publisher nor retried.
#[derive(Default)]
pub struct MemoryEventBus {
    subscribers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, topic: &str, event: Event) -> anyhow::Result<()> {
        // Clone the handler list out so the lock is not held across spawns.
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subs = self
                .subscribers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match subs.get(topic) {
                Some(handlers) => handlers.clone(),
                None => return Ok(()),
            }
        };

        for handler in handlers {
            let event = event.clone();
            let event_type = event.event_type.clone();
            tokio::spawn(async move {
                if let Err(e) = handler.handle(event).await {
                    error!(error = %e, event_type = %event_type, "event handler failed");
                }
            });
        }

        debug!(event_type = %event.event_type, topic, "event published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> anyhow::Result<()> {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subs.entry(topic.to_string()).or_default().push(handler);
        debug!(topic, "handler subscribed");
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        info!("memory event bus closed");
        Ok(())
    }
}
