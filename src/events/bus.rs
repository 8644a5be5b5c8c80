use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::event::Event;

/// Consumer of events on a topic.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        (self.0)(event).await
    }
}

/// Adapt an async closure into a subscribable handler:
/// `bus.subscribe(topic, handler_fn(|event| async move { ... }))`.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Asynchronous topic-based event delivery.
///
/// Two implementations exist: [`super::MemoryEventBus`] (best-effort,
/// concurrent, unordered fan-out within one process) and
/// [`super::DurableEventBus`] (at-least-once over a broker transport,
/// ordered per partition key). Neither retries a failing handler.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, event: Event) -> anyhow::Result<()>;

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> anyhow::Result<()>;

    /// Stop delivery. In-flight handler invocations are allowed to finish.
    async fn close(&self) -> anyhow::Result<()>;
}
