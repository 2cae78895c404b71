//! Hooks fired after headers, filter headers or filters are persisted and
//! when the syncing flag flips
//!
//! Callbacks run one after another in registration order. A failing
//! callback is logged and the remaining ones still run; errors never reach
//! the operation that fired the event. A [`CallbackDispatcher`] feeds every
//! event through one task, so callbacks observe events in the order they
//! were dispatched.

use crate::blockchain::BlockHeaderDb;
use crate::filters::{CompactFilterDb, CompactFilterHeaderDb};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Event delivered to registered callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    BlockHeadersConnected(Vec<BlockHeaderDb>),
    FilterHeadersConnected(Vec<CompactFilterHeaderDb>),
    FiltersConnected(Vec<CompactFilterDb>),
    SyncFlagChanged(bool),
}

impl ChainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChainEvent::BlockHeadersConnected(_) => "block_headers_connected",
            ChainEvent::FilterHeadersConnected(_) => "filter_headers_connected",
            ChainEvent::FiltersConnected(_) => "filters_connected",
            ChainEvent::SyncFlagChanged(_) => "sync_flag_changed",
        }
    }
}

/// Consumer of chain events. Every hook defaults to doing nothing.
#[async_trait]
pub trait ChainCallbacks: Send + Sync {
    async fn on_block_headers_connected(&self, _headers: &[BlockHeaderDb]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_filter_headers_connected(&self, _filter_headers: &[CompactFilterHeaderDb]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_filters_connected(&self, _filters: &[CompactFilterDb]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_sync_flag_changed(&self, _syncing: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Ordered set of callbacks
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: Vec<Arc<dyn ChainCallbacks>>,
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callback: Arc<dyn ChainCallbacks>) {
        self.callbacks.push(callback);
    }

    pub fn with(mut self, callback: Arc<dyn ChainCallbacks>) -> Self {
        self.register(callback);
        self
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Deliver `event` to every callback in order
    pub async fn execute(&self, event: &ChainEvent) {
        debug!(event = event.name(), callbacks = self.callbacks.len(), "executing callbacks");
        for (index, callback) in self.callbacks.iter().enumerate() {
            let result = match event {
                ChainEvent::BlockHeadersConnected(headers) => callback.on_block_headers_connected(headers).await,
                ChainEvent::FilterHeadersConnected(filter_headers) => {
                    callback.on_filter_headers_connected(filter_headers).await
                }
                ChainEvent::FiltersConnected(filters) => callback.on_filters_connected(filters).await,
                ChainEvent::SyncFlagChanged(syncing) => callback.on_sync_flag_changed(*syncing).await,
            };
            if let Err(e) = result {
                error!(event = event.name(), callback = index, "callback failed: {e:#}");
            }
        }
    }
}

/// Sending half of the task that runs a registry's callbacks
#[derive(Debug, Clone)]
pub struct CallbackDispatcher {
    /// None when the registry is empty
    sender: Option<mpsc::UnboundedSender<ChainEvent>>,
}

impl CallbackDispatcher {
    /// Spawn the delivery task on `executor`. It runs until every clone of
    /// the dispatcher is dropped.
    pub fn spawn(registry: CallbackRegistry, executor: &Handle) -> Self {
        if registry.is_empty() {
            return Self { sender: None };
        }
        let (sender, mut receiver) = mpsc::unbounded_channel::<ChainEvent>();
        executor.spawn(async move {
            while let Some(event) = receiver.recv().await {
                registry.execute(&event).await;
            }
            debug!("callback dispatcher stopped");
        });
        Self { sender: Some(sender) }
    }

    /// Queue `event` behind every event dispatched before it
    pub fn dispatch(&self, event: ChainEvent) {
        if let Some(sender) = &self.sender {
            if let Err(e) = sender.send(event) {
                warn!(event = e.0.name(), "callback task is gone, dropping event");
            }
        }
    }
}

/// Forwards every event into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelCallbacks {
    sender: mpsc::UnboundedSender<ChainEvent>,
}

impl ChannelCallbacks {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChainEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: ChainEvent) -> anyhow::Result<()> {
        self.sender
            .send(event)
            .map_err(|e| anyhow::anyhow!("event receiver dropped: {}", e.0.name()))
    }
}

#[async_trait]
impl ChainCallbacks for ChannelCallbacks {
    async fn on_block_headers_connected(&self, headers: &[BlockHeaderDb]) -> anyhow::Result<()> {
        self.send(ChainEvent::BlockHeadersConnected(headers.to_vec()))
    }

    async fn on_filter_headers_connected(&self, filter_headers: &[CompactFilterHeaderDb]) -> anyhow::Result<()> {
        self.send(ChainEvent::FilterHeadersConnected(filter_headers.to_vec()))
    }

    async fn on_filters_connected(&self, filters: &[CompactFilterDb]) -> anyhow::Result<()> {
        self.send(ChainEvent::FiltersConnected(filters.to_vec()))
    }

    async fn on_sync_flag_changed(&self, syncing: bool) -> anyhow::Result<()> {
        self.send(ChainEvent::SyncFlagChanged(syncing))
    }
}
