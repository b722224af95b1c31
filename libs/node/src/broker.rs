//! Topic publish/subscribe, independent of the request/response path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::BrokerError;

/// A message delivered to a subscriber
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub topic: String,
    pub data: Vec<u8>,
}

pub type BrokerCallback = Arc<dyn Fn(BrokerMessage) + Send + Sync>;

#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), BrokerError>;

    /// Register `callback` for every later message on `topic`
    ///
    /// Callbacks run on their own tasks, outside any request handling.
    async fn subscribe(&self, topic: &str, callback: BrokerCallback) -> Result<(), BrokerError>;
}

/// In-process broker
///
/// Subscriptions may be registered at any time; publishing requires a
/// connected broker.
#[derive(Default)]
pub struct MemoryBroker {
    connected: AtomicBool,
    subscribers: RwLock<HashMap<String, Vec<BrokerCallback>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[async_trait::async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.connected.store(true, Ordering::Release);
        tracing::debug!("memory broker connected");
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.connected.store(false, Ordering::Release);
        tracing::debug!("memory broker closed");
        Ok(())
    }

    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }

        let callbacks = self
            .subscribers
            .read()
            .map_err(|_| BrokerError::Custom("subscriber lock poisoned".to_string()))?
            .get(topic)
            .cloned()
            .unwrap_or_default();

        tracing::debug!(topic, subscribers = callbacks.len(), "publishing");

        for callback in callbacks {
            let message = BrokerMessage {
                topic: topic.to_string(),
                data: data.clone(),
            };
            tokio::spawn(async move { callback(message) });
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str, callback: BrokerCallback) -> Result<(), BrokerError> {
        self.subscribers
            .write()
            .map_err(|_| BrokerError::Custom("subscriber lock poisoned".to_string()))?
            .entry(topic.to_string())
            .or_default()
            .push(callback);

        tracing::debug!(topic, "subscribed");
        Ok(())
    }
}
