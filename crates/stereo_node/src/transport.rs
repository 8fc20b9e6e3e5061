//! Pub/sub seam between the node and the middleware.
//!
//! The node only needs two things from a transport: a callback subscription
//! that stays registered until its handle is dropped, and a fire-and-forget
//! put. `ZenohTransport` backs the real process, `LocalTransport` is an
//! in-process bus for tests and log replay.

use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use zenoh::Wait;

use crate::error::NodeError;

/// Handler invoked once per received payload, in arrival order
pub type PayloadHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Convert a ROS-style topic name into a key expression.
///
/// Leading and trailing slashes are stripped; `None` when nothing is left.
pub fn topic_key(topic: &str) -> Option<&str> {
    let key = topic.trim().trim_matches('/');
    (!key.is_empty()).then_some(key)
}

fn require_key(topic: &str) -> Result<&str, NodeError> {
    topic_key(topic).ok_or_else(|| NodeError::Subscription {
        topic: topic.to_string(),
        reason: "empty topic name".to_string(),
    })
}

/// Keeps a subscription alive; dropping it unregisters the handler
pub struct SubscriptionHandle {
    topic: String,
    _guard: Box<dyn Any + Send>,
}

impl SubscriptionHandle {
    pub fn new(topic: &str, guard: impl Any + Send) -> Self {
        Self {
            topic: topic.to_string(),
            _guard: Box::new(guard),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("topic", &self.topic)
            .finish()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Register `handler` for every payload published on `topic`
    async fn subscribe(
        &self,
        topic: &str,
        handler: PayloadHandler,
    ) -> Result<SubscriptionHandle, NodeError>;

    /// Publish a payload without waiting for delivery
    fn put(&self, topic: &str, payload: Vec<u8>) -> Result<(), NodeError>;
}

/// Transport over a shared zenoh session
#[derive(Clone)]
pub struct ZenohTransport {
    session: Arc<zenoh::Session>,
}

impl ZenohTransport {
    pub fn new(session: Arc<zenoh::Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<zenoh::Session> {
        &self.session
    }
}

#[async_trait]
impl Transport for ZenohTransport {
    async fn subscribe(
        &self,
        topic: &str,
        handler: PayloadHandler,
    ) -> Result<SubscriptionHandle, NodeError> {
        let key = require_key(topic)?.to_string();
        let subscriber = self
            .session
            .declare_subscriber(key.clone())
            .callback(move |sample| {
                let payload = sample.payload().to_bytes();
                handler(payload.as_ref());
            })
            .await
            .map_err(|e| NodeError::Subscription {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        log::info!("Subscribed to '{}' (key '{}')", topic, key);
        Ok(SubscriptionHandle::new(topic, subscriber))
    }

    fn put(&self, topic: &str, payload: Vec<u8>) -> Result<(), NodeError> {
        let key = require_key(topic)?;
        self.session.put(key, payload).wait()?;
        Ok(())
    }
}

#[derive(Default)]
struct LocalBus {
    next_id: u64,
    routes: HashMap<String, Vec<(u64, PayloadHandler)>>,
    latched: HashMap<String, Vec<u8>>,
}

/// In-process transport with synchronous delivery.
///
/// `publish` runs every handler on the caller's thread before returning, in
/// subscription order.
#[derive(Clone, Default)]
pub struct LocalTransport {
    bus: Arc<Mutex<LocalBus>>,
}

struct LocalSubscription {
    bus: Weak<Mutex<LocalBus>>,
    key: String,
    id: u64,
}

impl Drop for LocalSubscription {
    fn drop(&mut self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let mut bus = bus.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handlers) = bus.routes.get_mut(&self.key) {
            handlers.retain(|(id, _)| *id != self.id);
            if handlers.is_empty() {
                bus.routes.remove(&self.key);
            }
        }
    }
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to every current subscriber of `topic`.
    ///
    /// Returns the number of handlers invoked.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> usize {
        let Some(key) = topic_key(topic) else {
            return 0;
        };
        // Handlers run outside the lock so they may publish in turn
        let handlers: Vec<PayloadHandler> = {
            let bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
            bus.routes
                .get(key)
                .map(|hs| hs.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    /// Publish and keep `payload` for subscribers that join later
    pub fn latch(&self, topic: &str, payload: &[u8]) -> usize {
        if let Some(key) = topic_key(topic) {
            self.bus
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .latched
                .insert(key.to_string(), payload.to_vec());
        }
        self.publish(topic, payload)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        let Some(key) = topic_key(topic) else {
            return 0;
        };
        self.bus
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .routes
            .get(key)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn subscribe(
        &self,
        topic: &str,
        handler: PayloadHandler,
    ) -> Result<SubscriptionHandle, NodeError> {
        let key = require_key(topic)?.to_string();
        let (id, latched) = {
            let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
            let id = bus.next_id;
            bus.next_id += 1;
            bus.routes
                .entry(key.clone())
                .or_default()
                .push((id, handler.clone()));
            (id, bus.latched.get(&key).cloned())
        };

        if let Some(payload) = latched {
            handler(payload.as_slice());
        }

        let guard = LocalSubscription {
            bus: Arc::downgrade(&self.bus),
            key,
            id,
        };
        Ok(SubscriptionHandle::new(topic, guard))
    }

    fn put(&self, topic: &str, payload: Vec<u8>) -> Result<(), NodeError> {
        require_key(topic)?;
        self.publish(topic, &payload);
        Ok(())
    }
}
