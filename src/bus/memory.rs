//! In-process topic exchange implementing [`MessageChannel`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::bus::{topic_matches, Delivery, MessageChannel, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    queue: String,
    exchange: String,
    routing_key: String,
}

#[derive(Debug, Default)]
struct ChannelState {
    closed: bool,
    /// Declared queues and their consumer, once one is attached
    queues: HashMap<String, Option<mpsc::UnboundedSender<Delivery>>>,
    bindings: Vec<Binding>,
    acked: u64,
    nacked: u64,
    /// Tag and requeue flag of the latest nack
    last_nack: Option<(u64, bool)>,
}

/// Topic exchange living in the current process.
///
/// Each queue receives a published message at most once, however many of its
/// bindings match. Messages published to a queue without a consumer are dropped.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    state: Mutex<ChannelState>,
    next_tag: AtomicU64,
    fail_binds: AtomicBool,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a message and returns the number of queues it reached.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message_type: Option<&str>,
        payload: Vec<u8>,
    ) -> usize {
        let state = self.state.lock();
        if state.closed {
            return 0;
        }

        let mut delivered = 0;
        for (queue, consumer) in &state.queues {
            let matched = state.bindings.iter().any(|b| {
                &b.queue == queue && b.exchange == exchange && topic_matches(&b.routing_key, routing_key)
            });
            let Some(consumer) = consumer.as_ref().filter(|_| matched) else {
                continue;
            };

            let delivery = Delivery {
                delivery_tag: self.next_tag.fetch_add(1, Ordering::SeqCst) + 1,
                routing_key: routing_key.to_string(),
                message_type: message_type.map(str::to_string),
                payload: payload.clone(),
            };
            if consumer.send(delivery).is_ok() {
                delivered += 1;
            }
        }
        debug!(routing_key, delivered, "published message");
        delivered
    }

    /// Routing keys currently bound for `queue`.
    pub fn bindings(&self, queue: &str) -> Vec<String> {
        self.state
            .lock()
            .bindings
            .iter()
            .filter(|b| b.queue == queue)
            .map(|b| b.routing_key.clone())
            .collect()
    }

    /// Names of all declared queues.
    pub fn queues(&self) -> Vec<String> {
        self.state.lock().queues.keys().cloned().collect()
    }

    /// Deliveries acknowledged since the channel was created.
    pub fn acked_count(&self) -> u64 {
        self.state.lock().acked
    }

    /// Deliveries rejected since the channel was created.
    pub fn nacked_count(&self) -> u64 {
        self.state.lock().nacked
    }

    pub fn last_nack(&self) -> Option<(u64, bool)> {
        self.state.lock().last_nack
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Makes bind and unbind calls fail, as a broken broker would.
    pub fn set_fail_binds(&self, fail: bool) {
        self.fail_binds.store(fail, Ordering::SeqCst);
    }

    fn check_binds(&self) -> Result<(), TransportError> {
        if self.fail_binds.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("binding refused".to_string()));
        }
        Ok(())
    }
}

fn open(state: &ChannelState) -> Result<(), TransportError> {
    if state.closed {
        Err(TransportError::ChannelClosed)
    } else {
        Ok(())
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn assert_queue(&self, name: &str) -> Result<String, TransportError> {
        let mut state = self.state.lock();
        open(&state)?;

        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4())
        } else {
            name.to_string()
        };
        state.queues.entry(name.clone()).or_insert(None);
        Ok(name)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        self.check_binds()?;
        let mut state = self.state.lock();
        open(&state)?;
        if !state.queues.contains_key(queue) {
            return Err(TransportError::UnknownQueue(queue.to_string()));
        }

        let binding = Binding {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        };
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn unbind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        self.check_binds()?;
        let mut state = self.state.lock();
        open(&state)?;

        state.bindings.retain(|b| {
            !(b.queue == queue && b.exchange == exchange && b.routing_key == routing_key)
        });
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<mpsc::UnboundedReceiver<Delivery>, TransportError> {
        let mut state = self.state.lock();
        open(&state)?;

        let consumer = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::UnknownQueue(queue.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        *consumer = Some(tx);
        Ok(rx)
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        open(&state)?;
        state.acked += 1;
        debug!(delivery_tag, "acked");
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        open(&state)?;
        state.nacked += 1;
        state.last_nack = Some((delivery_tag, requeue));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.closed = true;
        state.queues.clear();
        state.bindings.clear();
        Ok(())
    }
}
