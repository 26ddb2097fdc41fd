//! Per-client bounded delivery queue
//!
//! Messages that could not be written to a client wait here until the client
//! registers again. Each client's queue is capped; when full, the oldest
//! message is evicted to make room.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::ids::ClientId;
use crate::transport::OutboundMessage;

/// An undelivered message
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,

    /// Delivery attempts made so far
    pub attempts: u32,
}

impl QueuedMessage {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }

    /// Stamp the next attempt and build the message to write
    pub fn next_attempt(&mut self) -> OutboundMessage {
        self.attempts += 1;
        OutboundMessage {
            payload: self.payload.clone(),
            attempt: self.attempts,
            queued_at: Some(self.enqueued_at),
        }
    }
}

#[derive(Debug)]
pub struct DeliveryQueue {
    capacity: usize,
    queues: HashMap<ClientId, VecDeque<QueuedMessage>>,
    evicted: u64,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: HashMap::new(),
            evicted: 0,
        }
    }

    /// Append a message, evicting the oldest one if the client's queue is full
    pub fn enqueue(&mut self, client_id: &ClientId, message: QueuedMessage) {
        let queue = self.queues.entry(client_id.clone()).or_default();
        queue.push_back(message);
        let dropped = Self::trim(queue, self.capacity);
        if dropped > 0 {
            warn!("{client_id}: delivery queue full, evicted {dropped} oldest message(s)");
            self.evicted += dropped as u64;
        }
    }

    /// Put messages back at the head of the queue, ahead of anything queued since
    ///
    /// Used when a drain fails part-way: the failed message and everything
    /// after it keep their original order.
    pub fn requeue_front(&mut self, client_id: &ClientId, messages: VecDeque<QueuedMessage>) {
        if messages.is_empty() {
            return;
        }

        let queue = self.queues.entry(client_id.clone()).or_default();
        let mut merged = messages;
        merged.append(queue);
        *queue = merged;

        let dropped = Self::trim(queue, self.capacity);
        if dropped > 0 {
            warn!("{client_id}: requeue exceeded capacity, evicted {dropped} oldest message(s)");
            self.evicted += dropped as u64;
        }
    }

    /// Take every pending message for a client, oldest first
    pub fn take(&mut self, client_id: &ClientId) -> VecDeque<QueuedMessage> {
        let taken = self.queues.remove(client_id).unwrap_or_default();
        if !taken.is_empty() {
            debug!("{client_id}: took {} queued message(s)", taken.len());
        }
        taken
    }

    pub fn len(&self, client_id: &ClientId) -> usize {
        self.queues.get(client_id).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, client_id: &ClientId) -> bool {
        self.len(client_id) == 0
    }

    /// Messages pending across all clients
    pub fn total(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Messages dropped because a queue was full
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn trim(queue: &mut VecDeque<QueuedMessage>, capacity: usize) -> usize {
        let excess = queue.len().saturating_sub(capacity);
        queue.drain(..excess);
        excess
    }
}
