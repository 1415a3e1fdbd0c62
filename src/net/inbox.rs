//! Bounded mailbox between the network task and the render thread
//!
//! Uses crossbeam-channel so any number of receive handlers can push raw
//! message buffers without blocking; the thread that owns the dispatcher
//! drains everything pending once per frame.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::metrics::Metrics;

/// Bounded inbox of encoded messages
pub struct Inbox {
    /// Cloned into each receive handler
    sender: Sender<Vec<u8>>,
    /// Drained by the dispatcher's owner
    receiver: Receiver<Vec<u8>>,
    capacity: usize,
    metrics: Option<Arc<Metrics>>,
}

impl Inbox {
    /// Create an inbox holding at most `capacity` pending messages
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
            metrics: None,
        }
    }

    /// Create an inbox whose senders count dropped messages
    pub fn with_metrics(capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            metrics: Some(metrics),
            ..Self::new(capacity)
        }
    }

    /// New sender handle for a receive handler
    pub fn sender(&self) -> InboxSender {
        InboxSender {
            sender: self.sender.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Take every pending message in arrival order
    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Clonable sender handle
#[derive(Clone)]
pub struct InboxSender {
    sender: Sender<Vec<u8>>,
    metrics: Option<Arc<Metrics>>,
}

impl InboxSender {
    /// Push a message without blocking. When the inbox is full the new
    /// message is dropped.
    #[inline]
    pub fn try_send(&self, data: Vec<u8>) -> Result<(), InboxError> {
        self.sender.try_send(data).map_err(|e| match e {
            TrySendError::Full(_) => {
                if let Some(metrics) = &self.metrics {
                    metrics.inbox_drops.fetch_add(1, Ordering::Relaxed);
                }
                InboxError::Full
            }
            TrySendError::Disconnected(_) => InboxError::Disconnected,
        })
    }
}

/// Inbox errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InboxError {
    /// Inbox is full (backpressure)
    #[error("inbox full")]
    Full,
    /// The inbox was dropped
    #[error("inbox disconnected")]
    Disconnected,
}
