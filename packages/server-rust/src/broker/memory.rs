//! In-process [`BrokerQueue`] backed by [`DashMap`] of FIFO queues.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{BrokerError, BrokerQueue};

#[derive(Debug, Default)]
struct Queue {
    items: Mutex<VecDeque<Vec<u8>>>,
    ready: Notify,
}

/// Named FIFO queues shared by every clone of the broker.
///
/// Queues are created on first use. The broker can be switched offline to
/// simulate an outage; while offline every operation fails with
/// [`BrokerError::Unavailable`].
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    queues: Arc<DashMap<String, Arc<Queue>>>,
    online: Arc<AtomicBool>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Takes the broker offline (`false`) or back online (`true`).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of payloads waiting in `queue`.
    #[must_use]
    pub fn len(&self, queue: &str) -> usize {
        self.queues
            .get(queue)
            .map_or(0, |q| q.value().items.lock().len())
    }

    #[must_use]
    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    fn queue(&self, name: &str) -> Arc<Queue> {
        self.queues
            .entry(name.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn check_online(&self) -> Result<(), BrokerError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("memory broker offline".to_string()))
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerQueue for MemoryBroker {
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.check_online()?;
        let q = self.queue(queue);
        q.items.lock().push_back(payload);
        q.ready.notify_one();
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<Vec<u8>>, BrokerError> {
        self.check_online()?;
        let q = self.queue(queue);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking so a push in between is not missed.
            let notified = q.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = q.items.lock().pop_front() {
                return Ok(Some(item));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
            self.check_online()?;
        }
    }
}
