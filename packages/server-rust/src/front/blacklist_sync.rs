//! Blacklist sync: broker queues -> in-memory blacklist.
//!
//! Entries are plain UTF-8 strings, one per queue item. User ids are applied
//! as they arrive; IPs are collected and applied in batches.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flashsale_core::UserId;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::broker::BrokerQueue;
use crate::pipeline::{Flow, PipelineStage};
use crate::state::Blacklist;

/// Queue handle shared by both sync stages.
pub struct SyncSource {
    pub broker: Arc<dyn BrokerQueue>,
    pub queue: String,
    pub pop_timeout: Duration,
    pub retry_interval: Duration,
}

impl SyncSource {
    /// Pops one entry as a trimmed string; `None` on timeout, error, or bad UTF-8.
    async fn next_entry(&self) -> Option<String> {
        match self.broker.pop(&self.queue, self.pop_timeout).await {
            Ok(Some(payload)) => match String::from_utf8(payload) {
                Ok(entry) => Some(entry.trim().to_string()),
                Err(_) => {
                    warn!(queue = %self.queue, "skipping non-UTF-8 blacklist entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(queue = %self.queue, error = %e, "blacklist pop failed");
                tokio::time::sleep(self.retry_interval).await;
                None
            }
        }
    }
}

/// Adds blacklisted user ids one at a time.
pub struct IdBlacklistSync {
    source: SyncSource,
    blacklist: Arc<Blacklist>,
}

impl IdBlacklistSync {
    #[must_use]
    pub fn new(source: SyncSource, blacklist: Arc<Blacklist>) -> Self {
        Self { source, blacklist }
    }
}

#[async_trait]
impl PipelineStage for IdBlacklistSync {
    fn name(&self) -> &'static str {
        "id_blacklist_sync"
    }

    async fn step(&self, _worker: usize) -> Flow {
        if let Some(entry) = self.source.next_entry().await {
            match entry.parse::<UserId>() {
                Ok(user_id) => {
                    self.blacklist.add_user(user_id);
                    debug!(user_id, "user blacklisted");
                }
                Err(_) => warn!(entry = %entry, "skipping malformed user id"),
            }
        }
        Flow::Continue
    }
}

struct IpBatch {
    pending: Vec<String>,
    last_flush: Instant,
}

/// Adds blacklisted IPs once the batch exceeds `batch_size` or
/// `flush_interval` has passed since the previous flush.
pub struct IpBlacklistSync {
    source: SyncSource,
    blacklist: Arc<Blacklist>,
    batch_size: usize,
    flush_interval: Duration,
    batch: Mutex<IpBatch>,
}

impl IpBlacklistSync {
    #[must_use]
    pub fn new(source: SyncSource, blacklist: Arc<Blacklist>, batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            source,
            blacklist,
            batch_size,
            flush_interval,
            batch: Mutex::new(IpBatch {
                pending: Vec::new(),
                last_flush: Instant::now(),
            }),
        }
    }

    /// IPs received but not yet applied.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.batch.lock().pending.len()
    }
}

#[async_trait]
impl PipelineStage for IpBlacklistSync {
    fn name(&self) -> &'static str {
        "ip_blacklist_sync"
    }

    async fn step(&self, _worker: usize) -> Flow {
        let entry = self.source.next_entry().await;

        let mut batch = self.batch.lock();
        if let Some(ip) = entry.filter(|ip| !ip.is_empty()) {
            batch.pending.push(ip);
        }
        if batch.pending.len() > self.batch_size || batch.last_flush.elapsed() >= self.flush_interval {
            let flushed = std::mem::take(&mut batch.pending);
            batch.last_flush = Instant::now();
            if !flushed.is_empty() {
                debug!(count = flushed.len(), "ip blacklist batch applied");
                self.blacklist.add_ips(flushed);
            }
        }
        Flow::Continue
    }
}
