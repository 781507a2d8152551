//! Broker queues: the only channel between the front and back tier.
//!
//! A broker provides named FIFO queues with `push` and a blocking `pop` that
//! gives up after a timeout. Two implementations ship with the server:
//!
//! - [`MemoryBroker`]: in-process queues for tests and standalone mode
//! - `RedisBroker` (feature `redis`): Redis lists via `LPUSH` / `BRPOP`

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryBroker;
#[cfg(feature = "redis")]
pub use self::redis::RedisBroker;

/// Errors returned by broker operations.
///
/// All of them are transient from the pipeline's point of view: readers retry,
/// writers log and drop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("broker command failed on queue '{queue}': {reason}")]
    Command { queue: String, reason: String },
}

/// A durable queue service with blocking pop.
#[async_trait]
pub trait BrokerQueue: Send + Sync {
    /// Appends a payload to the tail of `queue`.
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Removes the payload at the head of `queue`, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` if nothing arrived in time.
    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<Vec<u8>>, BrokerError>;
}
