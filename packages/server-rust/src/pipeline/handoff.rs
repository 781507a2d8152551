//! Bounded hand-offs between pipeline stages.
//!
//! Every stage-to-stage send goes through [`send_timeout`], so a slow consumer
//! turns into dropped work at the producer instead of an unbounded wait.
//! Consumers that run as a pool share one receiver through [`SharedReceiver`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

/// Error returned when a hand-off does not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The channel stayed full for the whole timeout.
    #[error("hand-off timed out")]
    Timeout,
    /// The receiving stage is gone.
    #[error("receiving stage closed")]
    Disconnected,
}

/// Sends `item`, waiting at most `timeout` for channel capacity.
///
/// # Errors
///
/// Returns [`SendError::Timeout`] if the channel remained full, or
/// [`SendError::Disconnected`] if the receiver was dropped.
pub async fn send_timeout<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    timeout: Duration,
) -> Result<(), SendError> {
    match tokio::time::timeout(timeout, tx.send(item)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(SendError::Disconnected),
        Err(_) => Err(SendError::Timeout),
    }
}

/// A bounded channel receiver drained by several workers.
///
/// Only one worker waits inside `recv` at a time; the rest queue on the
/// mutex. Both waits are cancel-safe.
#[derive(Debug)]
pub struct SharedReceiver<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> SharedReceiver<T> {
    #[must_use]
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rx)),
        }
    }

    /// Receives the next item, or `None` once every sender is dropped.
    pub async fn recv(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Creates a bounded channel whose receiver can be shared by a pool.
#[must_use]
pub fn bounded<T>(capacity: usize) -> (mpsc::Sender<T>, SharedReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, SharedReceiver::new(rx))
}
