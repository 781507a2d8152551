//! Back tier: intake, fulfillment, result publishing.
//!
//! ```text
//! request queue ─► Intake ─► handler channel ─► Handler ─► writer channel ─► Writer ─► reply queue
//! ```

pub mod engine;
pub mod intake;
pub mod writer;

use std::sync::Arc;

use flashsale_core::TokenSigner;
use tokio::sync::watch;
use tracing::info;

pub use engine::{FulfillmentEngine, Handler};
pub use intake::{Intake, IntakeTimeouts};
pub use writer::Writer;

use crate::broker::BrokerQueue;
use crate::config::SaleConfig;
use crate::pipeline::{bounded, WorkerPool};
use crate::state::{HistoryStore, SaleState};

/// A running back tier.
pub struct CoreTier {
    engine: Arc<FulfillmentEngine>,
    shutdown_tx: watch::Sender<bool>,
    readers: WorkerPool,
    handlers: WorkerPool,
    writers: WorkerPool,
}

impl CoreTier {
    /// Starts readers, handlers and writers over `broker`.
    ///
    /// Must be called from inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if `config.token_secret` is empty, since tokens
    /// minted under an empty secret can be reproduced by anyone.
    pub fn start(config: &SaleConfig, broker: Arc<dyn BrokerQueue>, state: &SaleState) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !config.token_secret.is_empty(),
            "token secret must be set to run the core tier"
        );

        let engine = Arc::new(FulfillmentEngine::new(
            Arc::clone(&state.catalog),
            Arc::new(HistoryStore::new()),
            TokenSigner::new(&config.token_secret),
            Arc::clone(&state.clock),
            Arc::clone(&state.dice),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle_tx, handle_rx) = bounded(config.channels.read_to_handle);
        let (write_tx, write_rx) = bounded(config.channels.handle_to_write);

        let intake = Intake::new(
            Arc::clone(&broker),
            config.queues.request.clone(),
            handle_tx,
            Arc::clone(&state.clock),
            IntakeTimeouts {
                max_age: config.max_request_wait_timeout,
                handoff: config.core_wait_result_timeout,
                pop: config.broker_pop_timeout,
                retry: config.broker_retry_interval,
            },
        );
        let handler = Handler::new(
            handle_rx,
            Arc::clone(&engine),
            write_tx,
            config.send_to_write_chan_timeout,
        );
        let writer = Writer::new(write_rx, broker, config.queues.reply.clone());

        let readers = WorkerPool::spawn(Arc::new(intake), config.pools.core_readers, &shutdown_rx);
        let handlers = WorkerPool::spawn(Arc::new(handler), config.pools.core_handlers, &shutdown_rx);
        let writers = WorkerPool::spawn(Arc::new(writer), config.pools.core_writers, &shutdown_rx);

        info!(
            readers = readers.len(),
            handlers = handlers.len(),
            writers = writers.len(),
            "core tier started"
        );
        Ok(Self {
            engine,
            shutdown_tx,
            readers,
            handlers,
            writers,
        })
    }

    #[must_use]
    pub fn engine(&self) -> Arc<FulfillmentEngine> {
        Arc::clone(&self.engine)
    }

    /// Signals every worker to stop and waits for them, upstream first.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        self.readers.join().await;
        self.handlers.join().await;
        self.writers.join().await;
        info!("core tier stopped");
    }
}
