//! Writers: result channel -> reply queue.

use std::sync::Arc;

use async_trait::async_trait;
use flashsale_core::{envelope, SaleResult};
use tracing::error;

use crate::broker::BrokerQueue;
use crate::pipeline::{Flow, PipelineStage, SharedReceiver};
use crate::telemetry;

/// Publishes results; a failed push is logged and the result dropped.
pub struct Writer {
    rx: SharedReceiver<SaleResult>,
    broker: Arc<dyn BrokerQueue>,
    queue: String,
}

impl Writer {
    #[must_use]
    pub fn new(rx: SharedReceiver<SaleResult>, broker: Arc<dyn BrokerQueue>, queue: String) -> Self {
        Self { rx, broker, queue }
    }
}

#[async_trait]
impl PipelineStage for Writer {
    fn name(&self) -> &'static str {
        "write"
    }

    async fn step(&self, _worker: usize) -> Flow {
        let Some(result) = self.rx.recv().await else {
            return Flow::Stop;
        };

        let payload = match envelope::encode(&result) {
            Ok(payload) => payload,
            Err(e) => {
                error!(request_id = result.request_id, error = %e, "failed to encode result");
                telemetry::record_drop("write", "encode");
                return Flow::Continue;
            }
        };
        if let Err(e) = self.broker.push(&self.queue, payload).await {
            error!(request_id = result.request_id, error = %e, "reply push failed, dropping result");
            telemetry::record_drop("write", "broker_error");
        }
        Flow::Continue
    }
}
