//! Reply readers: reply queue -> correlation table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flashsale_core::{envelope, SaleResult};
use tracing::{debug, warn};

use super::correlation::CorrelationTable;
use crate::broker::BrokerQueue;
use crate::pipeline::{Flow, PipelineStage};
use crate::telemetry;

/// Pops results and hands each one to the call that is waiting for it.
pub struct ReplyReader {
    broker: Arc<dyn BrokerQueue>,
    queue: String,
    table: Arc<CorrelationTable>,
    pop_timeout: Duration,
    retry_interval: Duration,
}

impl ReplyReader {
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerQueue>,
        queue: String,
        table: Arc<CorrelationTable>,
        pop_timeout: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            broker,
            queue,
            table,
            pop_timeout,
            retry_interval,
        }
    }

    fn route(&self, payload: &[u8]) {
        let result: SaleResult = match envelope::decode(payload) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "discarding malformed reply");
                telemetry::record_drop("reply", "decode");
                return;
            }
        };

        let request_id = result.request_id;
        let key = result.key();
        if !self.table.deliver(result) {
            debug!(request_id, %key, "reply for a call that is no longer waiting");
            telemetry::record_drop("reply", "no_waiter");
        }
    }
}

#[async_trait]
impl PipelineStage for ReplyReader {
    fn name(&self) -> &'static str {
        "reply"
    }

    async fn step(&self, _worker: usize) -> Flow {
        match self.broker.pop(&self.queue, self.pop_timeout).await {
            Ok(Some(payload)) => self.route(&payload),
            Ok(None) => {}
            Err(e) => {
                warn!(queue = %self.queue, error = %e, "reply pop failed");
                tokio::time::sleep(self.retry_interval).await;
            }
        }
        Flow::Continue
    }
}
