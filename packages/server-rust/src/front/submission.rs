//! Dispatchers: submission channel -> request queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flashsale_core::{envelope, ClockSource, SaleRequest};
use tracing::{error, warn};

use crate::broker::BrokerQueue;
use crate::pipeline::{Flow, PipelineStage, SharedReceiver};
use crate::telemetry;

/// Publishes admitted requests onto the request queue.
///
/// A failed push is retried every `retry_interval` until it succeeds or the
/// request is older than `give_up_after`, at which point the caller has
/// stopped waiting and the request is dropped.
pub struct Dispatcher {
    rx: SharedReceiver<SaleRequest>,
    broker: Arc<dyn BrokerQueue>,
    queue: String,
    clock: Arc<dyn ClockSource>,
    give_up_after: Duration,
    retry_interval: Duration,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        rx: SharedReceiver<SaleRequest>,
        broker: Arc<dyn BrokerQueue>,
        queue: String,
        clock: Arc<dyn ClockSource>,
        give_up_after: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            rx,
            broker,
            queue,
            clock,
            give_up_after,
            retry_interval,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn is_stale(&self, request: &SaleRequest) -> bool {
        request.age_ms(self.clock.now_millis()) >= self.give_up_after.as_millis() as u64
    }

    async fn publish(&self, request: &SaleRequest, payload: Vec<u8>) {
        loop {
            match self.broker.push(&self.queue, payload.clone()).await {
                Ok(()) => return,
                Err(e) if self.is_stale(request) => {
                    error!(
                        request_id = request.request_id,
                        key = %request.key(),
                        error = %e,
                        "giving up on request after repeated broker failures"
                    );
                    telemetry::record_drop("dispatch", "broker_error");
                    return;
                }
                Err(e) => {
                    warn!(request_id = request.request_id, error = %e, "request push failed, retrying");
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }
}

#[async_trait]
impl PipelineStage for Dispatcher {
    fn name(&self) -> &'static str {
        "dispatch"
    }

    async fn step(&self, _worker: usize) -> Flow {
        let Some(request) = self.rx.recv().await else {
            return Flow::Stop;
        };
        match envelope::encode(&request) {
            Ok(payload) => self.publish(&request, payload).await,
            Err(e) => {
                error!(request_id = request.request_id, error = %e, "failed to encode request");
                telemetry::record_drop("dispatch", "encode");
            }
        }
        Flow::Continue
    }
}
