//! Readers: request queue -> handler channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flashsale_core::{envelope, ClockSource, SaleRequest};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::broker::BrokerQueue;
use crate::pipeline::{send_timeout, Flow, PipelineStage, SendError};
use crate::telemetry;

/// Pops requests, drops the ones that waited too long, and forwards the rest.
pub struct Intake {
    broker: Arc<dyn BrokerQueue>,
    queue: String,
    tx: mpsc::Sender<SaleRequest>,
    clock: Arc<dyn ClockSource>,
    max_age: Duration,
    handoff_timeout: Duration,
    pop_timeout: Duration,
    retry_interval: Duration,
}

/// Timing knobs of the intake stage.
#[derive(Debug, Clone, Copy)]
pub struct IntakeTimeouts {
    /// Requests at least this old are dropped.
    pub max_age: Duration,
    pub handoff: Duration,
    pub pop: Duration,
    pub retry: Duration,
}

impl Intake {
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerQueue>,
        queue: String,
        tx: mpsc::Sender<SaleRequest>,
        clock: Arc<dyn ClockSource>,
        timeouts: IntakeTimeouts,
    ) -> Self {
        Self {
            broker,
            queue,
            tx,
            clock,
            max_age: timeouts.max_age,
            handoff_timeout: timeouts.handoff,
            pop_timeout: timeouts.pop,
            retry_interval: timeouts.retry,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn is_expired(&self, request: &SaleRequest) -> bool {
        request.age_ms(self.clock.now_millis()) >= self.max_age.as_millis() as u64
    }

    async fn forward(&self, payload: &[u8]) -> Flow {
        let request: SaleRequest = match envelope::decode(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "discarding malformed request");
                telemetry::record_drop("intake", "decode");
                return Flow::Continue;
            }
        };

        if self.is_expired(&request) {
            debug!(request_id = request.request_id, key = %request.key(), "dropping expired request");
            telemetry::record_drop("intake", "expired");
            return Flow::Continue;
        }

        let request_id = request.request_id;
        match send_timeout(&self.tx, request, self.handoff_timeout).await {
            Ok(()) => Flow::Continue,
            Err(SendError::Timeout) => {
                warn!(request_id, "handler channel full, dropping request");
                telemetry::record_drop("intake", "handoff_timeout");
                Flow::Continue
            }
            Err(SendError::Disconnected) => Flow::Stop,
        }
    }
}

#[async_trait]
impl PipelineStage for Intake {
    fn name(&self) -> &'static str {
        "intake"
    }

    async fn step(&self, _worker: usize) -> Flow {
        match self.broker.pop(&self.queue, self.pop_timeout).await {
            Ok(Some(payload)) => self.forward(&payload).await,
            Ok(None) => Flow::Continue,
            Err(e) => {
                warn!(queue = %self.queue, error = %e, "request pop failed");
                tokio::time::sleep(self.retry_interval).await;
                Flow::Continue
            }
        }
    }
}
