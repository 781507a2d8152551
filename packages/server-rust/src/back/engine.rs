//! Fulfillment engine: the authoritative purchase decision.
//!
//! The whole decision for one request runs inside the product's critical
//! section, so checks and the commit that follows them are atomic per
//! product. The user's history lock nests inside the product lock and is
//! held only for the read and for the increment. Lock order is always
//! product, then user.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flashsale_core::{ClockSource, Dice, Outcome, SaleRequest, SaleResult, TokenSigner};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::pipeline::{send_timeout, Flow, PipelineStage, SendError, SharedReceiver};
use crate::state::{HistoryStore, ProductCatalog};
use crate::telemetry;

pub struct FulfillmentEngine {
    catalog: Arc<ProductCatalog>,
    history: Arc<HistoryStore>,
    signer: TokenSigner,
    clock: Arc<dyn ClockSource>,
    dice: Arc<dyn Dice>,
}

impl FulfillmentEngine {
    #[must_use]
    pub fn new(
        catalog: Arc<ProductCatalog>,
        history: Arc<HistoryStore>,
        signer: TokenSigner,
        clock: Arc<dyn ClockSource>,
        dice: Arc<dyn Dice>,
    ) -> Self {
        Self {
            catalog,
            history,
            signer,
            clock,
            dice,
        }
    }

    /// Decides one request. Never fails; every path yields an outcome.
    ///
    /// 1. unknown product: `not_found`
    /// 2. product closed: `sold_out`
    /// 3. user at the per-person limit: `already_bought`
    /// 4. inventory exhausted: `sold_out`, product moves to `SoldOut`
    /// 5. random draw above `buy_rate`: `retry`
    /// 6. otherwise commit and mint a token: `success`
    pub fn decide(&self, request: &SaleRequest) -> SaleResult {
        let Some(slot) = self.catalog.slot(request.product_id) else {
            return SaleResult::rejected(request, Outcome::NotFound);
        };
        let mut slot = slot.lock();

        if slot.product().status.is_closed() {
            return SaleResult::rejected(request, Outcome::SoldOut);
        }

        let history = self.history.user(request.user_id);
        let bought = history.lock().count(request.product_id);
        if bought >= slot.product().per_person_limit {
            return SaleResult::rejected(request, Outcome::AlreadyBought);
        }

        if slot.sold() >= slot.product().total {
            slot.mark_sold_out();
            return SaleResult::rejected(request, Outcome::SoldOut);
        }

        if self.dice.roll() > slot.product().buy_rate {
            return SaleResult::rejected(request, Outcome::Retry);
        }

        history.lock().add(request.product_id, 1);
        slot.record_sale();
        if slot.sold() >= slot.product().total {
            slot.mark_sold_out();
        }

        let minted_at = self.clock.now_secs();
        let token = self
            .signer
            .mint(request.user_id, request.product_id, minted_at, &slot.product().secret);
        SaleResult::granted(request, token, minted_at)
    }

    #[must_use]
    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    #[must_use]
    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }
}

/// Handler stage: decides requests and passes results to the writers.
pub struct Handler {
    rx: SharedReceiver<SaleRequest>,
    engine: Arc<FulfillmentEngine>,
    tx: mpsc::Sender<SaleResult>,
    handoff_timeout: Duration,
}

impl Handler {
    #[must_use]
    pub fn new(
        rx: SharedReceiver<SaleRequest>,
        engine: Arc<FulfillmentEngine>,
        tx: mpsc::Sender<SaleResult>,
        handoff_timeout: Duration,
    ) -> Self {
        Self {
            rx,
            engine,
            tx,
            handoff_timeout,
        }
    }
}

#[async_trait]
impl PipelineStage for Handler {
    fn name(&self) -> &'static str {
        "handle"
    }

    async fn step(&self, _worker: usize) -> Flow {
        let Some(request) = self.rx.recv().await else {
            return Flow::Stop;
        };

        let result = self.engine.decide(&request);
        telemetry::record_outcome("core", result.outcome);
        debug!(
            request_id = request.request_id,
            key = %request.key(),
            outcome = result.outcome.as_str(),
            "request decided"
        );

        match send_timeout(&self.tx, result, self.handoff_timeout).await {
            Ok(()) => Flow::Continue,
            Err(SendError::Timeout) => {
                warn!(request_id = request.request_id, "writer channel full, dropping result");
                telemetry::record_drop("handle", "handoff_timeout");
                Flow::Continue
            }
            Err(SendError::Disconnected) => Flow::Stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use flashsale_core::{FixedDice, ManualClock, Product, ProductStatus};
    use proptest::prelude::*;

    use super::*;
    use crate::pipeline::bounded;

    const NOW: u64 = 1_700_000_000;

    fn product(id: u64, total: u64, limit: u32, buy_rate: f64) -> Product {
        Product {
            product_id: id,
            start_time: 0,
            end_time: i64::MAX,
            status: ProductStatus::OnSale,
            total,
            per_person_limit: limit,
            buy_rate,
            secret: "p-secret".to_string(),
        }
    }

    fn engine_with(products: Vec<Product>, dice: f64) -> FulfillmentEngine {
        let catalog = Arc::new(ProductCatalog::new());
        for p in products {
            catalog.upsert(p).unwrap();
        }
        FulfillmentEngine::new(
            catalog,
            Arc::new(HistoryStore::new()),
            TokenSigner::new("server-secret"),
            Arc::new(ManualClock::at_secs(NOW)),
            Arc::new(FixedDice(dice)),
        )
    }

    fn request(user_id: u64, product_id: u64) -> SaleRequest {
        SaleRequest {
            request_id: user_id * 1_000 + product_id,
            user_id,
            product_id,
            client_ip: "ip".to_string(),
            submitted_at_ms: NOW * 1_000,
        }
    }

    #[test]
    fn last_unit_goes_to_exactly_one_user() {
        let engine = engine_with(vec![product(1, 1, 1, 1.0)], 0.0);

        let first = engine.decide(&request(10, 1));
        assert_eq!(first.outcome, Outcome::Success);
        let token = first.token.clone().unwrap();
        assert!(!token.is_empty());
        assert_eq!(first.token_time, NOW as i64);

        let second = engine.decide(&request(11, 1));
        assert_eq!(second.outcome, Outcome::SoldOut);
        assert!(second.token.is_none());
    }

    #[test]
    fn user_at_limit_is_already_bought_and_stock_is_unchanged() {
        let engine = engine_with(vec![product(1, 10, 1, 1.0)], 0.0);
        assert_eq!(engine.decide(&request(10, 1)).outcome, Outcome::Success);
        let sold_before = engine.catalog.view(1).unwrap().sold;

        assert_eq!(engine.decide(&request(10, 1)).outcome, Outcome::AlreadyBought);
        assert_eq!(engine.catalog.view(1).unwrap().sold, sold_before);
        assert_eq!(engine.history().bought(10, 1), 1);
    }

    #[test]
    fn unknown_and_closed_products() {
        let mut closed = product(2, 10, 1, 1.0);
        closed.status = ProductStatus::ForceClosed;
        let engine = engine_with(vec![closed], 0.0);

        assert_eq!(engine.decide(&request(1, 9)).outcome, Outcome::NotFound);
        assert_eq!(engine.decide(&request(1, 2)).outcome, Outcome::SoldOut);
        assert_eq!(engine.history().bought(1, 2), 0);
    }

    #[test]
    fn exhausted_stock_transitions_status() {
        let engine = engine_with(vec![product(1, 2, 5, 1.0)], 0.0);
        engine.decide(&request(1, 1));
        assert_eq!(
            engine.catalog.view(1).unwrap().product.status,
            ProductStatus::OnSale
        );
        engine.decide(&request(2, 1));
        let view = engine.catalog.view(1).unwrap();
        assert_eq!(view.sold, 2);
        assert_eq!(view.product.status, ProductStatus::SoldOut);
    }

    #[test]
    fn losing_draw_is_retry_without_mutation() {
        let engine = engine_with(vec![product(1, 10, 1, 0.3)], 0.5);
        assert_eq!(engine.decide(&request(1, 1)).outcome, Outcome::Retry);
        assert_eq!(engine.catalog.view(1).unwrap().sold, 0);
        assert_eq!(engine.history().bought(1, 1), 0);
    }

    #[test]
    fn minted_token_verifies() {
        let engine = engine_with(vec![product(1, 10, 1, 1.0)], 0.0);
        let result = engine.decide(&request(4, 1));
        let token = result.token.unwrap();
        assert!(engine
            .signer()
            .verify(&token, 4, 1, result.token_time, "p-secret"));
        assert!(!engine
            .signer()
            .verify(&token, 5, 1, result.token_time, "p-secret"));
    }

    #[test]
    fn concurrent_handlers_never_oversell() {
        let engine = Arc::new(engine_with(vec![product(1, 50, 1, 1.0)], 0.0));
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    (0..100u64)
                        .filter(|i| engine.decide(&request(t * 100 + i, 1)).outcome == Outcome::Success)
                        .count()
                })
            })
            .collect();
        let successes: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(successes, 50);
        assert_eq!(engine.catalog.view(1).unwrap().sold, 50);
    }

    #[tokio::test]
    async fn handler_forwards_results() {
        let engine = Arc::new(engine_with(vec![product(1, 10, 1, 1.0)], 0.0));
        let (req_tx, req_rx) = bounded(4);
        let (res_tx, res_rx) = bounded(4);
        let handler = Handler::new(req_rx, engine, res_tx, Duration::from_millis(50));

        req_tx.send(request(3, 1)).await.unwrap();
        assert_eq!(handler.step(0).await, Flow::Continue);
        assert_eq!(res_rx.recv().await.unwrap().outcome, Outcome::Success);

        drop(req_tx);
        assert_eq!(handler.step(0).await, Flow::Stop);
    }

    #[tokio::test]
    async fn handler_drops_result_when_writers_are_stuck() {
        let engine = Arc::new(engine_with(vec![product(1, 10, 5, 1.0)], 0.0));
        let (req_tx, req_rx) = bounded(4);
        let (res_tx, _res_rx) = bounded::<SaleResult>(1);
        let handler = Handler::new(req_rx, engine, res_tx, Duration::from_millis(10));

        req_tx.send(request(1, 1)).await.unwrap();
        req_tx.send(request(2, 1)).await.unwrap();
        assert_eq!(handler.step(0).await, Flow::Continue);
        assert_eq!(handler.step(0).await, Flow::Continue);
    }

    proptest! {
        #[test]
        fn no_oversell_and_limit_respected(
            total in 0u64..20,
            limit in 1u32..4,
            requests in proptest::collection::vec((0u64..8, 1u64..3), 0..200),
        ) {
            let engine = engine_with(vec![product(1, total, limit, 1.0), product(2, total, limit, 1.0)], 0.0);
            let mut per_user = std::collections::HashMap::new();
            let mut per_product = [0u64; 2];

            for (user, prod) in requests {
                if engine.decide(&request(user, prod)).outcome == Outcome::Success {
                    *per_user.entry((user, prod)).or_insert(0u32) += 1;
                    per_product[usize::try_from(prod - 1).unwrap()] += 1;
                }
            }

            for sold in per_product {
                prop_assert!(sold <= total);
            }
            for count in per_user.values() {
                prop_assert!(*count <= limit);
            }
        }
    }
}
