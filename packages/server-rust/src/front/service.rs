//! Front-tier call boundary and worker lifecycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use flashsale_core::{
    Outcome, Product, ProductError, ProductId, ProductStatus, RequestKey, SaleRequest, SaleResult, UserId,
};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::blacklist_sync::{IdBlacklistSync, IpBlacklistSync, SyncSource};
use super::correlation::CorrelationTable;
use super::gate::AdmissionGate;
use super::limiter::{LimiterSweeper, RateLimiter};
use super::reply::ReplyReader;
use super::submission::Dispatcher;
use crate::broker::BrokerQueue;
use crate::config::SaleConfig;
use crate::error::SaleError;
use crate::pipeline::{bounded, send_timeout, BackgroundWorker, WorkerPool};
use crate::state::{BlacklistSets, SaleState};
use crate::telemetry;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// What a successful purchase call returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fulfillment {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub token: String,
    /// Epoch seconds at which the token was minted.
    pub token_time: i64,
}

impl TryFrom<SaleResult> for Fulfillment {
    type Error = SaleError;

    fn try_from(result: SaleResult) -> Result<Self, SaleError> {
        if let Some(err) = SaleError::from_outcome(result.outcome) {
            return Err(err);
        }
        match result.token {
            Some(token) => Ok(Self {
                user_id: result.user_id,
                product_id: result.product_id,
                token,
                token_time: result.token_time,
            }),
            None => {
                warn!(request_id = result.request_id, "success reply without a token");
                Err(SaleError::ServiceBusy)
            }
        }
    }
}

/// Public view of a product's sale state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleInfo {
    pub product_id: ProductId,
    pub start_time: i64,
    pub end_time: i64,
    pub status: ProductStatus,
    pub started: bool,
    pub ended: bool,
    pub sold_out: bool,
}

impl SaleInfo {
    fn of(product: &Product, now: i64) -> Self {
        Self {
            product_id: product.product_id,
            start_time: product.start_time,
            end_time: product.end_time,
            status: product.status,
            started: !product.not_started(now),
            ended: product.ended(now),
            sold_out: product.status.is_closed(),
        }
    }
}

// ---------------------------------------------------------------------------
// FrontService
// ---------------------------------------------------------------------------

/// The synchronous purchase call on top of the asynchronous pipeline.
pub struct FrontService {
    config: Arc<SaleConfig>,
    state: SaleState,
    gate: AdmissionGate,
    table: Arc<CorrelationTable>,
    submit_tx: mpsc::Sender<SaleRequest>,
    next_request_id: AtomicU64,
}

impl FrontService {
    /// Attempts a purchase of `product_id` for `user_id`.
    ///
    /// Returns within `app_wait_result_timeout` on every path. `cancel` fires
    /// when the client goes away; the call then returns
    /// [`SaleError::ClientClosed`] without waiting for the reply.
    ///
    /// # Errors
    ///
    /// Returns a [`SaleError`] carrying the outcome for every non-success.
    pub async fn sec_kill(
        &self,
        user_id: UserId,
        product_id: ProductId,
        client_ip: &str,
        cancel: CancellationToken,
    ) -> Result<Fulfillment, SaleError> {
        let started = Instant::now();
        let span = info_span!(
            "sec_kill",
            user_id,
            product_id,
            request_id = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let result = self
            .call(user_id, product_id, client_ip, &cancel)
            .instrument(span.clone())
            .await;

        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) => e.outcome(),
        };
        span.record("outcome", outcome.as_str());
        telemetry::record_outcome("app", outcome);
        metrics::histogram!(telemetry::CALL_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        debug!(parent: &span, code = outcome.code(), "sec_kill finished");
        result
    }

    async fn call(
        &self,
        user_id: UserId,
        product_id: ProductId,
        client_ip: &str,
        cancel: &CancellationToken,
    ) -> Result<Fulfillment, SaleError> {
        let wait = self.config.app_wait_result_timeout;
        let deadline = tokio::time::Instant::now() + wait;
        #[allow(clippy::cast_possible_truncation)]
        let timed_out = || SaleError::ProcessTimeout {
            timeout_ms: wait.as_millis() as u64,
        };

        self.gate.admit(user_id, product_id, client_ip)?;

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        tracing::Span::current().record("request_id", request_id);
        let mut registration = self
            .table
            .register(RequestKey::new(user_id, product_id), request_id)?;

        let request = SaleRequest {
            request_id,
            user_id,
            product_id,
            client_ip: client_ip.to_string(),
            submitted_at_ms: self.state.clock.now_millis(),
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SaleError::ClientClosed),
            () = tokio::time::sleep_until(deadline) => return Err(timed_out()),
            sent = send_timeout(&self.submit_tx, request, self.config.submit_timeout) => {
                if let Err(e) = sent {
                    warn!(error = %e, "submission hand-off failed");
                    return Err(SaleError::ServiceBusy);
                }
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SaleError::ClientClosed),
            reply = registration.reply() => match reply {
                Some(result) => Fulfillment::try_from(result),
                None => Err(timed_out()),
            },
            () = tokio::time::sleep_until(deadline) => Err(timed_out()),
        }
    }

    /// Sale window and status of one product.
    ///
    /// # Errors
    ///
    /// Returns [`SaleError::NotFound`] for unknown products.
    pub fn sec_info(&self, product_id: ProductId) -> Result<SaleInfo, SaleError> {
        let view = self.state.catalog.view(product_id).ok_or(SaleError::NotFound)?;
        Ok(SaleInfo::of(&view.product, self.state.clock.now_secs()))
    }

    /// Sale info for every product, ordered by id.
    #[must_use]
    pub fn sec_info_list(&self) -> Vec<SaleInfo> {
        let now = self.state.clock.now_secs();
        self.state
            .catalog
            .list()
            .iter()
            .map(|view| SaleInfo::of(&view.product, now))
            .collect()
    }

    /// Inserts or refreshes a product.
    ///
    /// # Errors
    ///
    /// Returns the validation error for malformed records.
    pub fn upsert_product(&self, product: Product) -> Result<(), ProductError> {
        let product_id = product.product_id;
        self.state.catalog.upsert(product)?;
        info!(product_id, "product upserted");
        Ok(())
    }

    pub fn replace_blacklist(&self, sets: BlacklistSets) {
        info!(users = sets.user_ids.len(), ips = sets.ips.len(), "blacklist replaced");
        self.state.blacklist.replace(sets);
    }

    /// Calls currently waiting for a reply.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn state(&self) -> &SaleState {
        &self.state
    }
}

// ---------------------------------------------------------------------------
// AppTier
// ---------------------------------------------------------------------------

/// A running front tier: the [`FrontService`] plus its worker pools.
pub struct AppTier {
    service: Arc<FrontService>,
    shutdown_tx: watch::Sender<bool>,
    pools: Vec<WorkerPool>,
    sweeper: BackgroundWorker<LimiterSweeper>,
}

impl AppTier {
    /// Starts dispatchers, reply readers, blacklist sync and the limiter sweep.
    ///
    /// Must be called from inside a tokio runtime.
    #[must_use]
    pub fn start(config: &SaleConfig, broker: Arc<dyn BrokerQueue>, state: SaleState) -> Self {
        let config = Arc::new(config.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let limiter = Arc::new(RateLimiter::new(config.rate_limits));
        let gate = AdmissionGate::new(
            Arc::clone(&state.catalog),
            Arc::clone(&state.blacklist),
            Arc::clone(&limiter),
            Arc::clone(&state.clock),
            Arc::clone(&state.dice),
            config.gate_amplification,
        );
        let table = Arc::new(CorrelationTable::new());
        let (submit_tx, submit_rx) = bounded(config.channels.submission);

        let dispatcher = Dispatcher::new(
            submit_rx,
            Arc::clone(&broker),
            config.queues.request.clone(),
            Arc::clone(&state.clock),
            config.app_wait_result_timeout,
            config.broker_retry_interval,
        );
        let reply = ReplyReader::new(
            Arc::clone(&broker),
            config.queues.reply.clone(),
            Arc::clone(&table),
            config.broker_pop_timeout,
            config.broker_retry_interval,
        );
        let source = |queue: &str| SyncSource {
            broker: Arc::clone(&broker),
            queue: queue.to_string(),
            pop_timeout: config.broker_pop_timeout,
            retry_interval: config.broker_retry_interval,
        };
        let id_sync = IdBlacklistSync::new(source(&config.queues.id_blacklist), Arc::clone(&state.blacklist));
        let ip_sync = IpBlacklistSync::new(
            source(&config.queues.ip_blacklist),
            Arc::clone(&state.blacklist),
            config.ip_blacklist_batch,
            config.ip_blacklist_flush_interval,
        );

        let pools = vec![
            WorkerPool::spawn(Arc::new(dispatcher), config.pools.app_dispatchers, &shutdown_rx),
            WorkerPool::spawn(Arc::new(reply), config.pools.app_reply_readers, &shutdown_rx),
            WorkerPool::spawn(Arc::new(id_sync), 1, &shutdown_rx),
            WorkerPool::spawn(Arc::new(ip_sync), 1, &shutdown_rx),
        ];
        let sweeper = BackgroundWorker::start(
            LimiterSweeper::new(limiter, Arc::clone(&state.clock)),
            config.limiter_sweep_interval,
        );

        // Random high half keeps ids from separate processes apart.
        let first_id = u64::from(rand::random::<u32>()) << 32;
        let service = Arc::new(FrontService {
            config: Arc::clone(&config),
            state,
            gate,
            table,
            submit_tx,
            next_request_id: AtomicU64::new(first_id),
        });

        info!(
            dispatchers = config.pools.app_dispatchers,
            reply_readers = config.pools.app_reply_readers,
            "app tier started"
        );
        Self {
            service,
            shutdown_tx,
            pools,
            sweeper,
        }
    }

    #[must_use]
    pub fn service(&self) -> Arc<FrontService> {
        Arc::clone(&self.service)
    }

    /// Signals every worker to stop and waits for them.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        for pool in self.pools {
            pool.join().await;
        }
        self.sweeper.stop().await;
        info!("app tier stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use flashsale_core::{FixedDice, ManualClock};

    use super::*;
    use crate::broker::MemoryBroker;
    use crate::config::{ChannelCapacities, PoolSizes, RateLimits};
    use crate::state::{Blacklist, ProductCatalog};

    const NOW_SECS: u64 = 1_000;

    fn product(id: ProductId, start: i64) -> Product {
        Product {
            product_id: id,
            start_time: start,
            end_time: 5_000,
            status: ProductStatus::OnSale,
            total: 10,
            per_person_limit: 1,
            buy_rate: 1.0,
            secret: String::new(),
        }
    }

    fn state() -> SaleState {
        let catalog = Arc::new(ProductCatalog::new());
        catalog.upsert(product(1, 0)).unwrap();
        catalog.upsert(product(2, 2_000)).unwrap();
        SaleState {
            catalog,
            blacklist: Arc::new(Blacklist::default()),
            clock: Arc::new(ManualClock::at_secs(NOW_SECS)),
            dice: Arc::new(FixedDice(0.0)),
        }
    }

    fn config() -> SaleConfig {
        SaleConfig {
            app_wait_result_timeout: Duration::from_millis(200),
            broker_pop_timeout: Duration::from_millis(20),
            broker_retry_interval: Duration::from_millis(5),
            rate_limits: RateLimits {
                user_per_second: 100,
                user_per_minute: 100,
                ip_per_second: 100,
                ip_per_minute: 100,
            },
            ..SaleConfig::default()
        }
    }

    #[test]
    fn success_without_token_is_not_a_success() {
        let request = SaleRequest {
            request_id: 1,
            user_id: 1,
            product_id: 1,
            client_ip: String::new(),
            submitted_at_ms: 0,
        };
        let mut result = SaleResult::rejected(&request, Outcome::Success);
        result.token = None;
        assert_eq!(Fulfillment::try_from(result), Err(SaleError::ServiceBusy));

        let rejected = SaleResult::rejected(&request, Outcome::AlreadyBought);
        assert_eq!(Fulfillment::try_from(rejected), Err(SaleError::AlreadyBought));
    }

    #[tokio::test]
    async fn gate_rejection_never_reaches_the_broker() {
        let broker = MemoryBroker::new();
        let tier = AppTier::start(&config(), Arc::new(broker.clone()), state());
        let service = tier.service();

        let err = service
            .sec_kill(7, 2, "1.2.3.4", CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, SaleError::NotStarted);
        assert!(broker.is_empty("request_queue"));
        assert_eq!(service.in_flight(), 0);
        tier.stop().await;
    }

    #[tokio::test]
    async fn times_out_without_a_back_tier() {
        let broker = MemoryBroker::new();
        let tier = AppTier::start(&config(), Arc::new(broker.clone()), state());
        let service = tier.service();

        let err = service
            .sec_kill(7, 1, "1.2.3.4", CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, SaleError::ProcessTimeout { timeout_ms: 200 });
        assert_eq!(broker.len("request_queue"), 1);
        assert_eq!(service.in_flight(), 0);
        tier.stop().await;
    }

    #[tokio::test]
    async fn full_submission_channel_reports_service_busy() {
        let broker = MemoryBroker::new();
        broker.set_online(false);
        let config = SaleConfig {
            app_wait_result_timeout: Duration::from_millis(300),
            submit_timeout: Duration::from_millis(20),
            channels: ChannelCapacities {
                submission: 1,
                ..ChannelCapacities::default()
            },
            pools: PoolSizes {
                app_dispatchers: 1,
                ..PoolSizes::default()
            },
            ..config()
        };
        let tier = AppTier::start(&config, Arc::new(broker), state());
        let service = tier.service();

        // One request stalls in the dispatcher's retry loop, the next fills
        // the channel.
        let mut pending = Vec::new();
        for user in [1, 2] {
            let service = Arc::clone(&service);
            pending.push(tokio::spawn(async move {
                service.sec_kill(user, 1, "1.2.3.4", CancellationToken::new()).await
            }));
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let err = service
            .sec_kill(3, 1, "1.2.3.4", CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, SaleError::ServiceBusy);
        assert_eq!(err.outcome(), Outcome::ServiceBusy);
        assert_eq!(service.in_flight(), 2);

        for call in pending {
            assert!(matches!(call.await.unwrap(), Err(SaleError::ProcessTimeout { .. })));
        }
        assert_eq!(service.in_flight(), 0);
        tier.stop().await;
    }

    #[tokio::test]
    async fn cancel_returns_client_closed() {
        let broker = MemoryBroker::new();
        let tier = AppTier::start(&config(), Arc::new(broker), state());
        let service = tier.service();
        let cancel = CancellationToken::new();

        let call = {
            let service = Arc::clone(&service);
            let cancel = cancel.clone();
            tokio::spawn(async move { service.sec_kill(7, 1, "1.2.3.4", cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert_eq!(call.await.unwrap(), Err(SaleError::ClientClosed));
        assert_eq!(service.in_flight(), 0);
        tier.stop().await;
    }

    #[tokio::test]
    async fn concurrent_call_for_same_key_is_rejected() {
        let broker = MemoryBroker::new();
        let tier = AppTier::start(&config(), Arc::new(broker), state());
        let service = tier.service();

        let first = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.sec_kill(7, 1, "1.2.3.4", CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = service
            .sec_kill(7, 1, "5.6.7.8", CancellationToken::new())
            .await;
        assert_eq!(second, Err(SaleError::DuplicateInFlight));

        // The first call still owns its registration and times out normally.
        assert!(matches!(
            first.await.unwrap(),
            Err(SaleError::ProcessTimeout { .. })
        ));
        tier.stop().await;
    }

    #[tokio::test]
    async fn sale_info_reports_window_flags() {
        let tier = AppTier::start(&config(), Arc::new(MemoryBroker::new()), state());
        let service = tier.service();

        let open = service.sec_info(1).unwrap();
        assert!(open.started && !open.ended && !open.sold_out);
        let pending = service.sec_info(2).unwrap();
        assert!(!pending.started);
        assert_eq!(service.sec_info(3), Err(SaleError::NotFound));

        let ids: Vec<ProductId> = service.sec_info_list().iter().map(|i| i.product_id).collect();
        assert_eq!(ids, vec![1, 2]);
        tier.stop().await;
    }

    #[tokio::test]
    async fn admin_updates_are_visible_to_the_gate() {
        let tier = AppTier::start(&config(), Arc::new(MemoryBroker::new()), state());
        let service = tier.service();

        service.replace_blacklist(BlacklistSets {
            user_ids: [7].into_iter().collect(),
            ips: std::collections::HashSet::new(),
        });
        assert_eq!(
            service
                .sec_kill(7, 1, "1.2.3.4", CancellationToken::new())
                .await,
            Err(SaleError::Blacklisted)
        );

        let mut closed = product(1, 0);
        closed.status = ProductStatus::ForceClosed;
        service.upsert_product(closed).unwrap();
        assert_eq!(
            service
                .sec_kill(8, 1, "1.2.3.4", CancellationToken::new())
                .await,
            Err(SaleError::SoldOut)
        );
        tier.stop().await;
    }
}
