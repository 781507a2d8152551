use std::time::Duration;

/// Names of the broker queues shared by both tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    /// Front tier -> back tier.
    pub request: String,
    /// Back tier -> front tier.
    pub reply: String,
    /// User ids to add to the blacklist, one per entry.
    pub id_blacklist: String,
    /// Client IPs to add to the blacklist, one per entry.
    pub ip_blacklist: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            request: "request_queue".to_string(),
            reply: "reply_queue".to_string(),
            id_blacklist: "id_blacklist_queue".to_string(),
            ip_blacklist: "ip_blacklist_queue".to_string(),
        }
    }
}

/// Access caps enforced by the admission gate's rate limiter.
///
/// A request is rejected once the count inside a window exceeds the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub user_per_second: u32,
    pub user_per_minute: u32,
    pub ip_per_second: u32,
    pub ip_per_minute: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            user_per_second: 1,
            user_per_minute: 10,
            ip_per_second: 50,
            ip_per_minute: 500,
        }
    }
}

/// Worker counts for every pipeline stage.
///
/// Sizes are tuning knobs only; correctness never depends on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizes {
    /// Front tier: submission channel -> request queue.
    pub app_dispatchers: usize,
    /// Front tier: reply queue -> correlation table.
    pub app_reply_readers: usize,
    /// Back tier: request queue -> handler channel.
    pub core_readers: usize,
    /// Back tier: handler channel -> writer channel.
    pub core_handlers: usize,
    /// Back tier: writer channel -> reply queue.
    pub core_writers: usize,
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            app_dispatchers: 8,
            app_reply_readers: 8,
            core_readers: 8,
            core_handlers: 16,
            core_writers: 8,
        }
    }
}

/// Capacities of the bounded in-process channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCapacities {
    pub submission: usize,
    pub read_to_handle: usize,
    pub handle_to_write: usize,
}

impl Default for ChannelCapacities {
    fn default() -> Self {
        Self {
            submission: 1024,
            read_to_handle: 1024,
            handle_to_write: 1024,
        }
    }
}

/// Sale-engine configuration shared by both tiers.
///
/// Each tier reads only the fields it needs; a single struct keeps the
/// timeouts that must agree with each other (client wait vs. request expiry)
/// side by side.
#[derive(Debug, Clone)]
pub struct SaleConfig {
    /// Upper bound on a client call, end to end.
    pub app_wait_result_timeout: Duration,
    /// Requests older than this when they reach the back tier are dropped.
    pub max_request_wait_timeout: Duration,
    /// Reader -> handler hand-off timeout.
    pub core_wait_result_timeout: Duration,
    /// Handler -> writer hand-off timeout.
    pub send_to_write_chan_timeout: Duration,
    /// Caller -> dispatcher hand-off timeout.
    pub submit_timeout: Duration,
    /// How long a single blocking pop waits before looping.
    pub broker_pop_timeout: Duration,
    /// Pause between retries after a broker error.
    pub broker_retry_interval: Duration,
    /// Front-tier admission probability is `buy_rate * gate_amplification`.
    pub gate_amplification: f64,
    /// Server secret the fulfillment token key is derived from.
    pub token_secret: String,
    /// IP blacklist batches flush above this many entries.
    pub ip_blacklist_batch: usize,
    /// IP blacklist batches flush at least this often.
    pub ip_blacklist_flush_interval: Duration,
    /// Interval between rate limiter sweeps.
    pub limiter_sweep_interval: Duration,
    pub rate_limits: RateLimits,
    pub pools: PoolSizes,
    pub channels: ChannelCapacities,
    pub queues: QueueNames,
}

impl Default for SaleConfig {
    fn default() -> Self {
        Self {
            app_wait_result_timeout: Duration::from_secs(10),
            max_request_wait_timeout: Duration::from_secs(30),
            core_wait_result_timeout: Duration::from_millis(200),
            send_to_write_chan_timeout: Duration::from_millis(100),
            submit_timeout: Duration::from_millis(100),
            broker_pop_timeout: Duration::from_secs(1),
            broker_retry_interval: Duration::from_millis(50),
            gate_amplification: 1.5,
            token_secret: String::new(),
            ip_blacklist_batch: 100,
            ip_blacklist_flush_interval: Duration::from_secs(5),
            limiter_sweep_interval: Duration::from_secs(30),
            rate_limits: RateLimits::default(),
            pools: PoolSizes::default(),
            channels: ChannelCapacities::default(),
            queues: QueueNames::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sale_config_defaults() {
        let config = SaleConfig::default();
        assert_eq!(config.app_wait_result_timeout, Duration::from_secs(10));
        assert_eq!(config.max_request_wait_timeout, Duration::from_secs(30));
        assert_eq!(config.core_wait_result_timeout, Duration::from_millis(200));
        assert!((config.gate_amplification - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.ip_blacklist_batch, 100);
    }

    #[test]
    fn queue_name_defaults() {
        let names = QueueNames::default();
        assert_eq!(names.request, "request_queue");
        assert_eq!(names.reply, "reply_queue");
    }

    #[test]
    fn every_pool_has_workers() {
        let pools = PoolSizes::default();
        for size in [
            pools.app_dispatchers,
            pools.app_reply_readers,
            pools.core_readers,
            pools.core_handlers,
            pools.core_writers,
        ] {
            assert!(size > 0);
        }
    }
}
