//! Fixed-window access counters per user id and per client IP.
//!
//! Each key keeps two windows: the current wall-clock second and the current
//! wall-clock minute. Every hit counts, including rejected ones, so a client
//! hammering past its cap stays rejected until the window rolls over.

use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use flashsale_core::{ClockSource, UserId};
use tracing::debug;

use crate::config::RateLimits;
use crate::pipeline::BackgroundRunnable;

const MINUTE: i64 = 60;

#[derive(Debug, Default, Clone, Copy)]
struct Window {
    start: i64,
    count: u32,
}

impl Window {
    fn hit(&mut self, start: i64) -> u32 {
        if self.start != start {
            self.start = start;
            self.count = 0;
        }
        self.count = self.count.saturating_add(1);
        self.count
    }
}

#[derive(Debug, Default)]
struct Windows {
    second: Window,
    minute: Window,
}

impl Windows {
    /// Counts a hit at `now` and returns `(per_second, per_minute)`.
    fn hit(&mut self, now: i64) -> (u32, u32) {
        let second = self.second.hit(now);
        let minute = self.minute.hit(now - now.rem_euclid(MINUTE));
        (second, minute)
    }

    fn is_stale(&self, now: i64) -> bool {
        self.minute.start + MINUTE <= now - now.rem_euclid(MINUTE)
    }
}

fn hit<K: Eq + Hash>(map: &DashMap<K, Windows>, key: K, now: i64) -> (u32, u32) {
    map.entry(key).or_default().hit(now)
}

/// Per-user and per-IP rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimits,
    users: DashMap<UserId, Windows>,
    ips: DashMap<String, Windows>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            users: DashMap::new(),
            ips: DashMap::new(),
        }
    }

    /// Counts one access by `user_id` from `ip` at `now` (epoch seconds).
    ///
    /// Returns `false` if any of the four caps is exceeded.
    pub fn check(&self, user_id: UserId, ip: &str, now: i64) -> bool {
        let (user_sec, user_min) = hit(&self.users, user_id, now);
        let (ip_sec, ip_min) = hit(&self.ips, ip.to_string(), now);

        user_sec <= self.limits.user_per_second
            && user_min <= self.limits.user_per_minute
            && ip_sec <= self.limits.ip_per_second
            && ip_min <= self.limits.ip_per_minute
    }

    /// Drops every key whose minute window has rolled over; returns how many.
    ///
    /// Safe to run while `check` inserts keys; only evictions are counted.
    pub fn sweep(&self, now: i64) -> usize {
        let mut evicted = 0;
        let mut keep = |w: &Windows| {
            let stale = w.is_stale(now);
            evicted += usize::from(stale);
            !stale
        };
        self.users.retain(|_, w| keep(w));
        self.ips.retain(|_, w| keep(w));
        evicted
    }

    /// Number of tracked keys (users plus IPs).
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len() + self.ips.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Periodic eviction of idle limiter keys.
pub struct LimiterSweeper {
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn ClockSource>,
}

impl LimiterSweeper {
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>, clock: Arc<dyn ClockSource>) -> Self {
        Self { limiter, clock }
    }

    fn sweep(&self) {
        let evicted = self.limiter.sweep(self.clock.now_secs());
        if evicted > 0 {
            debug!(evicted, remaining = self.limiter.len(), "rate limiter swept");
        }
    }
}

#[async_trait]
impl BackgroundRunnable for LimiterSweeper {
    /// Requests an immediate sweep.
    type Task = ();

    async fn run(&mut self, _task: ()) {
        self.sweep();
    }

    async fn on_tick(&mut self) {
        self.sweep();
    }
}
