//! User id and client IP blacklists.
//!
//! Readers load the current sets through an [`ArcSwap`] and never block on a
//! writer. Writers build a fresh copy and swap it in, which suits sets that
//! are read on every request and changed rarely.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use flashsale_core::UserId;
use serde::{Deserialize, Serialize};

/// One immutable generation of the blacklist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistSets {
    #[serde(default)]
    pub user_ids: HashSet<UserId>,
    #[serde(default)]
    pub ips: HashSet<String>,
}

/// Lock-free blacklist shared by the admission gate and the sync workers.
#[derive(Debug)]
pub struct Blacklist {
    sets: ArcSwap<BlacklistSets>,
}

impl Default for Blacklist {
    fn default() -> Self {
        Self::new(BlacklistSets::default())
    }
}

impl Blacklist {
    #[must_use]
    pub fn new(sets: BlacklistSets) -> Self {
        Self {
            sets: ArcSwap::from_pointee(sets),
        }
    }

    #[must_use]
    pub fn contains_user(&self, user_id: UserId) -> bool {
        self.sets.load().user_ids.contains(&user_id)
    }

    #[must_use]
    pub fn contains_ip(&self, ip: &str) -> bool {
        self.sets.load().ips.contains(ip)
    }

    /// Whether either the user or the IP is blocked.
    #[must_use]
    pub fn is_blocked(&self, user_id: UserId, ip: &str) -> bool {
        let sets = self.sets.load();
        sets.user_ids.contains(&user_id) || sets.ips.contains(ip)
    }

    /// Replaces both sets at once.
    pub fn replace(&self, sets: BlacklistSets) {
        self.sets.store(Arc::new(sets));
    }

    pub fn add_user(&self, user_id: UserId) {
        if self.contains_user(user_id) {
            return;
        }
        self.sets.rcu(|current| {
            let mut next = BlacklistSets::clone(current);
            next.user_ids.insert(user_id);
            next
        });
    }

    /// Adds a batch of IPs in one swap.
    pub fn add_ips<I>(&self, ips: I)
    where
        I: IntoIterator<Item = String>,
    {
        let batch: Vec<String> = ips.into_iter().collect();
        if batch.is_empty() {
            return;
        }
        self.sets.rcu(|current| {
            let mut next = BlacklistSets::clone(current);
            next.ips.extend(batch.iter().cloned());
            next
        });
    }

    /// Current generation, for reporting.
    #[must_use]
    pub fn snapshot(&self) -> Arc<BlacklistSets> {
        self.sets.load_full()
    }
}
