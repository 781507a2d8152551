//! Per-user purchase history.
//!
//! Each user's record has its own lock, independent of the product locks, so
//! looking up one user's history never serializes unrelated products.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use flashsale_core::{ProductId, UserId};
use parking_lot::Mutex;

/// Purchase counts of a single user, keyed by product.
#[derive(Debug, Default)]
pub struct UserHistory {
    counts: HashMap<ProductId, u32>,
}

impl UserHistory {
    #[must_use]
    pub fn count(&self, product_id: ProductId) -> u32 {
        self.counts.get(&product_id).copied().unwrap_or(0)
    }

    pub fn add(&mut self, product_id: ProductId, n: u32) {
        let entry = self.counts.entry(product_id).or_insert(0);
        *entry = entry.saturating_add(n);
    }
}

/// User id -> lock-guarded [`UserHistory`], created on first use.
#[derive(Debug, Default)]
pub struct HistoryStore {
    users: DashMap<UserId, Arc<Mutex<UserHistory>>>,
}

impl HistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the user's record, creating an empty one if needed.
    #[must_use]
    pub fn user(&self, user_id: UserId) -> Arc<Mutex<UserHistory>> {
        Arc::clone(self.users.entry(user_id).or_default().value())
    }

    /// Units of `product_id` bought by `user_id`, without creating a record.
    #[must_use]
    pub fn bought(&self, user_id: UserId, product_id: ProductId) -> u32 {
        self.users
            .get(&user_id)
            .map_or(0, |h| h.value().lock().count(product_id))
    }

    /// Number of users with a record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
