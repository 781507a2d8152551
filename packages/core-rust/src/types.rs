use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a buyer.
pub type UserId = u64;

/// Identifier of a product in the sale catalog.
pub type ProductId = u64;

/// Process-unique identifier of one client call, carried through both queues.
pub type RequestId = u64;

/// Correlation key: at most one call per (user, product) is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub user_id: UserId,
    pub product_id: ProductId,
}

impl RequestKey {
    #[must_use]
    pub fn new(user_id: UserId, product_id: ProductId) -> Self {
        Self {
            user_id,
            product_id,
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.user_id, self.product_id)
    }
}
