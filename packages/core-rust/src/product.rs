//! Product records and their sale lifecycle.
//!
//! A [`Product`] is the unit of inventory a flash sale runs against. The
//! catalog on each tier holds one record per product id; the back tier is the
//! only writer of `status` once a sale is running.

use serde::{Deserialize, Serialize};

use crate::types::ProductId;

/// Lifecycle status of a product.
///
/// State machine: `Pending -> OnSale -> {SoldOut | ForceClosed}`. There is no
/// reverse transition; see [`ProductStatus::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    /// Configured but not yet opened for sale.
    Pending,
    /// Accepting purchase attempts within the sale window.
    OnSale,
    /// Inventory exhausted.
    SoldOut,
    /// Closed by an operator before inventory ran out.
    ForceClosed,
}

impl ProductStatus {
    /// Position in the lifecycle. Both terminal states share the last rank.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::OnSale => 1,
            Self::SoldOut | Self::ForceClosed => 2,
        }
    }

    /// Whether purchases can no longer succeed in this state.
    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, Self::SoldOut | Self::ForceClosed)
    }

    /// Returns the status after observing `next`, never moving backwards.
    ///
    /// A terminal state is sticky: once `SoldOut` or `ForceClosed`, neither a
    /// stale refresh nor the other terminal state can replace it.
    #[must_use]
    pub fn advance(self, next: Self) -> Self {
        if next.rank() > self.rank() {
            next
        } else {
            self
        }
    }

    /// Returns the wire name of this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::OnSale => "on_sale",
            Self::SoldOut => "sold_out",
            Self::ForceClosed => "force_closed",
        }
    }
}

/// A product configured for a flash sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: ProductId,
    /// Sale window start, epoch seconds.
    pub start_time: i64,
    /// Sale window end, epoch seconds.
    pub end_time: i64,
    pub status: ProductStatus,
    /// Total units available for the whole sale.
    pub total: u64,
    /// Maximum successful purchases per user.
    pub per_person_limit: u32,
    /// Fraction of eligible attempts allowed to proceed, in `0.0..=1.0`.
    pub buy_rate: f64,
    /// Opaque per-product material mixed into fulfillment tokens.
    #[serde(default)]
    pub secret: String,
}

/// Reasons a product record is rejected by [`Product::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProductError {
    #[error("product id must be non-zero")]
    ZeroId,
    #[error("sale window ends ({end}) before it starts ({start})")]
    InvertedWindow { start: i64, end: i64 },
    #[error("buy rate {0} is outside 0.0..=1.0")]
    BuyRateOutOfRange(f64),
    #[error("per-person limit must be at least 1")]
    ZeroLimit,
}

impl Product {
    /// Checks the record for values that would make the sale meaningless.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProductError`] found.
    pub fn validate(&self) -> Result<(), ProductError> {
        if self.product_id == 0 {
            return Err(ProductError::ZeroId);
        }
        if self.end_time < self.start_time {
            return Err(ProductError::InvertedWindow {
                start: self.start_time,
                end: self.end_time,
            });
        }
        if !(0.0..=1.0).contains(&self.buy_rate) {
            return Err(ProductError::BuyRateOutOfRange(self.buy_rate));
        }
        if self.per_person_limit == 0 {
            return Err(ProductError::ZeroLimit);
        }
        Ok(())
    }

    /// Whether `now_secs` falls before the sale window.
    #[must_use]
    pub fn not_started(&self, now_secs: i64) -> bool {
        now_secs < self.start_time
    }

    /// Whether `now_secs` falls after the sale window.
    #[must_use]
    pub fn ended(&self, now_secs: i64) -> bool {
        now_secs > self.end_time
    }
}
