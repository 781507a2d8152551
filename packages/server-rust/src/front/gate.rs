//! Front-tier admission gate.
//!
//! Cheap, non-blocking checks run before a request is allowed to cost a
//! broker round trip. The gate reads the catalog but never changes it.

use std::sync::Arc;

use flashsale_core::{ClockSource, Dice, ProductId, UserId};

use super::limiter::RateLimiter;
use crate::error::SaleError;
use crate::state::{Blacklist, ProductCatalog};

/// Decides whether a purchase attempt may enter the pipeline.
pub struct AdmissionGate {
    catalog: Arc<ProductCatalog>,
    blacklist: Arc<Blacklist>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn ClockSource>,
    dice: Arc<dyn Dice>,
    amplification: f64,
}

impl AdmissionGate {
    #[must_use]
    pub fn new(
        catalog: Arc<ProductCatalog>,
        blacklist: Arc<Blacklist>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn ClockSource>,
        dice: Arc<dyn Dice>,
        amplification: f64,
    ) -> Self {
        Self {
            catalog,
            blacklist,
            limiter,
            clock,
            dice,
            amplification,
        }
    }

    /// Runs the checks in order and stops at the first rejection:
    ///
    /// 1. blacklist (user id or client IP)
    /// 2. per-user and per-IP rate limits
    /// 3. product exists, sale window is open, product is not closed
    /// 4. a random draw within `buy_rate * amplification`
    ///
    /// # Errors
    ///
    /// Returns the [`SaleError`] of the first failing check.
    pub fn admit(&self, user_id: UserId, product_id: ProductId, client_ip: &str) -> Result<(), SaleError> {
        if self.blacklist.is_blocked(user_id, client_ip) {
            return Err(SaleError::Blacklisted);
        }

        let now = self.clock.now_secs();
        if !self.limiter.check(user_id, client_ip, now) {
            return Err(SaleError::RateLimited);
        }

        let slot = self.catalog.slot(product_id).ok_or(SaleError::NotFound)?;
        let buy_rate = {
            let slot = slot.lock();
            let product = slot.product();
            if product.not_started(now) {
                return Err(SaleError::NotStarted);
            }
            if product.ended(now) {
                return Err(SaleError::Ended);
            }
            if product.status.is_closed() {
                return Err(SaleError::SoldOut);
            }
            product.buy_rate
        };

        if self.dice.roll() > buy_rate * self.amplification {
            return Err(SaleError::Retry);
        }
        Ok(())
    }
}
