//! Process-wide product catalog with one lock per product.
//!
//! The outer [`DashMap`] only resolves a product id to its slot; it is never
//! held while a slot is locked. Each [`ProductSlot`] sits behind its own
//! `parking_lot::Mutex`, so the fulfillment decision for one product never
//! contends with another product, and an external refresh of a product waits
//! for any in-progress decision on it.

use std::sync::Arc;

use dashmap::DashMap;
use flashsale_core::{Product, ProductError, ProductId, ProductStatus};
use parking_lot::Mutex;
use serde::Serialize;

/// Count of successful fulfillments for one product.
///
/// Only ever increases, and only inside the owning slot's critical section.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SoldCount(u64);

impl SoldCount {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    pub fn add(&mut self, n: u64) {
        self.0 = self.0.saturating_add(n);
    }
}

/// A product and its sale counters, guarded together.
#[derive(Debug)]
pub struct ProductSlot {
    product: Product,
    sold: SoldCount,
}

impl ProductSlot {
    fn new(product: Product) -> Self {
        Self {
            product,
            sold: SoldCount::default(),
        }
    }

    #[must_use]
    pub fn product(&self) -> &Product {
        &self.product
    }

    #[must_use]
    pub fn sold(&self) -> u64 {
        self.sold.get()
    }

    /// Records one successful fulfillment.
    pub fn record_sale(&mut self) {
        self.sold.add(1);
    }

    /// Moves the product to `SoldOut` unless it is already terminal.
    pub fn mark_sold_out(&mut self) {
        self.product.status = self.product.status.advance(ProductStatus::SoldOut);
    }

    /// Applies a refreshed record, keeping counters and never regressing status.
    fn refresh(&mut self, incoming: Product) {
        let status = self.product.status.advance(incoming.status);
        self.product = Product { status, ..incoming };
    }

    fn view(&self) -> ProductView {
        ProductView {
            product: self.product.clone(),
            sold: self.sold.get(),
        }
    }
}

/// Point-in-time copy of a product and its sold count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductView {
    #[serde(flatten)]
    pub product: Product,
    pub sold: u64,
}

/// Product id -> lock-guarded [`ProductSlot`].
#[derive(Debug, Default)]
pub struct ProductCatalog {
    slots: DashMap<ProductId, Arc<Mutex<ProductSlot>>>,
}

impl ProductCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a product or refreshes an existing one.
    ///
    /// A refresh replaces configuration fields but keeps the sold count and
    /// never moves the status backwards.
    ///
    /// # Errors
    ///
    /// Returns the validation error for malformed records; the catalog is
    /// left unchanged.
    pub fn upsert(&self, product: Product) -> Result<(), ProductError> {
        product.validate()?;

        let mut inserted = false;
        let slot = Arc::clone(
            self.slots
                .entry(product.product_id)
                .or_insert_with(|| {
                    inserted = true;
                    Arc::new(Mutex::new(ProductSlot::new(product.clone())))
                })
                .value(),
        );
        if !inserted {
            slot.lock().refresh(product);
        }
        Ok(())
    }

    /// Returns the slot for `product_id`; callers lock it themselves.
    #[must_use]
    pub fn slot(&self, product_id: ProductId) -> Option<Arc<Mutex<ProductSlot>>> {
        self.slots.get(&product_id).map(|e| Arc::clone(e.value()))
    }

    #[must_use]
    pub fn view(&self, product_id: ProductId) -> Option<ProductView> {
        self.slot(product_id).map(|slot| slot.lock().view())
    }

    /// All products, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<ProductView> {
        let slots: Vec<Arc<Mutex<ProductSlot>>> =
            self.slots.iter().map(|e| Arc::clone(e.value())).collect();
        let mut views: Vec<ProductView> = slots.iter().map(|s| s.lock().view()).collect();
        views.sort_by_key(|v| v.product.product_id);
        views
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
