//! Process-wide state: product catalog, purchase history, blacklist.

pub mod blacklist;
pub mod catalog;
pub mod history;
pub mod seed;

use std::sync::Arc;

use flashsale_core::{ClockSource, Dice};

pub use blacklist::{Blacklist, BlacklistSets};
pub use catalog::{ProductCatalog, ProductSlot, ProductView, SoldCount};
pub use history::{HistoryStore, UserHistory};
pub use seed::SeedFile;

/// Catalog, blacklist, clock and dice shared by the tiers of one process.
#[derive(Clone)]
pub struct SaleState {
    pub catalog: Arc<ProductCatalog>,
    pub blacklist: Arc<Blacklist>,
    pub clock: Arc<dyn ClockSource>,
    pub dice: Arc<dyn Dice>,
}

impl SaleState {
    /// Empty catalog and blacklist with the given time and randomness sources.
    #[must_use]
    pub fn new(clock: Arc<dyn ClockSource>, dice: Arc<dyn Dice>) -> Self {
        Self {
            catalog: Arc::new(ProductCatalog::new()),
            blacklist: Arc::new(Blacklist::default()),
            clock,
            dice,
        }
    }
}
