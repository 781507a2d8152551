//! JSON seed file for the catalog and blacklist.
//!
//! ```json
//! {
//!   "products": [
//!     { "product_id": 1, "start_time": 0, "end_time": 4102444800,
//!       "status": "on_sale", "total": 100, "per_person_limit": 1,
//!       "buy_rate": 0.5 }
//!   ],
//!   "blacklist": { "user_ids": [13], "ips": ["10.0.0.66"] }
//! }
//! ```

use std::path::Path;

use anyhow::Context;
use flashsale_core::Product;
use serde::Deserialize;

use super::{Blacklist, BlacklistSets, ProductCatalog};

#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub blacklist: BlacklistSets,
}

impl SeedFile {
    /// Reads and parses a seed file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))
    }

    /// Upserts every product and replaces the blacklist.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid product. Products before it
    /// are already applied.
    pub fn apply(self, catalog: &ProductCatalog, blacklist: &Blacklist) -> anyhow::Result<usize> {
        let count = self.products.len();
        for product in self.products {
            let id = product.product_id;
            catalog
                .upsert(product)
                .with_context(|| format!("invalid product {id}"))?;
        }
        blacklist.replace(self.blacklist);
        Ok(count)
    }
}
