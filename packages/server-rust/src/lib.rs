//! Flash-sale server: admission gate, broker pipelines, fulfillment engine, and HTTP front.

pub mod back;
pub mod broker;
pub mod config;
pub mod discovery;
pub mod error;
pub mod front;
pub mod network;
pub mod pipeline;
pub mod state;
pub mod telemetry;

pub use config::SaleConfig;
pub use error::SaleError;
