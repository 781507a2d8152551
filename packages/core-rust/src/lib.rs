//! Flash-sale core: product model, outcome codes, broker envelopes, and fulfillment tokens.

pub mod clock;
pub mod envelope;
pub mod outcome;
pub mod product;
pub mod token;
pub mod types;

pub use clock::{ClockSource, Dice, FixedDice, ManualClock, SystemClock, ThreadDice};
pub use envelope::{CodecError, SaleRequest, SaleResult};
pub use outcome::Outcome;
pub use product::{Product, ProductError, ProductStatus};
pub use token::TokenSigner;
pub use types::{ProductId, RequestId, RequestKey, UserId};
