//! Front tier: admission, submission, reply routing.
//!
//! ```text
//! sec_kill ─► AdmissionGate ─► CorrelationTable::register
//!                                  │
//!                    submission channel ─► Dispatcher ─► request queue
//!                                                            ⋮
//! caller ◄─ CorrelationTable::deliver ◄─ ReplyReader ◄─ reply queue
//! ```

pub mod blacklist_sync;
pub mod correlation;
pub mod gate;
pub mod limiter;
pub mod reply;
pub mod service;
pub mod submission;

pub use correlation::{CorrelationTable, Registration};
pub use gate::AdmissionGate;
pub use limiter::{LimiterSweeper, RateLimiter};
pub use service::{AppTier, FrontService, Fulfillment, SaleInfo};
