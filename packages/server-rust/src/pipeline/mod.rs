//! Worker-pool plumbing shared by both tiers.
//!
//! - [`handoff`]: bounded channels with timed sends
//! - [`pool`]: fixed-size pools running one [`PipelineStage`] each
//! - [`background`]: single-task housekeeping workers with a tick

pub mod background;
pub mod handoff;
pub mod pool;

pub use background::{BackgroundRunnable, BackgroundWorker};
pub use handoff::{bounded, send_timeout, SendError, SharedReceiver};
pub use pool::{Flow, PipelineStage, WorkerPool};
