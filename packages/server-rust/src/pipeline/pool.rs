//! Fixed-size worker pools that run one pipeline stage.
//!
//! A stage implements [`PipelineStage::step`], a single iteration of its main
//! loop. [`WorkerPool::spawn`] runs `size` tokio tasks that call `step` until
//! shutdown is signalled or the stage reports [`Flow::Stop`]. A panic inside
//! one iteration is logged and the worker keeps going.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// What a worker does after one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The stage's input is closed; the worker exits.
    Stop,
}

/// One stage of the admission/fulfillment pipeline.
#[async_trait]
pub trait PipelineStage: Send + Sync + 'static {
    /// Stage name used in logs and metric tags.
    fn name(&self) -> &'static str;

    /// Runs a single iteration of the stage loop.
    ///
    /// Implementations handle their own errors (log, drop, retry); only
    /// input exhaustion is reported back as [`Flow::Stop`].
    async fn step(&self, worker: usize) -> Flow;
}

/// Handles to the tasks running one stage.
#[derive(Debug)]
pub struct WorkerPool {
    name: &'static str,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers for `stage`.
    ///
    /// Workers exit when `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn<S: PipelineStage>(
        stage: Arc<S>,
        size: usize,
        shutdown: &watch::Receiver<bool>,
    ) -> Self {
        let name = stage.name();
        let handles = (0..size)
            .map(|worker| {
                let stage = Arc::clone(&stage);
                let shutdown = shutdown.clone();
                tokio::spawn(run_worker(stage, worker, shutdown))
            })
            .collect();

        debug!(stage = name, workers = size, "worker pool started");
        Self { name, handles }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
        debug!(stage = self.name, "worker pool stopped");
    }
}

async fn run_worker<S: PipelineStage>(
    stage: Arc<S>,
    worker: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            flow = AssertUnwindSafe(stage.step(worker)).catch_unwind() => match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(_) => error!(stage = stage.name(), worker, "stage iteration panicked"),
            },
        }
    }
    debug!(stage = stage.name(), worker, "worker exited");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    struct Counting {
        steps: AtomicU32,
        stop_after: u32,
    }

    #[async_trait]
    impl PipelineStage for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn step(&self, _worker: usize) -> Flow {
            let n = self.steps.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::task::yield_now().await;
            if n >= self.stop_after {
                Flow::Stop
            } else {
                Flow::Continue
            }
        }
    }

    struct Panicky {
        steps: AtomicU32,
    }

    #[async_trait]
    impl PipelineStage for Panicky {
        fn name(&self) -> &'static str {
            "panicky"
        }

        async fn step(&self, _worker: usize) -> Flow {
            let n = self.steps.fetch_add(1, Ordering::SeqCst);
            assert!(n != 0, "first iteration fails");
            if n >= 3 {
                Flow::Stop
            } else {
                Flow::Continue
            }
        }
    }

    #[tokio::test]
    async fn stop_flow_ends_the_worker() {
        let (_tx, rx) = watch::channel(false);
        let stage = Arc::new(Counting {
            steps: AtomicU32::new(0),
            stop_after: 5,
        });
        let pool = WorkerPool::spawn(Arc::clone(&stage), 1, &rx);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.name(), "counting");

        pool.join().await;
        assert_eq!(stage.steps.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn shutdown_signal_stops_all_workers() {
        let (tx, rx) = watch::channel(false);
        let stage = Arc::new(Counting {
            steps: AtomicU32::new(0),
            stop_after: u32::MAX,
        });
        let pool = WorkerPool::spawn(stage, 4, &rx);

        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), pool.join())
            .await
            .expect("pool should stop after shutdown");
    }

    #[tokio::test]
    async fn panic_in_one_iteration_does_not_kill_worker() {
        let (_tx, rx) = watch::channel(false);
        let stage = Arc::new(Panicky {
            steps: AtomicU32::new(0),
        });
        let pool = WorkerPool::spawn(Arc::clone(&stage), 1, &rx);
        pool.join().await;
        assert_eq!(stage.steps.load(Ordering::SeqCst), 4);
    }
}
