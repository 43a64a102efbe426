//! Demo workers driven by the CLI.
//!
//! [`DemoFactory`] builds one [`DemoWorker`] per call from a shared
//! [`WorkerSpec`]. Two kinds of loop are available:
//!
//! - [`WorkerKind::Ticker`] ticks forever until cancelled.
//! - [`WorkerKind::Countdown`] ticks `max_ticks` times and then returns on its
//!   own, which shows up as a self-completed worker in the pool counters.

use core::{future::Future, time::Duration};
use flexpool::{CancellationToken, Worker, WorkerFactory};
use tokio::time::{MissedTickBehavior, interval};

/// Which loop the factory builds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum WorkerKind {
    /// Tick until cancelled.
    Ticker,
    /// Tick a fixed number of times, then exit.
    Countdown,
}

/// Configuration handed to the factory for every worker it builds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerSpec {
    pub kind: WorkerKind,
    pub tick: Duration,
    pub max_ticks: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FactoryError {
    /// The factory has already built as many workers as it was allowed to.
    #[error("spawn budget of {budget} workers exhausted")]
    BudgetExhausted { budget: usize },
}

/// Builds [`DemoWorker`]s, optionally capped at a lifetime spawn budget.
#[derive(Debug, Default)]
pub struct DemoFactory {
    spawned: usize,
    budget: Option<usize>,
}

impl DemoFactory {
    pub const fn new(budget: Option<usize>) -> Self {
        Self { spawned: 0, budget }
    }
}

impl WorkerFactory<WorkerSpec> for DemoFactory {
    type Worker = DemoWorker;
    type Error = FactoryError;

    fn create(&mut self, spec: &WorkerSpec) -> Result<DemoWorker, FactoryError> {
        if let Some(budget) = self.budget {
            if self.spawned >= budget {
                return Err(FactoryError::BudgetExhausted { budget });
            }
        }
        self.spawned += 1;

        Ok(DemoWorker {
            serial: self.spawned,
            spec: *spec,
        })
    }
}

pub struct DemoWorker {
    serial: usize,
    spec: WorkerSpec,
}

impl Worker for DemoWorker {
    fn run(self, token: CancellationToken) -> impl Future<Output = ()> + Send + 'static {
        async move {
            let mut ticker = interval(self.spec.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            let mut ticks = 0_u64;
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        tracing::debug!(serial = self.serial, ticks, "Worker cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        ticks += 1;
                        tracing::trace!(serial = self.serial, ticks, "tick");

                        if self.spec.kind == WorkerKind::Countdown && ticks >= self.spec.max_ticks {
                            tracing::debug!(serial = self.serial, ticks, "Countdown finished");
                            break;
                        }
                    }
                }
            }
        }
    }
}
