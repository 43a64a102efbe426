//! Resizable pool of cooperatively cancellable workers.
//!
//! This module defines [`WorkerPool`], which owns an ordered set of running
//! workers, lets callers grow and shrink that set at runtime, and drains every
//! worker it ever spawned on [`WorkerPool::stop`].
//!
//! Each worker runs on its own Tokio task with its own [`CancellationToken`].
//! Shrinking cancels the most recently added workers first and returns
//! without waiting; the cancelled loops wind down in the background while
//! [`WorkerPool::exiting`] counts them.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken


use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use tokio::runtime;
use tokio_util::task::TaskTracker;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    error::{Error, Result},
    handle::{ExitHook, Handle, Tally, WorkerExit, WorkerId, WorkerState},
    worker::{Worker, WorkerFactory},
};

/// Outcome of [`WorkerPool::resize`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resize {
    /// This many workers were spawned.
    Grew(usize),
    /// This many active workers were cancelled.
    Shrank(usize),
    /// The delta was zero.
    Unchanged,
}

/// A pool of long-running workers that can be grown and shrunk at runtime.
///
/// The pool is a cheap handle around shared state; clones refer to the same
/// workers.
///
/// ## Counters
///
/// - [`running`](Self::running): tasks whose loop has started and not yet
///   returned.
/// - [`exiting`](Self::exiting): tasks cancelled by [`reduce`](Self::reduce)
///   or [`stop`](Self::stop) that have not yet returned. Workers that finish
///   on their own never show up here.
/// - [`active`](Self::active): handles not yet cancelled. A handle leaves this
///   set the instant it is cancelled, before its loop has necessarily noticed.
///
/// Counter reads are lock-free snapshots.
///
/// ## Cancellation is cooperative
///
/// The pool never aborts a task. A worker that ignores its token keeps
/// running, and [`stop`](Self::stop) waits for it indefinitely. Wrap `stop`
/// in [`tokio::time::timeout`] when shutdown needs a deadline.
pub struct WorkerPool<F> {
    shared: Arc<Shared<F>>,
}

struct Shared<F> {
    state: Mutex<State<F>>,
    tally: Arc<Tally>,
    tracker: TaskTracker,
    stopped: AtomicBool,
    runtime: runtime::Handle,
}

struct State<F> {
    factory: F,
    // Oldest first; `reduce` pops from the back.
    handles: VecDeque<Handle>,
    next_id: u64,
}

impl<F> Clone for WorkerPool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Configures a [`WorkerPool`] before it is built.
pub struct Builder<F> {
    factory: F,
    runtime: Option<runtime::Handle>,
    on_exit: Option<ExitHook>,
}

impl<F> Builder<F>
where
    F: Send + 'static,
{
    /// Spawns workers on `handle` instead of the runtime current at
    /// [`build`](Self::build) time.
    ///
    /// Use this to create or drive the pool from threads that are not inside
    /// a Tokio runtime.
    pub fn runtime(mut self, handle: runtime::Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Installs a hook called once per worker, from that worker's task, right
    /// after its loop returns and the counters have been updated.
    ///
    /// The hook also runs when a worker panics. It must not block.
    pub fn on_exit<H>(mut self, hook: H) -> Self
    where
        H: Fn(WorkerExit) + Send + Sync + 'static,
    {
        self.on_exit = Some(Arc::new(hook));
        self
    }

    /// Builds the pool.
    ///
    /// # Panics
    ///
    /// Panics if no runtime was supplied via [`runtime`](Self::runtime) and
    /// this is called outside of a Tokio runtime.
    pub fn build(self) -> WorkerPool<F> {
        let runtime = self.runtime.unwrap_or_else(runtime::Handle::current);
        WorkerPool {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    factory: self.factory,
                    handles: VecDeque::new(),
                    next_id: 0,
                }),
                tally: Arc::new(Tally::new(self.on_exit)),
                tracker: TaskTracker::new(),
                stopped: AtomicBool::new(false),
                runtime,
            }),
        }
    }
}

impl<F> WorkerPool<F>
where
    F: Send + 'static,
{
    /// Creates an empty pool that builds workers with `factory` and spawns
    /// them on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime. Use
    /// [`WorkerPool::builder`] with [`Builder::runtime`] in that case.
    pub fn new(factory: F) -> Self {
        Self::builder(factory).build()
    }

    /// Starts configuring a pool around `factory`.
    pub fn builder(factory: F) -> Builder<F> {
        Builder {
            factory,
            runtime: None,
            on_exit: None,
        }
    }

    /// Builds `count` workers from `config` and starts each on its own task.
    ///
    /// Returns the ids of the spawned workers in add order. A `count` of zero
    /// does nothing.
    ///
    /// # Errors
    ///
    /// - [`Error::Factory`] if the factory fails. The batch stops at the
    ///   failing worker; workers spawned earlier in this call keep running.
    ///   Call [`reduce`](Self::reduce) to roll them back if needed.
    /// - [`Error::Stopped`] if [`stop`](Self::stop) has been called.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, config)))]
    pub fn add<C>(&self, count: usize, config: &C) -> Result<Vec<WorkerId>, F::Error>
    where
        C: ?Sized,
        F: WorkerFactory<C>,
    {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut state = self.shared.state.lock();
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(Error::Stopped);
        }

        let mut spawned = Vec::with_capacity(count);
        for _ in 0..count {
            let worker = state.factory.create(config).map_err(|e| {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    spawned = spawned.len(),
                    requested = count,
                    "worker factory failed, batch aborted"
                );
                Error::Factory(e)
            })?;

            let id = WorkerId::new(state.next_id);
            state.next_id += 1;

            let handle = Handle::new(id);
            self.spawn(&handle, worker);
            state.handles.push_back(handle);
            spawned.push(id);
        }

        Ok(spawned)
    }

    fn spawn<W: Worker>(&self, handle: &Handle, worker: W) {
        let token = handle.token();
        let ticket = handle.ticket(Arc::clone(&self.shared.tally));

        self.shared.tracker.spawn_on(
            async move {
                let _guard = ticket.enter();
                worker.run(token).await;
            },
            &self.shared.runtime,
        );

        #[cfg(feature = "tracing")]
        tracing::debug!(id = %handle.id(), "worker spawned");
    }

    /// Cancels up to `count` of the most recently added active workers.
    ///
    /// The cancelled handles leave the active set immediately; their loops
    /// return in the background. Asking for more than [`active`](Self::active)
    /// cancels everything that is active. Returns how many handles were
    /// cancelled.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn reduce(&self, count: usize) -> usize {
        if count == 0 {
            return 0;
        }

        let mut state = self.shared.state.lock();
        let take = count.min(state.handles.len());
        for _ in 0..take {
            if let Some(handle) = state.handles.pop_back() {
                let _id = handle.id();
                let _pending = handle.cancel(&self.shared.tally);

                #[cfg(feature = "tracing")]
                tracing::debug!(id = %_id, already_exited = !_pending, "worker cancelled");
            }
        }

        take
    }

    /// Drops the handles of active workers that already returned on their
    /// own, so [`active`](Self::active) only counts live loops again.
    ///
    /// Nothing is cancelled and [`exiting`](Self::exiting) is untouched.
    /// Returns how many handles were removed.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn prune(&self) -> usize {
        let mut state = self.shared.state.lock();
        let before = state.handles.len();
        // `Exited` is terminal, so nothing removed here can still be running.
        state
            .handles
            .retain(|handle| handle.state() != WorkerState::Exited);
        let pruned = before - state.handles.len();

        #[cfg(feature = "tracing")]
        tracing::debug!(pruned, "pruned finished workers");

        pruned
    }

    /// Grows the pool by `delta` workers when positive, shrinks it by
    /// `-delta` when negative.
    ///
    /// # Errors
    ///
    /// Same as [`add`](Self::add) when growing. Shrinking never fails.
    pub fn resize<C>(&self, delta: isize, config: &C) -> Result<Resize, F::Error>
    where
        C: ?Sized,
        F: WorkerFactory<C>,
    {
        match delta {
            0 => Ok(Resize::Unchanged),
            grow if grow > 0 => self
                .add(grow.unsigned_abs(), config)
                .map(|ids| Resize::Grew(ids.len())),
            shrink => Ok(Resize::Shrank(self.reduce(shrink.unsigned_abs()))),
        }
    }

    /// Number of workers whose loop has started and not yet returned.
    pub fn running(&self) -> usize {
        self.shared.tally.running()
    }

    /// Number of cancelled workers whose loop has not yet returned.
    pub fn exiting(&self) -> usize {
        self.shared.tally.exiting()
    }

    /// Number of handles that have not been cancelled.
    ///
    /// Includes workers that already returned on their own; those stay in the
    /// active set until [`prune`](Self::prune), `reduce` or `stop` removes
    /// them.
    pub fn active(&self) -> usize {
        self.shared.state.lock().handles.len()
    }

    /// Current state of an active worker.
    ///
    /// Returns `None` once the worker's handle has been cancelled (by
    /// [`reduce`](Self::reduce) or [`stop`](Self::stop)) or if `id` was never
    /// issued by this pool. An active worker that finished on its own reports
    /// [`WorkerState::Exited`].
    pub fn worker_state(&self, id: WorkerId) -> Option<WorkerState> {
        let state = self.shared.state.lock();
        // Ids are issued in increasing order, so the sequence is sorted.
        state
            .handles
            .binary_search_by_key(&id, Handle::id)
            .ok()
            .map(|idx| state.handles[idx].state())
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Cancels every active worker and waits until every worker this pool has
    /// ever spawned has returned, including ones cancelled earlier by
    /// [`reduce`](Self::reduce).
    ///
    /// Only the first call does anything. Later or concurrent calls return
    /// immediately without waiting. Once the first call returns,
    /// [`running`](Self::running) and [`exiting`](Self::exiting) are both 0
    /// and [`add`](Self::add) fails with [`Error::Stopped`].
    ///
    /// There is no timeout: if a worker never observes its token this never
    /// returns.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub async fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let _cancelled = {
            let mut state = self.shared.state.lock();
            let cancelled = state.handles.len();
            while let Some(handle) = state.handles.pop_back() {
                handle.cancel(&self.shared.tally);
            }
            cancelled
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            cancelled = _cancelled,
            running = self.running(),
            "Draining worker pool"
        );

        self.shared.tracker.close();
        self.shared.tracker.wait().await;

        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool stopped");
    }
}
