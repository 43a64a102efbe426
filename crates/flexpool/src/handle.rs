//! Per-worker bookkeeping.
//!
//! A [`Handle`] is the pool's record for one active worker. The worker's task
//! shares its [`Lifecycle`] cell and runs an [`ExitGuard`] that settles the
//! pool counters exactly once, whichever way the loop ends.

use core::fmt;
use std::sync::Arc;

use portable_atomic::{AtomicIsize, AtomicU8, AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Identifier assigned to each worker when it is added to a pool.
///
/// Ids increase monotonically in add order and are never reused by the same
/// pool, so comparing two ids tells which worker was added first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Where a worker is in its life.
///
/// ```text
/// Created ──> Running ──────────────────> Exited
///    │           │                          ▲
///    └───────────┴──> CancelPending ────────┘
/// ```
///
/// `CancelPending` is pool bookkeeping only: the loop itself just sees its
/// token triggered. `Exited` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Built and queued on the runtime, not yet polled.
    Created = 0,
    /// The loop is executing.
    Running = 1,
    /// The pool cancelled the worker and is waiting for the loop to return.
    CancelPending = 2,
    /// The loop returned (or panicked).
    Exited = 3,
}

impl WorkerState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::CancelPending,
            _ => Self::Exited,
        }
    }
}

/// Atomic [`WorkerState`] cell shared by a handle and its task.
#[derive(Debug)]
pub(crate) struct Lifecycle(AtomicU8);

impl Lifecycle {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(WorkerState::Created as u8))
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// `Created -> Running`. A worker cancelled before it was first polled
    /// stays `CancelPending`.
    pub(crate) fn start(&self) {
        // Failing here means the worker is already `CancelPending`; keep it.
        let _ = self.0.compare_exchange(
            WorkerState::Created as u8,
            WorkerState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Moves to `CancelPending` unless the worker already exited or is
    /// already pending. Returns whether this call made the transition.
    pub(crate) fn request_cancel(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                match WorkerState::from_raw(raw) {
                    WorkerState::Created | WorkerState::Running => {
                        Some(WorkerState::CancelPending as u8)
                    }
                    WorkerState::CancelPending | WorkerState::Exited => None,
                }
            })
            .is_ok()
    }

    /// Moves to `Exited` and returns the state it left.
    pub(crate) fn exit(&self) -> WorkerState {
        WorkerState::from_raw(self.0.swap(WorkerState::Exited as u8, Ordering::AcqRel))
    }
}

/// Event passed to the pool's exit hook once per worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerExit {
    /// The worker that returned.
    pub id: WorkerId,
    /// `true` if the pool cancelled the worker before it returned, `false` if
    /// it completed on its own.
    pub cancelled: bool,
}

pub(crate) type ExitHook = Arc<dyn Fn(WorkerExit) + Send + Sync + 'static>;

/// Counters shared between the pool and every task it spawned.
pub(crate) struct Tally {
    running: AtomicUsize,
    // Signed: a cancelled worker may settle its decrement a moment before the
    // canceller records the matching increment.
    exiting: AtomicIsize,
    on_exit: Option<ExitHook>,
}

impl Tally {
    pub(crate) fn new(on_exit: Option<ExitHook>) -> Self {
        Self {
            running: AtomicUsize::new(0),
            exiting: AtomicIsize::new(0),
            on_exit,
        }
    }

    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn exiting(&self) -> usize {
        usize::try_from(self.exiting.load(Ordering::Acquire)).unwrap_or(0)
    }
}

/// The pool's record for one active worker.
pub(crate) struct Handle {
    id: WorkerId,
    token: CancellationToken,
    lifecycle: Arc<Lifecycle>,
}

impl Handle {
    pub(crate) fn new(id: WorkerId) -> Self {
        Self {
            id,
            token: CancellationToken::new(),
            lifecycle: Arc::new(Lifecycle::new()),
        }
    }

    pub(crate) const fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    /// Token handed to the worker loop.
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Ticket moved into the worker's task; entering it marks the loop as
    /// running.
    pub(crate) fn ticket(&self, tally: Arc<Tally>) -> Ticket {
        Ticket {
            id: self.id,
            lifecycle: Arc::clone(&self.lifecycle),
            tally,
        }
    }

    /// Triggers the worker's token and consumes the handle.
    ///
    /// Returns `true` if the worker was still alive and is now counted as
    /// exiting. A worker that already returned on its own is not counted.
    pub(crate) fn cancel(self, tally: &Tally) -> bool {
        let pending = self.lifecycle.request_cancel();
        if pending {
            tally.exiting.fetch_add(1, Ordering::AcqRel);
        }
        self.token.cancel();
        pending
    }
}

/// A spawned worker that has not been polled yet.
pub(crate) struct Ticket {
    id: WorkerId,
    lifecycle: Arc<Lifecycle>,
    tally: Arc<Tally>,
}

impl Ticket {
    /// Marks the loop as running. The returned guard must live until the loop
    /// returns.
    pub(crate) fn enter(self) -> ExitGuard {
        self.lifecycle.start();
        self.tally.running.fetch_add(1, Ordering::AcqRel);

        #[cfg(feature = "tracing")]
        tracing::trace!(id = %self.id, "worker started");

        ExitGuard {
            id: self.id,
            lifecycle: self.lifecycle,
            tally: self.tally,
        }
    }
}

/// Settles a worker's exit when dropped, whether the loop returned or
/// unwound.
pub(crate) struct ExitGuard {
    id: WorkerId,
    lifecycle: Arc<Lifecycle>,
    tally: Arc<Tally>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let cancelled = self.lifecycle.exit() == WorkerState::CancelPending;
        if cancelled {
            self.tally.exiting.fetch_sub(1, Ordering::AcqRel);
        }
        self.tally.running.fetch_sub(1, Ordering::AcqRel);

        #[cfg(feature = "tracing")]
        tracing::debug!(id = %self.id, cancelled, "worker exited");

        if let Some(hook) = &self.tally.on_exit {
            hook(WorkerExit {
                id: self.id,
                cancelled,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_runs_to_exit_without_cancel() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), WorkerState::Created);

        lifecycle.start();
        assert_eq!(lifecycle.state(), WorkerState::Running);

        assert_eq!(lifecycle.exit(), WorkerState::Running);
        assert_eq!(lifecycle.state(), WorkerState::Exited);
    }

    #[test]
    fn cancel_before_start_stays_pending() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.request_cancel());

        lifecycle.start();
        assert_eq!(lifecycle.state(), WorkerState::CancelPending);
        assert_eq!(lifecycle.exit(), WorkerState::CancelPending);
    }

    #[test]
    fn cancel_is_one_shot() {
        let lifecycle = Lifecycle::new();
        lifecycle.start();
        assert!(lifecycle.request_cancel());
        assert!(!lifecycle.request_cancel());
    }

    #[test]
    fn cancel_after_exit_is_ignored() {
        let lifecycle = Lifecycle::new();
        lifecycle.start();
        lifecycle.exit();
        assert!(!lifecycle.request_cancel());
        assert_eq!(lifecycle.state(), WorkerState::Exited);
    }

    #[test]
    fn guard_settles_counters_once() {
        let tally = Arc::new(Tally::new(None));
        let handle = Handle::new(WorkerId::new(7));

        let guard = handle.ticket(Arc::clone(&tally)).enter();
        assert_eq!(tally.running(), 1);

        let token = handle.token();
        assert!(handle.cancel(&tally));
        assert!(token.is_cancelled());
        assert_eq!(tally.exiting(), 1);

        drop(guard);
        assert_eq!(tally.running(), 0);
        assert_eq!(tally.exiting(), 0);
    }

    #[test]
    fn self_completed_worker_is_never_exiting() {
        let tally = Arc::new(Tally::new(None));
        let handle = Handle::new(WorkerId::new(1));

        drop(handle.ticket(Arc::clone(&tally)).enter());
        assert!(!handle.cancel(&tally));
        assert_eq!(tally.exiting(), 0);
        assert_eq!(tally.running(), 0);
    }

    #[test]
    fn exit_hook_reports_cancellation() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hook: ExitHook = Arc::new(move |exit: WorkerExit| sink.lock().push(exit));
        let tally = Arc::new(Tally::new(Some(hook)));

        let first = Handle::new(WorkerId::new(1));
        let second = Handle::new(WorkerId::new(2));
        let first_guard = first.ticket(Arc::clone(&tally)).enter();
        let second_guard = second.ticket(Arc::clone(&tally)).enter();

        second.cancel(&tally);
        drop(second_guard);
        drop(first_guard);

        assert_eq!(
            *seen.lock(),
            vec![
                WorkerExit {
                    id: WorkerId::new(2),
                    cancelled: true,
                },
                WorkerExit {
                    id: WorkerId::new(1),
                    cancelled: false,
                },
            ]
        );
    }
}
