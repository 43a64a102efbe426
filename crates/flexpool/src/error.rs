//! Error types for the worker pool.
//!
//! Only [`WorkerPool::add`] (and [`WorkerPool::resize`] when growing) can
//! fail. Shrinking past the number of active workers is bounded rather than
//! reported, and [`WorkerPool::stop`] is unconditional.
//!
//! ## Error Cases
//! - `Factory`: the worker factory refused to build a worker. Workers already
//!   spawned by the same call stay active.
//! - `Stopped`: the pool has been stopped and no longer accepts workers.
//!
//! [`WorkerPool::add`]: crate::WorkerPool::add
//! [`WorkerPool::resize`]: crate::WorkerPool::resize
//! [`WorkerPool::stop`]: crate::WorkerPool::stop

/// A result whose error carries the factory's own error type `E`.
pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// All possible errors that the pool can produce.
///
/// The generic parameter `E` is the error type of the
/// [`WorkerFactory`](crate::WorkerFactory) in use.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error<E> {
    /// The factory failed while building a worker.
    ///
    /// The batch was aborted at the failing worker. Workers built earlier in
    /// the same batch are still running; call `reduce` to roll them back.
    #[error("worker factory failed: {0}")]
    Factory(E),

    /// The pool has been stopped and cannot spawn new workers.
    #[error("worker pool has been stopped")]
    Stopped,
}

impl<E> Error<E> {
    /// Returns the factory error, if this is a construction failure.
    pub fn into_factory_error(self) -> Option<E> {
        match self {
            Self::Factory(e) => Some(e),
            Self::Stopped => None,
        }
    }
}
