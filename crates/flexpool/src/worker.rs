//! The two contracts the pool consumes from its collaborators.
//!
//! A [`WorkerFactory`] turns an opaque configuration value into a [`Worker`].
//! A [`Worker`] is a long-running loop that receives a [`CancellationToken`]
//! and must return promptly once that token is cancelled.
//!
//! Both traits are implemented for closures, so simple pools need no named
//! types at all:
//!
//! ```
//! use flexpool::{CancellationToken, WorkerPool};
//! use core::convert::Infallible;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pool = WorkerPool::new(|_: &()| {
//!     Ok::<_, Infallible>(|token: CancellationToken| async move {
//!         token.cancelled().await;
//!     })
//! });
//!
//! pool.add(2, &()).unwrap();
//! pool.stop().await;
//! assert_eq!(pool.running(), 0);
//! # }
//! ```

use core::future::Future;
use tokio_util::sync::CancellationToken;

/// A long-running, cooperatively cancellable control loop.
///
/// The pool calls [`Worker::run`] exactly once, on a dedicated task. The loop
/// must poll `token` (via [`CancellationToken::is_cancelled`] or by awaiting
/// [`CancellationToken::cancelled`] inside a `select!`) and return once it is
/// triggered. Returning before cancellation is allowed and is treated as the
/// worker completing on its own.
///
/// The pool cannot force a worker to stop. A loop that never observes its
/// token keeps [`WorkerPool::stop`](crate::WorkerPool::stop) waiting forever.
pub trait Worker: Send + 'static {
    /// Runs the loop until `token` is cancelled or the work is done.
    fn run(self, token: CancellationToken) -> impl Future<Output = ()> + Send + 'static;
}

impl<F, Fut> Worker for F
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn run(self, token: CancellationToken) -> impl Future<Output = ()> + Send + 'static {
        self(token)
    }
}

/// Builds [`Worker`]s from a configuration value of type `C`.
///
/// The pool only calls [`WorkerFactory::create`] while holding its internal
/// lock, so calls are never concurrent and the factory may keep mutable state
/// (counters, budgets, connection templates) without synchronization.
///
/// Returning an error aborts the `add` batch in progress.
pub trait WorkerFactory<C: ?Sized>: Send + 'static {
    /// The loop type this factory produces.
    type Worker: Worker;

    /// The error returned when a worker cannot be built.
    type Error;

    /// Builds one worker from `config`.
    ///
    /// # Errors
    ///
    /// Returns the factory's own error when the worker cannot be built.
    fn create(&mut self, config: &C) -> Result<Self::Worker, Self::Error>;
}

impl<F, C, W, E> WorkerFactory<C> for F
where
    C: ?Sized,
    F: FnMut(&C) -> Result<W, E> + Send + 'static,
    W: Worker,
{
    type Worker = W;
    type Error = E;

    fn create(&mut self, config: &C) -> Result<W, E> {
        self(config)
    }
}
