#![doc = include_str!("../README.md")]

mod error;
mod handle;
mod pool;
mod worker;

pub use crate::error::*;
pub use crate::handle::{WorkerExit, WorkerId, WorkerState};
pub use crate::pool::{Builder, Resize, WorkerPool};
pub use crate::worker::{Worker, WorkerFactory};
// Workers receive this token; re-exported so callers need not depend on
// `tokio-util` directly.
pub use tokio_util::sync::CancellationToken;
