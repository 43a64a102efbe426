//! Line-oriented control of a running pool.
//!
//! Each input line is parsed into a [`Command`] and applied to the pool until
//! `stop` is read or the shutdown future resolves. Closing the input does not
//! stop the pool; only `stop` or a signal does.

use core::{future::Future, str::FromStr};
use flexpool::{Error, WorkerPool};
use std::io;
use tokio_stream::{Stream, StreamExt};

use crate::config::RunConfig;
use crate::demo::DemoFactory;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// `+N`
    Grow(usize),
    /// `-N`
    Shrink(usize),
    Status,
    Stop,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("expected a worker count after `{sign}`, got {input:?}")]
    InvalidCount { sign: char, input: String },

    #[error("unknown command {0:?} (expected +N, -N, status or stop)")]
    Unknown(String),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let count = |sign: char, digits: &str| {
            digits
                .trim()
                .parse::<usize>()
                .map_err(|_| CommandError::InvalidCount {
                    sign,
                    input: line.to_owned(),
                })
        };

        if let Some(digits) = line.strip_prefix('+') {
            return count('+', digits).map(Command::Grow);
        }
        if let Some(digits) = line.strip_prefix('-') {
            return count('-', digits).map(Command::Shrink);
        }

        match line.to_ascii_lowercase().as_str() {
            "status" => Ok(Self::Status),
            "stop" | "quit" | "exit" => Ok(Self::Stop),
            _ => Err(CommandError::Unknown(line.to_owned())),
        }
    }
}

/// Whether the control loop should keep reading after a command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Applies commands from `lines` to `pool` until `stop` is read or `shutdown`
/// resolves. Does not stop the pool itself.
pub async fn drive<S, Sig>(
    pool: &WorkerPool<DemoFactory>,
    config: &RunConfig,
    mut lines: S,
    shutdown: Sig,
) where
    S: Stream<Item = io::Result<String>> + Unpin,
    Sig: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut input_open = true;

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            line = lines.next(), if input_open => match line {
                Some(Ok(line)) if line.trim().is_empty() => {}
                Some(Ok(line)) => match line.parse::<Command>() {
                    Ok(command) => {
                        if apply(pool, config, command) == Flow::Stop {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Ignoring command"),
                },
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Failed to read command input, waiting for a signal");
                    input_open = false;
                }
                None => {
                    tracing::info!("Command input closed, waiting for a signal");
                    input_open = false;
                }
            },
        }
    }
}

fn apply(pool: &WorkerPool<DemoFactory>, config: &RunConfig, command: Command) -> Flow {
    match command {
        Command::Grow(count) => {
            // Finished countdown workers must not hold slots under the cap.
            let pruned = pool.prune();
            if pruned > 0 {
                tracing::debug!(pruned, "Dropped finished workers before growing");
            }

            let active = pool.active();
            if active.saturating_add(count) > config.max_workers {
                tracing::warn!(
                    active,
                    requested = count,
                    max_workers = config.max_workers,
                    "Refusing to grow past MAX_WORKERS"
                );
                return Flow::Continue;
            }

            match pool.add(count, &config.spec) {
                Ok(ids) => tracing::info!(added = ids.len(), active = pool.active(), "Pool grown"),
                Err(Error::Factory(e)) => tracing::warn!(
                    error = %e,
                    active = pool.active(),
                    "Pool only partially grown"
                ),
                Err(e) => {
                    tracing::warn!(error = %e, "Pool no longer accepts workers");
                    return Flow::Stop;
                }
            }
        }
        Command::Shrink(count) => {
            let cancelled = pool.reduce(count);
            tracing::info!(cancelled, active = pool.active(), "Pool shrunk");
        }
        Command::Status => {
            tracing::info!(
                running = pool.running(),
                exiting = pool.exiting(),
                active = pool.active(),
                "Pool status"
            );
        }
        Command::Stop => return Flow::Stop,
    }

    Flow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::{WorkerKind, WorkerSpec};
    use core::time::Duration;

    fn config(max_workers: usize) -> RunConfig {
        RunConfig {
            initial_workers: 0,
            max_workers,
            spec: WorkerSpec {
                kind: WorkerKind::Ticker,
                tick: Duration::from_millis(10),
                max_ticks: 0,
            },
            spawn_budget: None,
            shutdown_timeout: Duration::from_secs(1),
        }
    }

    fn script(lines: &[&str]) -> impl Stream<Item = io::Result<String>> + Unpin + use<> {
        let owned: Vec<io::Result<String>> = lines.iter().map(|line| Ok(line.to_string())).collect();
        tokio_stream::iter(owned)
    }

    #[test]
    fn parses_commands() {
        assert_eq!("+3".parse::<Command>(), Ok(Command::Grow(3)));
        assert_eq!(" - 2 ".parse::<Command>(), Ok(Command::Shrink(2)));
        assert_eq!("STATUS".parse::<Command>(), Ok(Command::Status));
        assert_eq!("quit".parse::<Command>(), Ok(Command::Stop));
    }

    #[test]
    fn rejects_bad_commands() {
        assert_eq!(
            "+many".parse::<Command>(),
            Err(CommandError::InvalidCount {
                sign: '+',
                input: "+many".to_owned(),
            })
        );
        assert_eq!("-".parse::<Command>().map_err(|_| ()), Err(()));
        assert_eq!(
            "grow".parse::<Command>(),
            Err(CommandError::Unknown("grow".to_owned()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn drive_applies_commands_until_stop() {
        let pool = WorkerPool::new(DemoFactory::default());
        let config = config(16);

        drive(
            &pool,
            &config,
            script(&["+3", "", "bogus", "-1", "status", "stop", "+5"]),
            core::future::pending(),
        )
        .await;

        assert_eq!(pool.active(), 2);
        pool.stop().await;
        assert_eq!(pool.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drive_respects_max_workers() {
        let pool = WorkerPool::new(DemoFactory::default());
        let config = config(4);

        drive(
            &pool,
            &config,
            script(&["+3", "+2", "+1", "stop"]),
            core::future::pending(),
        )
        .await;

        assert_eq!(pool.active(), 4);
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn finished_countdown_workers_free_their_slots() {
        let pool = WorkerPool::new(DemoFactory::default());
        let mut config = config(2);
        config.spec = WorkerSpec {
            kind: WorkerKind::Countdown,
            tick: Duration::from_millis(10),
            max_ticks: 3,
        };

        pool.add(2, &config.spec).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.running(), 0);
        assert_eq!(pool.active(), 2);

        assert_eq!(apply(&pool, &config, Command::Grow(1)), Flow::Continue);
        assert_eq!(pool.active(), 1);

        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn drive_keeps_partial_growth_on_factory_error() {
        let pool = WorkerPool::new(DemoFactory::new(Some(2)));
        let config = config(16);

        drive(
            &pool,
            &config,
            script(&["+5", "stop"]),
            core::future::pending(),
        )
        .await;

        assert_eq!(pool.active(), 2);
        pool.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn closed_input_waits_for_shutdown() {
        let pool = WorkerPool::new(DemoFactory::default());
        let config = config(16);

        drive(
            &pool,
            &config,
            script(&["+1"]),
            tokio::time::sleep(Duration::from_secs(30)),
        )
        .await;

        assert_eq!(pool.active(), 1);
        pool.stop().await;
    }
}
