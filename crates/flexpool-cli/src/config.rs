use anyhow::bail;
use clap::Parser;
use core::time::Duration;

use crate::demo::{WorkerKind, WorkerSpec};

/// Runtime configuration for the `flexpool` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first), with defaults suitable for an interactive session.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "flexpool",
    version,
    about = "Run a resizable pool of demo workers and resize it from stdin"
)]
pub struct CliArgs {
    /// Number of workers started before any command is read.
    ///
    /// Environment variable: `INITIAL_WORKERS`
    #[arg(long, env = "INITIAL_WORKERS", default_value_t = 4)]
    pub initial_workers: usize,

    /// Upper bound on active workers. `+N` commands that would exceed it are
    /// rejected.
    ///
    /// Environment variable: `MAX_WORKERS`
    #[arg(long, env = "MAX_WORKERS", default_value_t = 1024)]
    pub max_workers: usize,

    /// Loop each worker runs.
    ///
    /// `ticker` runs until cancelled; `countdown` exits on its own after
    /// `MAX_TICKS` ticks.
    ///
    /// Environment variable: `WORKER_KIND`
    #[arg(long, env = "WORKER_KIND", value_enum, default_value_t = WorkerKind::Ticker)]
    pub worker_kind: WorkerKind,

    /// Interval between worker ticks, in milliseconds.
    ///
    /// Environment variable: `TICK_MS`
    #[arg(long, env = "TICK_MS", default_value_t = 1000)]
    pub tick_ms: u64,

    /// Ticks a `countdown` worker performs before exiting.
    ///
    /// Environment variable: `MAX_TICKS`
    #[arg(long, env = "MAX_TICKS", default_value_t = 10)]
    pub max_ticks: u64,

    /// Total number of workers the factory will ever build. Unlimited when
    /// unset; once spent, `+N` fails part-way with the workers built so far
    /// left running.
    ///
    /// Environment variable: `SPAWN_BUDGET`
    #[arg(long, env = "SPAWN_BUDGET")]
    pub spawn_budget: Option<usize>,

    /// How long shutdown waits for workers to drain before giving up.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub initial_workers: usize,
    pub max_workers: usize,
    pub spec: WorkerSpec,
    pub spawn_budget: Option<usize>,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for RunConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_workers == 0 {
            bail!("MAX_WORKERS must be greater than 0");
        }

        if args.initial_workers > args.max_workers {
            bail!(
                "INITIAL_WORKERS ({}) exceeds MAX_WORKERS ({})",
                args.initial_workers,
                args.max_workers
            );
        }

        if let Some(budget) = args.spawn_budget {
            if budget < args.initial_workers {
                bail!(
                    "SPAWN_BUDGET ({}) is smaller than INITIAL_WORKERS ({})",
                    budget,
                    args.initial_workers
                );
            }
        }

        if args.tick_ms == 0 {
            bail!("TICK_MS must be greater than 0");
        }

        if args.worker_kind == WorkerKind::Countdown && args.max_ticks == 0 {
            bail!("MAX_TICKS must be greater than 0 for countdown workers");
        }

        Ok(Self {
            initial_workers: args.initial_workers,
            max_workers: args.max_workers,
            spec: WorkerSpec {
                kind: args.worker_kind,
                tick: Duration::from_millis(args.tick_ms),
                max_ticks: args.max_ticks,
            },
            spawn_budget: args.spawn_budget,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<RunConfig> {
        let argv = core::iter::once("flexpool").chain(args.iter().copied());
        RunConfig::try_from(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn defaults_are_valid() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.initial_workers, 4);
        assert_eq!(config.max_workers, 1024);
        assert_eq!(config.spec.kind, WorkerKind::Ticker);
        assert_eq!(config.spec.tick, Duration::from_secs(1));
        assert_eq!(config.spawn_budget, None);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }

    #[test]
    fn parses_countdown_workers() {
        let config = parse(&[
            "--worker-kind",
            "countdown",
            "--max-ticks",
            "3",
            "--tick-ms",
            "5",
            "--spawn-budget",
            "8",
        ])
        .unwrap();

        assert_eq!(
            config.spec,
            WorkerSpec {
                kind: WorkerKind::Countdown,
                tick: Duration::from_millis(5),
                max_ticks: 3,
            }
        );
        assert_eq!(config.spawn_budget, Some(8));
    }

    #[test]
    fn rejects_more_initial_workers_than_max() {
        let err = parse(&["--initial-workers", "9", "--max-workers", "8"]).unwrap_err();
        assert!(err.to_string().contains("exceeds MAX_WORKERS"));
    }

    #[test]
    fn rejects_budget_below_initial_workers() {
        let err = parse(&["--initial-workers", "4", "--spawn-budget", "3"]).unwrap_err();
        assert!(err.to_string().contains("smaller than INITIAL_WORKERS"));
        assert!(parse(&["--initial-workers", "4", "--spawn-budget", "4"]).is_ok());
    }

    #[test]
    fn rejects_zero_tick() {
        assert!(parse(&["--tick-ms", "0"]).is_err());
    }

    #[test]
    fn rejects_empty_countdown() {
        assert!(parse(&["--worker-kind", "countdown", "--max-ticks", "0"]).is_err());
        assert!(parse(&["--worker-kind", "ticker", "--max-ticks", "0"]).is_ok());
    }
}
