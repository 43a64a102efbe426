#![doc = include_str!("../README.md")]

mod config;
mod control;
mod demo;
mod telemetry;

use anyhow::Context;
use clap::Parser;
use config::{CliArgs, RunConfig};
use demo::DemoFactory;
use flexpool::WorkerPool;
use telemetry::init_telemetry;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_stream::wrappers::LinesStream;

// Using mimalloc for better performance when workers are churned rapidly.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = RunConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    let pool = WorkerPool::builder(DemoFactory::new(config.spawn_budget))
        .on_exit(|exit| {
            tracing::debug!(id = %exit.id, cancelled = exit.cancelled, "Worker returned");
        })
        .build();

    pool.add(config.initial_workers, &config.spec)
        .context("failed to start initial workers")?;

    let stdin = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    control::drive(&pool, &config, stdin, shutdown_signal()).await;

    tracing::info!(
        running = pool.running(),
        exiting = pool.exiting(),
        "Shutting down, draining workers"
    );

    // The pool never gives up on a worker; bound the wait here instead.
    match tokio::time::timeout(config.shutdown_timeout, pool.stop()).await {
        Ok(()) => {
            tracing::info!("All workers drained");
            Ok(())
        }
        Err(_) => anyhow::bail!(
            "shutdown timed out after {:?} with {} workers still running",
            config.shutdown_timeout,
            pool.running()
        ),
    }
}

fn log_startup_info(config: &RunConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting worker pool with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting worker pool with {} {:?} workers",
            config.initial_workers,
            config.spec.kind
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
