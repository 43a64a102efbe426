//! Console logging for the `flexpool` binary.
//!
//! Events from this binary and from the `flexpool` library (built with its
//! `tracing` feature) are printed through `tracing_subscriber::fmt`. Verbosity
//! follows `RUST_LOG` and defaults to `info`:
//!
//! ```bash
//! RUST_LOG=flexpool=debug,info flexpool --initial-workers 8
//! ```

use anyhow::Context;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("failed to install tracing subscriber")
}
