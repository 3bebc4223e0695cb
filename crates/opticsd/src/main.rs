//! The polling daemon: wires the poller to whichever backends the caller
//! selected on the command line and runs it on a fixed period until
//! SIGINT. CLI parsing, logging, and shutdown follow a clap + tracing +
//! `tokio::select!` over `signal::ctrl_c()` shape.

use anyhow::{bail, Context, Result};
use clap::Parser;
use optics_backends::{CarbonBackend, ScrapeState, StdoutBackend};
use optics_poller::Poller;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::EnvFilter;

/// Out-of-process metrics polling daemon.
#[derive(Parser, Debug)]
#[command(author, version, about = "Poll optics regions and publish their metrics", long_about = None)]
struct Cli {
    /// Enable the stdout backend.
    #[arg(long)]
    dump_stdout: bool,

    /// Enable the carbon line-protocol backend, connecting to HOST[:PORT]
    /// (default port 2003).
    #[arg(long, value_name = "HOST[:PORT]")]
    dump_carbon: Option<String>,

    /// Enable the Prometheus scrape endpoint at /metrics/prometheus.
    #[arg(long)]
    dump_prometheus: bool,

    /// Enable the JSON scrape endpoint at /metrics/json.
    #[arg(long)]
    dump_rest: bool,

    /// Polling period in seconds, minimum 1.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    freq: u64,

    /// Address the embedded scrape server binds, when a scrape backend is
    /// enabled. Not part of the daemon's documented flag contract; exposed
    /// for deployments that cannot use the default.
    #[arg(long, default_value = "127.0.0.1:9090")]
    bind: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "opticsd exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut poller = Poller::new();
    let mut any_backend = false;

    if cli.dump_stdout {
        poller.add_backend(Box::new(StdoutBackend::new())).context("too many backends registered")?;
        any_backend = true;
    }

    if let Some(target) = &cli.dump_carbon {
        poller
            .add_backend(Box::new(CarbonBackend::new(normalize_carbon_target(target))))
            .context("too many backends registered")?;
        any_backend = true;
    }

    let scrape_state = if cli.dump_prometheus || cli.dump_rest {
        let state = ScrapeState::new();
        poller.add_backend(state.backend()).context("too many backends registered")?;
        any_backend = true;
        Some(state)
    } else {
        None
    };

    if !any_backend {
        bail!("no backend selected: pass at least one of --dump-stdout, --dump-carbon, --dump-prometheus, --dump-rest");
    }

    let server = match &scrape_state {
        Some(state) => {
            let listener = tokio::net::TcpListener::bind(&cli.bind)
                .await
                .with_context(|| format!("failed to bind embedded server on {}", cli.bind))?;
            tracing::info!(addr = %cli.bind, "embedded scrape server listening");
            let router = state.router(cli.dump_prometheus, cli.dump_rest);
            Some(axum::serve(listener, router.into_make_service()))
        }
        None => None,
    };

    let running = Arc::new(AtomicBool::new(true));
    let poll_running = running.clone();
    let freq = Duration::from_secs(cli.freq);
    let poll_thread = std::thread::spawn(move || {
        while poll_running.load(Ordering::Relaxed) {
            if let Err(err) = poller.poll() {
                tracing::error!(error = %err, "poll round failed");
            }
            std::thread::sleep(freq);
        }
    });

    match server {
        Some(server) => {
            tokio::select! {
                result = server => result.context("embedded server exited with error")?,
                _ = signal::ctrl_c() => tracing::warn!("received Ctrl+C, shutting down"),
            }
        }
        None => {
            signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
            tracing::warn!("received Ctrl+C, shutting down");
        }
    }

    running.store(false, Ordering::Relaxed);
    let _ = poll_thread.join();
    Ok(())
}

fn normalize_carbon_target(raw: &str) -> String {
    if raw.contains(':') {
        raw.to_string()
    } else {
        format!("{raw}:2003")
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_carbon_target_applies_default_port() {
        assert_eq!(normalize_carbon_target("graphite.internal"), "graphite.internal:2003");
        assert_eq!(normalize_carbon_target("graphite.internal:3003"), "graphite.internal:3003");
    }
}
