//! Transforming HTTP reverse proxy.
//!
//! Sits in front of a single upstream and lets a handler rewrite requests
//! before they are forwarded and responses before they reach the client.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ path filters ──▶ request pipeline ──▶ Upstream
//!                     (/health,        (hidden paths,   (body parsing,
//!                      request id)      extensions)      request hook)
//!
//!     Client Response
//!     ◀────────────── response engine ◀──────────────────────────────────── Upstream
//!                     (passthrough / stream / buffer / buffer-stream,
//!                      response hook, header normalization)
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use transform_proxy::config;
use transform_proxy::handlers;
use transform_proxy::http::HttpServer;
use transform_proxy::lifecycle::{self, Drained, Shutdown};
use transform_proxy::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "transform-proxy", version, about = "Transforming HTTP reverse proxy")]
struct Cli {
    /// TOML configuration file; environment variables override it.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if cli.check {
        println!("configuration OK");
        return ExitCode::SUCCESS;
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "transform-proxy starting");

    match run(config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: config::ProxyConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let handler_set = handlers::resolve(&config.handler)?;
    let grace = Duration::from_secs(config.shutdown.grace_period_secs);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config, handler_set)?;
    let shutdown = Shutdown::new();
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        signal = lifecycle::wait_for_signal() => {
            tracing::info!(signal, "Shutdown signal received");
        }
        ended = &mut server_task => {
            shutdown.trigger();
            let reason = match ended {
                Ok(Ok(())) => "server stopped unexpectedly".to_string(),
                Ok(Err(e)) => format!("server failed: {e}"),
                Err(e) => format!("server task panicked: {e}"),
            };
            return Err(reason.into());
        }
    }

    shutdown.trigger();
    match lifecycle::drain(&mut server_task, grace).await {
        Drained::Finished(result) => result?,
        Drained::Panicked(e) => return Err(format!("server task panicked: {e}").into()),
        Drained::TimedOut => {
            tracing::warn!(grace_secs = grace.as_secs(), "Grace period elapsed, forcing exit");
            return Err("requests still in flight after the grace period".into());
        }
    }
    Ok(())
}
