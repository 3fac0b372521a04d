//! Demo host for the SSE emitter.
//!
//! Serves a welcome comment followed by a JSON fixture (or a ticker) to every browser
//! that connects, or streams the same sequence once to stdout.
//!
//! # Usage
//!
//! ```bash
//! # With config file
//! message-stream-rs config/server.toml
//!
//! # With environment variables
//! SSE_LISTEN_ADDR=0.0.0.0:8080 SSE_WAIT_SECS=2 message-stream-rs
//!
//! # One run against the terminal
//! message-stream-rs --stdout --wait 0
//!
//! # Five ticks, one per second
//! SSE_TICK_LIMIT=5 message-stream-rs --stdout --ticker
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use nix::libc;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use message_stream_rs::{
    config::{Config, DemoProducer, LoggingConfig},
    metrics::{init_metrics, start_metrics_server},
    producer::demo,
    server::{ConnectionHandler, SseListener},
    shutdown::ShutdownCoordinator,
    streaming::EventStream,
};

/// Server-Sent Events demo host.
#[derive(Parser, Debug)]
#[command(name = "message-stream-rs")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Override listen address.
    #[arg(short, long)]
    listen: Option<String>,

    /// JSON fixture to replay after the welcome message.
    #[arg(short, long)]
    fixture: Option<PathBuf>,

    /// Seconds to wait between fixture entries.
    #[arg(short, long)]
    wait: Option<u64>,

    /// Send numbered tick events instead of the fixture.
    #[arg(long)]
    ticker: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Stream the demo once to stdout instead of serving HTTP.
    #[arg(long)]
    stdout: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_ref())?;

    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(fixture) = args.fixture {
        config.demo.fixture_path = Some(fixture);
    }
    if let Some(wait) = args.wait {
        config.demo.wait_secs = wait;
    }
    if args.ticker {
        config.demo.producer = DemoProducer::Ticker;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    // Stdout carries the event stream in --stdout mode, so logs go to stderr.
    init_logging(&config.logging)?;

    let fixture = match &config.demo.fixture_path {
        Some(path) => demo::load_fixture(path)?,
        None => demo::parse_fixture(demo::DEFAULT_FIXTURE)?,
    };

    if args.stdout {
        return run_stdout(fixture, &config).await;
    }

    raise_fd_limit(config.server.max_connections);

    tracing::info!(
        listen_addr = %config.server.listen_addr,
        path = %config.server.path,
        max_connections = config.server.max_connections,
        "Starting SSE demo host"
    );

    init_metrics();
    if config.metrics.enabled {
        let addr = config.metrics.listen_addr.parse()?;
        start_metrics_server(addr).await?;
    }

    let shutdown = ShutdownCoordinator::new();
    let listener = SseListener::bind(&config.server, shutdown.clone()).await?;

    tracing::info!(addr = %listener.local_addr(), "Listening");

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = handle_signals(signal_shutdown).await {
            tracing::error!(error = %e, "Signal handling failed");
        }
    });

    let handler = Arc::new(ConnectionHandler::new(
        config.clone(),
        fixture,
        shutdown.clone(),
    )?);

    while let Some(conn) = listener.accept().await {
        tracing::debug!(peer = %conn.peer, id = conn.guard.id(), "Accepted connection");
        let handler = handler.clone();
        tokio::spawn(async move {
            handler.handle(conn.stream, conn.guard).await;
        });
    }
    tracing::info!("Accept loop terminated");

    tracing::info!(
        active = shutdown.active_connections(),
        timeout_secs = config.server.shutdown_timeout_secs,
        "Waiting for streams to drain"
    );

    match tokio::time::timeout(config.server.shutdown_timeout(), shutdown.wait_for_drain()).await {
        Ok(()) => tracing::info!("All streams drained"),
        Err(_) => tracing::warn!(
            active = shutdown.active_connections(),
            "Shutdown timeout reached, forcing exit"
        ),
    }

    tracing::info!("Server stopped");
    Ok(())
}

/// Run the demo producer once against process stdout.
async fn run_stdout(fixture: serde_json::Value, config: &Config) -> anyhow::Result<()> {
    let wait = config.demo.wait();
    let demo_config = &config.demo;
    let mut stream = EventStream::stdout();
    if let Some(interval) = config.stream.heartbeat_interval() {
        stream = stream.with_heartbeat(interval);
    }

    let summary = stream
        .run(|| demo::from_config(demo_config, &fixture, wait))
        .await?;
    stream.close().await?;

    tracing::info!(
        termination = ?summary.termination,
        messages = summary.messages_sent,
        bytes = summary.bytes_written,
        "Stream finished"
    );
    Ok(())
}

/// Initialize logging with tracing. Output goes to stderr.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

/// Make sure the soft descriptor limit covers `max_connections` plus some headroom.
/// Only the soft limit is raised, up to the hard limit.
fn raise_fd_limit(max_connections: usize) {
    let wanted = max_connections as u64 + 64;

    // SAFETY: getrlimit/setrlimit only read and write the struct we pass in.
    unsafe {
        let mut rlim = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) != 0 {
            return;
        }
        let current = rlim.rlim_cur as u64;
        if current >= wanted {
            return;
        }

        let target = wanted.min(rlim.rlim_max as u64);
        rlim.rlim_cur = target as libc::rlim_t;
        if libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) == 0 {
            tracing::info!(from = current, to = target, "Raised open file limit");
        } else {
            tracing::warn!(limit = current, "Could not raise open file limit");
        }
    }
}

/// Handle Unix signals: SIGINT/SIGTERM shut down, SIGHUP logs a status line.
async fn handle_signals(shutdown: ShutdownCoordinator) -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating shutdown");
                shutdown.shutdown();
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
                shutdown.shutdown();
                break;
            }
            _ = sighup.recv() => {
                tracing::info!(
                    active_connections = shutdown.active_connections(),
                    "Received SIGHUP, status report"
                );
            }
        }
    }

    Ok(())
}
