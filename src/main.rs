#![forbid(unsafe_code)]

//! `midi-relay`: pull-based MIDI relay binary.
//!
//! `playback` accepts producers and plays back what it pulls from them;
//! `controller` serves stdin input as a stream to a playback peer.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use midi_relay::config::GlobalConfig;
use midi_relay::device::console::spawn_stdin_source;
use midi_relay::device::LogSink;
use midi_relay::node::Node;
use midi_relay::transport::udp::UdpFace;
use midi_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "midi-relay", about = "Pull-based MIDI relay", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the project name.
    #[arg(long)]
    project: Option<String>,

    /// Override the local UDP bind address.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Override the upstream peer address.
    #[arg(long)]
    upstream: Option<SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Accept producers and play back their messages.
    Playback,

    /// Serve stdin input as this peer's stream.
    Controller {
        /// Identifier of this peer; names its stream.
        id: String,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(project) = args.project {
        config.project = project;
    }
    if let Some(bind) = args.bind {
        config.network.bind = bind;
    }
    if let Some(upstream) = args.upstream {
        config.network.upstream = upstream;
    }
    config.validate()?;
    info!(project = %config.project, "configuration loaded");

    // ── Transport and node ──────────────────────────────
    let ct = CancellationToken::new();
    let (face, events, face_handle) =
        UdpFace::bind(config.network.bind, config.network.upstream, ct.clone()).await?;
    let node = Arc::new(Node::new(&config, face, Arc::new(LogSink))?);

    match &args.command {
        Command::Playback => {
            if let Err(err) = node.start_playback().await {
                error!(%err, "failed to register prefix");
                return Err(err);
            }
        }
        Command::Controller { id } => {
            if let Err(err) = node.start_controller(id).await {
                error!(%err, "failed to register prefix");
                return Err(err);
            }
        }
    }

    let mut handles = node.spawn(events, &ct);
    handles.push(face_handle);
    info!("relay ready");

    // ── Run until shutdown ──────────────────────────────
    match args.command {
        Command::Playback => shutdown_signal().await,
        Command::Controller { id } => {
            let source = spawn_stdin_source(Arc::clone(node.responder()), id.clone(), ct.clone());
            tokio::select! {
                () = shutdown_signal() => {}
                () = wait_for_close(&node, &id, source) => {}
            }
        }
    }
    info!("shutting down");
    ct.cancel();

    for handle in handles {
        let _ = handle.await;
    }
    info!("midi-relay shut down");
    Ok(())
}

/// Resolve once the input source has finished and the served session has
/// either been closed by its termination message or lost its connection.
async fn wait_for_close(node: &Node, id: &str, source: tokio::task::JoinHandle<()>) {
    let _ = source.await;
    while node.serving(id).await {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if node.served_sessions().contains(id).await {
        warn!(remote = id, "input ended while disconnected, termination not delivered");
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
