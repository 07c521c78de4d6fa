//! CLI entry point for cmdgate.
//!
//! This binary runs commands through the resilient gateway, serves debounced
//! file changes over WebSocket, and listens to such a server.
//!
//! # Usage
//!
//! ```bash
//! cmdgate [OPTIONS] <COMMAND>
//!
//! # Run one command through the gateway and print its result as JSON
//! cmdgate exec -- git status --porcelain
//!
//! # Watch a directory and broadcast changes
//! cmdgate serve --root ./data --pattern '*.json'
//!
//! # Print every change pushed by a server
//! cmdgate listen --url ws://127.0.0.1:4455/ws --topic changes
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use cg_broadcast::{BroadcastServer, ChangeBroadcaster};
use cg_channel::{ChannelEvent, ReconnectingChannel};
use cg_core::Config;
use cg_gateway::CommandGateway;
use cg_watcher::FileWatcher;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Resilient command gateway and file change broadcaster.
#[derive(Parser)]
#[command(name = "cmdgate", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON configuration file.
    ///
    /// Missing sections and fields fall back to their defaults.
    #[arg(short, long, global = true, env = "CMDGATE_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run one command through the gateway and print the result as JSON.
    ///
    /// The exit status mirrors the command's exit code.
    Exec {
        /// Per-call timeout in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Executable to run. Not interpreted by a shell.
        command: String,

        /// Arguments passed to the executable as-is.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Watch a directory and broadcast changes until interrupted.
    Serve {
        /// Directory to watch.
        #[arg(short, long, env = "CMDGATE_ROOT")]
        root: Option<Utf8PathBuf>,

        /// Glob pattern to watch (repeatable). `!` excludes.
        #[arg(short, long = "pattern")]
        patterns: Vec<String>,

        /// Address to bind the WebSocket server to.
        #[arg(short, long, env = "CMDGATE_BIND")]
        bind: Option<String>,

        /// Quiet period per path before a change is emitted.
        #[arg(long)]
        debounce_ms: Option<u64>,
    },

    /// Connect to a server and print each change as a JSON line.
    Listen {
        /// WebSocket URL of the server.
        #[arg(short, long, env = "CMDGATE_URL")]
        url: Option<String>,

        /// Topic to subscribe to (repeatable). None means all.
        #[arg(short, long = "topic")]
        topics: Vec<String>,
    },
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
/// Noisy transport crates are filtered to `warn` level.
///
/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!(
            "{level},hyper=warn,mio=warn,notify=warn,tungstenite=warn,tokio_tungstenite=warn"
        ))
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(use_ansi)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Loads the configuration file if one was given, otherwise the defaults.
fn load_config(cli: &Cli) -> color_eyre::Result<Config> {
    match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!(path = %path, "Loaded configuration");
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Runs one command and prints its [`CommandResult`](cg_gateway::CommandResult).
async fn run_exec(
    mut config: Config,
    command: String,
    args: Vec<String>,
    timeout_ms: Option<u64>,
) -> color_eyre::Result<ExitCode> {
    if let Some(timeout_ms) = timeout_ms {
        config.gateway.timeout_ms = timeout_ms;
    }
    config.validate()?;

    let gateway = CommandGateway::new(config.gateway);
    let result = gateway.execute(command, args).await?;

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    serde_json::to_writer_pretty(&mut handle, &result)?;
    writeln!(handle)?;

    Ok(ExitCode::from(exit_status(result.exit_code)))
}

/// Watches, broadcasts, and serves until a shutdown signal arrives.
async fn run_serve(
    mut config: Config,
    root: Option<Utf8PathBuf>,
    patterns: Vec<String>,
    bind: Option<String>,
    debounce_ms: Option<u64>,
) -> color_eyre::Result<ExitCode> {
    if let Some(root) = root {
        config.watch.root = root;
    }
    if !patterns.is_empty() {
        config.watch.patterns = patterns;
    }
    if let Some(bind) = bind {
        config.broadcast.bind = bind;
    }
    if let Some(debounce_ms) = debounce_ms {
        config.watch.debounce_ms = debounce_ms;
    }
    config.validate()?;

    let mut watcher = FileWatcher::from_config(&config.watch).await?;
    let broadcaster = ChangeBroadcaster::new(config.broadcast.outbound_buffer);
    let server = BroadcastServer::bind(broadcaster.clone(), &config.broadcast).await?;
    info!(url = %server.url(), root = %watcher.watch_path(), "Serving changes");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_shutdown_signal().await;
            shutdown.cancel();
        }
    });

    broadcaster.pump(&mut watcher, shutdown.clone()).await;
    if !shutdown.is_cancelled() {
        warn!("Watcher stopped unexpectedly");
    }

    // Timers go first so nothing is published into a closing server.
    watcher.stop().await?;
    server.shutdown().await?;
    Ok(ExitCode::SUCCESS)
}

/// Prints every change from a [`ReconnectingChannel`] as a JSON line.
async fn run_listen(
    mut config: Config,
    url: Option<String>,
    topics: Vec<String>,
) -> color_eyre::Result<ExitCode> {
    if let Some(url) = url {
        config.channel.url = url;
    }
    if !topics.is_empty() {
        config.channel.topics = topics;
    }
    config.validate()?;

    info!(url = %config.channel.url, topics = ?config.channel.topics, "Listening");
    let mut channel = ReconnectingChannel::connect(config.channel).await;

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            event = channel.recv() => match event {
                Some(ChannelEvent::Change(change)) => {
                    let stdout = std::io::stdout();
                    let mut handle = stdout.lock();
                    serde_json::to_writer(&mut handle, &change)?;
                    writeln!(handle)?;
                }
                Some(ChannelEvent::Connected { client_id }) => {
                    info!(client_id = %client_id, "Connected");
                }
                Some(ChannelEvent::StateChanged(state)) => {
                    info!(state = %state, "Channel state changed");
                }
                Some(ChannelEvent::Reconnecting { attempt, delay }) => {
                    info!(attempt, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "Reconnect scheduled");
                }
                Some(ChannelEvent::ServerError { code, message }) => {
                    warn!(code = %code, message = %message, "Server error");
                }
                Some(ChannelEvent::Diagnostic(message)) => {
                    warn!(diagnostic = %message, "Connection problem");
                }
                None => break,
            },
        }
    }

    channel.disconnect().await;
    Ok(ExitCode::SUCCESS)
}

/// Maps a child exit code onto this process's exit status.
///
/// Codes outside `0..=255` (negative on some platforms) become 1.
fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Load configuration
    let config = load_config(&cli)?;

    // 5. Route to appropriate command
    match cli.command {
        Commands::Exec {
            timeout_ms,
            command,
            args,
        } => run_exec(config, command, args, timeout_ms).await,
        Commands::Serve {
            root,
            patterns,
            bind,
            debounce_ms,
        } => run_serve(config, root, patterns, bind, debounce_ms).await,
        Commands::Listen { url, topics } => run_listen(config, url, topics).await,
    }
}
