//! ableton-mcp - MCP bridge to Ableton Live via AbletonOSC
//!
//! Without a subcommand the binary serves MCP on stdin/stdout; the other
//! subcommands run a single operation and print the result.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ableton_mcp::cli::{self, ToolCommand};
use ableton_mcp::config::AppConfig;
use ableton_mcp::mcp::{serve_stdio, AbletonMcp};
use ableton_mcp::paths::AppPaths;
use ableton_mcp::BridgeContext;

/// Ableton MCP - query and export Ableton Live tracks from an AI assistant
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "ABLETON_MCP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// AbletonOSC host (overrides config and ABLETON_OSC_HOST)
    #[arg(long)]
    host: Option<String>,

    /// AbletonOSC port (overrides config and ABLETON_OSC_PORT)
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve MCP tools over stdio (default)
    Serve,
    #[command(flatten)]
    Tool(ToolCommand),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let paths = AppPaths::detect(args.config.as_deref())?;
    let mut config = AppConfig::load_or_default(paths.config.as_deref()).await?;
    if let Some(host) = args.host {
        config.osc.host = host;
    }
    if let Some(port) = args.port {
        config.osc.send_port = port;
    }
    config.validate().context("Invalid configuration")?;

    let serving = matches!(args.command, None | Some(Command::Serve));
    // One-shot commands print their own output; keep logs to warnings
    let level = args
        .log_level
        .clone()
        .or_else(|| config.logging.level.clone())
        .unwrap_or_else(|| if serving { "info" } else { "warn" }.to_string());
    let log_dir = if config.logging.file {
        Some(paths.ensure_logs_dir()?.to_path_buf())
    } else {
        None
    };
    let _log_guard = init_logging(&level, args.json_logs, log_dir.as_deref())?;

    info!("Starting ableton-mcp v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", paths.config_label());

    let ctx = Arc::new(BridgeContext::new(config));

    let code = match args.command {
        None | Some(Command::Serve) => {
            serve(Arc::clone(&ctx)).await?;
            cli::EXIT_OK
        },
        Some(Command::Tool(command)) => {
            let code = cli::run(&ctx, command).await;
            ctx.shutdown().await;
            code
        },
    };

    Ok(ExitCode::from(code))
}

async fn serve(ctx: Arc<BridgeContext>) -> Result<()> {
    let mcp = Arc::new(AbletonMcp::new(Arc::clone(&ctx)));

    tokio::select! {
        result = serve_stdio(mcp) => result?,
        _ = shutdown_signal() => {},
    }

    ctx.shutdown().await;
    info!("ableton-mcp shutdown complete");
    Ok(())
}

/// Logs go to stderr; stdout belongs to the JSON-RPC stream
fn init_logging(level: &str, json: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
    });
    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ableton-mcp.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
