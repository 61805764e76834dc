//! chatrelay-server: text chat relay over length-prefixed TCP frames.
//!
//! Clients register a display name with `HI`, list peers with `CLIENTS`, and
//! send each other messages with `MSG`. The server pings every registered
//! client once per keepalive interval.

mod config;
mod connection;
mod dispatcher;
mod error;
mod keepalive;
mod registry;
mod server;

use clap::Parser;
use config::{ConfigOverrides, ServerConfig};
use server::ChatServer;
use std::path::PathBuf;
use tracing::{error, info};

/// chatrelay-server — routes text messages between named TCP clients
#[derive(Parser, Debug)]
#[command(name = "chatrelay-server", version, about = "Chat relay server")]
struct Cli {
    /// Bind address (host:port, or :port for all interfaces)
    #[arg(long = "bind", visible_alias = "bindAddr")]
    bind: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.chatrelay/config.toml")]
    config: String,

    /// Deadline for reading a frame's 2-byte length prefix, in milliseconds
    #[arg(long)]
    read_length_timeout_ms: Option<u64>,

    /// Deadline for reading a frame's payload, in milliseconds
    #[arg(long)]
    read_packet_timeout_ms: Option<u64>,

    /// Interval between PING broadcasts, in milliseconds
    #[arg(long)]
    keepalive_interval_ms: Option<u64>,

    /// Deadline for writing one frame to a client, in milliseconds
    #[arg(long)]
    write_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Include source file and line numbers in logs
    #[arg(long, env = "LOG_LINES")]
    log_lines: bool,
}

#[tokio::main]
async fn main() {
    // A .env file in the working directory may supply LOG_* variables.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let overrides = ConfigOverrides {
        bind: cli.bind,
        read_length_timeout_ms: cli.read_length_timeout_ms,
        read_packet_timeout_ms: cli.read_packet_timeout_ms,
        keepalive_interval_ms: cli.keepalive_interval_ms,
        write_timeout_ms: cli.write_timeout_ms,
        log_level: cli.log_level,
        log_json: cli.log_json,
        log_lines: cli.log_lines,
    };
    let config_path = PathBuf::from(&cli.config);
    let server_config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing("info", false, false);
            error!(error = %e, config = %cli.config, "failed to load config");
            std::process::exit(1);
        }
    };

    init_tracing(
        &server_config.log_level,
        server_config.log_json,
        server_config.log_lines,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %server_config.bind,
        "starting chatrelay-server"
    );

    let chat_server = match ChatServer::bind(server_config).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };
    if let Ok(addr) = chat_server.local_addr() {
        info!(addr = %addr, "the server is running");
    }

    let shutdown = chat_server.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("received shutdown signal");
        shutdown.cancel();
    });

    chat_server.run().await;
}

fn init_tracing(level: &str, json: bool, lines: bool) {
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_file(lines)
        .with_line_number(lines);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
