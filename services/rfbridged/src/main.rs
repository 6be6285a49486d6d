// rfbridged: 433 MHz RF to TCP/JSON bridge daemon.

use clap::Parser;
use rfbridged::config::{self, MasterSettings};
use rfbridged::monitor::SelfMonitor;
use rfbridged::{pidfile, spawn_daemon};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "rfbridged", version, about = "433 MHz RF bridge daemon", disable_help_flag = true)]
struct Cli {
    /// Display usage summary.
    #[arg(short = 'H', long, action = clap::ArgAction::Help, value_parser = clap::value_parser!(bool))]
    help: Option<bool>,

    /// Do not daemonize; log at debug level to the shell.
    #[arg(short = 'D', long)]
    nodaemon: bool,

    /// Settings file path.
    #[arg(short = 'F', long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Connect to a master daemon at this address.
    #[arg(short = 'S', long, value_name = "IP")]
    server: Option<String>,

    /// Master daemon port (with --server).
    #[arg(short = 'P', long, value_name = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.nodaemon { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "rfbridged starting");

    let mut settings = match &cli.settings {
        Some(path) => match config::load_config_from(path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("FATAL: failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => match config::load_config() {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("FATAL: failed to load config: {e}");
                std::process::exit(1);
            }
        },
    };

    if let Some(host) = cli.server {
        settings.master = Some(MasterSettings {
            host,
            port: cli.port.unwrap_or(settings.server.port),
        });
    }

    // The diagnostic tools own the radio exclusively; never run beside them.
    if let Some((tool, pid)) = pidfile::find_sibling() {
        error!(tool, pid, "a radio diagnostic tool is running");
        std::process::exit(1);
    }

    let pid_file = settings.daemon.pid_file.clone();
    if let Some(pid) = pidfile::read_running_pid(&pid_file) {
        error!(pid, "already active");
        std::process::exit(1);
    }
    if let Err(e) = pidfile::write_pid(&pid_file) {
        error!(path = %pid_file.display(), error = %e, "could not write pid file");
        std::process::exit(1);
    }

    let handle = match spawn_daemon(settings).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("startup failed: {e}");
            pidfile::remove_pid(&pid_file);
            std::process::exit(1);
        }
    };
    info!(uuid = %handle.uuid, "daemon running");

    let monitor = SelfMonitor::new(handle.broadcast.clone(), handle.shutdown_trigger());
    tokio::spawn(monitor.run(handle.subscribe_shutdown()));

    let mut shutdown_rx = handle.subscribe_shutdown();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            handle.shutdown();
        }
        _ = sigterm() => {
            info!("termination requested, shutting down");
            handle.shutdown();
        }
        _ = shutdown_rx.changed() => {
            // A worker (self monitor, upstream rejection) stopped us.
        }
    }

    // Give workers a moment to observe the flag and wind down.
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    pidfile::remove_pid(&pid_file);
    info!("stopped");
}

async fn sigterm() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => std::future::pending().await,
    }
}
