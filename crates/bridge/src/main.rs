//! WebSSH Bridge
//!
//! Serves interactive SSH shells to browser terminals over a WebSocket.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bridge::config::{Config, LogConfig};
use bridge::{BridgeServer, SshConnector};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// WebSSH Bridge - SSH shells over WebSocket.
#[derive(Parser, Debug)]
#[command(name = "webssh-bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Host to listen on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,
}

/// Rewrites single-dash long flags (`-host`, `-port=8080`) to their
/// double-dash form so both spellings are accepted.
fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let rewritten = arg.to_str().and_then(|text| {
                ["-host", "-port"]
                    .iter()
                    .any(|flag| text == *flag || text.starts_with(&format!("{flag}=")))
                    .then(|| OsString::from(format!("-{text}")))
            });
            rewritten.unwrap_or(arg)
        })
        .collect()
}

/// Installs the global subscriber. The returned guard flushes the log file
/// on drop.
fn init_tracing(log: &LogConfig, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose { "debug" } else { log.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &log.file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
            std::fs::create_dir_all(&directory).with_context(|| {
                format!("Failed to create log directory: {}", directory.display())
            })?;

            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides, then command-line flags
    config.apply_env_overrides();
    if let Some(host) = cli.host.clone() {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    config.validate()?;

    let _log_guard = init_tracing(&config.log, cli.verbose)?;
    tracing::info!("WebSSH bridge starting...");
    if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
    }

    let connector = Arc::new(SshConnector::from_config(&config.ssh));
    let server = BridgeServer::new(config, connector);
    let listener = server.bind().await?;

    let shutdown_token = server.shutdown_token();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown_token.cancel();
    });

    server.run(listener).await?;
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(normalize_args(args.iter().map(OsString::from))).unwrap()
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_arguments() {
        let cli = parse(&["webssh-bridge"]);
        assert!(cli.config.is_none());
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_long_flags() {
        let cli = parse(&["webssh-bridge", "--host", "0.0.0.0", "--port", "8080", "-v"]);
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(cli.port, Some(8080));
        assert!(cli.verbose);
    }

    #[test]
    fn test_single_dash_flags() {
        let cli = parse(&["webssh-bridge", "-host", "127.0.0.1", "-port=9000"]);
        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(cli.port, Some(9000));
    }

    #[test]
    fn test_short_flags_untouched() {
        let args = normalize_args(
            ["webssh-bridge", "-v", "-c", "x.toml", "-hostname"].map(OsString::from),
        );
        assert_eq!(
            args,
            ["webssh-bridge", "-v", "-c", "x.toml", "-hostname"].map(OsString::from)
        );
    }

    #[test]
    fn test_config_flag() {
        let cli = parse(&["webssh-bridge", "-c", "/etc/webssh/config.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/webssh/config.toml")));
    }

    #[test]
    fn test_invalid_port_rejected() {
        let result = Cli::try_parse_from(["webssh-bridge", "--port", "70000"]);
        assert!(result.is_err());
    }
}
