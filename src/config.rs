//! Daemon-wide configuration: CLI flags plus an optional JSON overlay,
//! layered the way a long-running daemon needs (a config file that flags
//! can still override) rather than the flags-only surface a one-shot CLI
//! gets away with.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::frame::{DEFAULT_MAX_BUFFER, DEFAULT_MAX_TOKENS};

/// Number of worker threads in the connection pool absent any override.
pub const DEFAULT_WORKER_COUNT: usize = 5;
const DEFAULT_LISTEN: &str = "0.0.0.0:58846";

#[derive(Parser, Debug)]
#[command(about = "TLS/rencode remote-control daemon for a torrent engine")]
pub struct Cli {
    /// Address to bind the RPC listener on.
    #[arg(long)]
    pub listen: Option<SocketAddr>,
    /// PEM file containing both the TLS certificate chain and private key.
    #[arg(long)]
    pub pem: Option<PathBuf>,
    /// Number of connection worker threads.
    #[arg(long)]
    pub workers: Option<usize>,
    /// Optional JSON file with config overrides, merged underneath these flags.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Maximum compressed inbound message size, in bytes.
    #[arg(long)]
    pub max_message_bytes: Option<usize>,
    /// Maximum rencode token count per decoded message.
    #[arg(long)]
    pub max_tokens: Option<usize>,
    /// `env_logger`-style log level filter (e.g. `info`, `debug`).
    #[arg(long)]
    pub log_level: Option<String>,
}

/// The subset of `Cli` fields a JSON config file may supply. Any field the
/// file omits falls through to the compiled-in default; any flag the user
/// passed on the command line overrides both.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    listen: Option<SocketAddr>,
    pem: Option<PathBuf>,
    workers: Option<usize>,
    max_message_bytes: Option<usize>,
    max_tokens: Option<usize>,
    log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub listen_addr: SocketAddr,
    pub pem_path: PathBuf,
    pub worker_count: usize,
    pub max_message_bytes: usize,
    pub max_tokens: usize,
    pub log_level: String,
}

impl DaemonConfig {
    /// Builds the effective configuration: defaults, overlaid by an optional
    /// `--config` JSON file (silently absent is fine), overlaid by whatever
    /// flags were actually passed on the command line.
    pub fn from_cli(cli: &Cli) -> anyhow::Result<DaemonConfig> {
        let file = match &cli.config {
            Some(path) => load_file_config(path)?,
            None => FileConfig::default(),
        };

        let listen_addr = cli
            .listen
            .or(file.listen)
            .unwrap_or_else(|| DEFAULT_LISTEN.parse().expect("valid default listen address"));
        let pem_path = cli
            .pem
            .clone()
            .or(file.pem)
            .unwrap_or_else(|| PathBuf::from("daemon.pem"));
        let worker_count = cli.workers.or(file.workers).unwrap_or(DEFAULT_WORKER_COUNT);
        let max_message_bytes = cli
            .max_message_bytes
            .or(file.max_message_bytes)
            .unwrap_or(DEFAULT_MAX_BUFFER);
        let max_tokens = cli.max_tokens.or(file.max_tokens).unwrap_or(DEFAULT_MAX_TOKENS);
        let log_level = cli
            .log_level
            .clone()
            .or(file.log_level)
            .unwrap_or_else(|| "info".to_string());

        Ok(DaemonConfig {
            listen_addr,
            pem_path,
            worker_count,
            max_message_bytes,
            max_tokens,
            log_level,
        })
    }
}

fn load_file_config(path: &std::path::Path) -> anyhow::Result<FileConfig> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_cli() -> Cli {
        Cli {
            listen: None,
            pem: None,
            workers: None,
            config: None,
            max_message_bytes: None,
            max_tokens: None,
            log_level: None,
        }
    }

    #[test]
    fn defaults_apply_with_no_flags_or_file() {
        let config = DaemonConfig::from_cli(&bare_cli()).unwrap();
        assert_eq!(config.worker_count, DEFAULT_WORKER_COUNT);
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.listen_addr, DEFAULT_LISTEN.parse().unwrap());
    }

    #[test]
    fn missing_config_file_is_not_an_error() {
        let mut cli = bare_cli();
        cli.config = Some(PathBuf::from("/nonexistent/path/daemon.json"));
        let config = DaemonConfig::from_cli(&cli).unwrap();
        assert_eq!(config.worker_count, DEFAULT_WORKER_COUNT);
    }

    #[test]
    fn file_overrides_defaults_but_flags_win() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.json");
        std::fs::write(&path, r#"{"workers": 9, "max_tokens": 64}"#).unwrap();

        let mut cli = bare_cli();
        cli.config = Some(path);
        cli.max_tokens = Some(10);
        let config = DaemonConfig::from_cli(&cli).unwrap();
        assert_eq!(config.worker_count, 9);
        assert_eq!(config.max_tokens, 10);
    }
}
