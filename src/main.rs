use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};

use clap::Parser;
use log::info;

use torrentd::alerts::AlertIngestor;
use torrentd::config::{Cli, DaemonConfig};
use torrentd::engine::{MapSettings, SettingValue, TestEngine};
use torrentd::history::History;
use torrentd::server;

/*
TODO:

- wire a real BitTorrent engine behind `engine::TorrentEngine` in place of
  `TestEngine`; this entry point only proves the RPC surface end to end.
*/

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = DaemonConfig::from_cli(&cli)?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("starting daemon, listening on {}", config.listen_addr);

    let settings = MapSettings::new()
        .with("download_rate_limit", SettingValue::Int(-1))
        .with("upload_rate_limit", SettingValue::Int(-1));
    let engine = TestEngine::new("torrentd/0.1.0", settings);

    let history = Arc::new(History::new());
    let (_alert_tx, alert_rx) = mpsc::channel();
    let _ingestor = AlertIngestor::spawn(history.clone(), alert_rx);

    let shutdown = AtomicBool::new(false);
    server::serve(&config, &engine, &history, &shutdown)?;
    Ok(())
}
