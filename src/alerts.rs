//! Bridges the engine's alert stream to the torrent history. Mirrors the
//! reference `torrent_history`'s constructor/destructor pair: subscribe to
//! exactly the four alert kinds the history cares about on construction,
//! unsubscribe (here: stop the ingestion thread) on teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::trace;

use crate::engine::Alert;
use crate::history::History;

/// How long a poll of the alert channel blocks before re-checking the
/// shutdown flag. Bounds shutdown latency without busy-waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn apply(history: &History, alert: Alert) {
    match alert {
        Alert::Added(status) => {
            trace!("history: add {}", status.info_hash.to_hex());
            history.on_add(status);
        }
        Alert::Removed(info_hash) => {
            trace!("history: remove {}", info_hash.to_hex());
            history.on_remove(info_hash);
        }
        Alert::Rename { old_hash, new_hash } => {
            trace!("history: rename {} -> {}", old_hash.to_hex(), new_hash.to_hex());
            history.on_rename(old_hash, new_hash);
        }
        Alert::StateUpdate(batch) => {
            trace!("history: state update, {} torrents", batch.len());
            history.on_state_update(batch);
        }
    }
}

/// Owns the background thread that drains `alerts` into `history`. Dropping
/// this value stops the thread and joins it, standing in for the reference
/// implementation's `unsubscribe` call.
pub struct AlertIngestor {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AlertIngestor {
    pub fn spawn(history: Arc<History>, alerts: Receiver<Alert>) -> AlertIngestor {
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_shutdown = shutdown.clone();
        let handle = thread::spawn(move || {
            while !worker_shutdown.load(Ordering::Relaxed) {
                match alerts.recv_timeout(POLL_INTERVAL) {
                    Ok(alert) => apply(&history, alert),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });
        AlertIngestor { shutdown, handle: Some(handle) }
    }
}

impl Drop for AlertIngestor {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{InfoHash, TorrentStatus};
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn added_alert_reaches_the_history() {
        let history = Arc::new(History::new());
        let (tx, rx) = mpsc::channel();
        let ingestor = AlertIngestor::spawn(history.clone(), rx);

        let hash = InfoHash([9u8; 20]);
        let mut status = TorrentStatus::default_for(hash);
        status.state = 7; // miss-default always has state 0, so this proves the add landed
        tx.send(Alert::Added(status)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while history.get(hash).state != 7 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(history.get(hash).state, 7);
        drop(ingestor);
    }

    #[test]
    fn dropping_the_ingestor_stops_its_thread() {
        let history = Arc::new(History::new());
        let (_tx, rx) = mpsc::channel();
        let ingestor = AlertIngestor::spawn(history, rx);
        drop(ingestor); // must not hang
    }
}
