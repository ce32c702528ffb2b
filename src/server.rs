//! Acceptor + worker pool: a single blocking accept loop feeds a bounded
//! job queue; a fixed pool of worker threads pops sockets off that queue,
//! performs the server-side TLS handshake, and runs the per-connection
//! framing/dispatch loop. A condvar-guarded queue stands in for an
//! `io_service`-style post queue, with no external event loop dependency.

use std::collections::VecDeque;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use openssl::ssl::{Ssl, SslAcceptor, SslFiletype, SslMethod, SslOptions};
use thiserror::Error;

use crate::config::DaemonConfig;
use crate::dispatcher::{Context, Dispatcher};
use crate::engine::TorrentEngine;
use crate::frame::{self, FrameReader, TransportError};
use crate::history::History;

/// How long the accept loop and worker threads each wait before re-checking
/// the shutdown flag. Bounds shutdown latency without a busy loop.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {0}: {1}")]
    Bind(std::net::SocketAddr, std::io::Error),
    #[error("failed to configure TLS: {0}")]
    Tls(#[from] openssl::error::ErrorStack),
}

/// Builds the server-side TLS acceptor from a single PEM file containing
/// both the certificate chain and the private key, matching the reference
/// daemon's `use_certificate_chain_file`/`use_private_key_file` pairing
/// against one path. SSLv2 is disabled, single-DH-use and the default
/// workaround bundle are enabled; no client certificate is required.
fn build_acceptor(pem_path: &std::path::Path) -> Result<SslAcceptor, ServerError> {
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;
    builder.set_certificate_chain_file(pem_path)?;
    builder.set_private_key_file(pem_path, SslFiletype::PEM)?;
    builder.set_options(SslOptions::NO_SSLV2 | SslOptions::SINGLE_DH_USE | SslOptions::ALL);
    builder.check_private_key()?;
    Ok(builder.build())
}

/// Job queue shared between the accept loop and the worker pool.
struct JobQueue {
    sockets: Mutex<VecDeque<TcpStream>>,
    not_empty: Condvar,
    shutdown: AtomicBool,
}

impl JobQueue {
    fn new() -> JobQueue {
        JobQueue {
            sockets: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    fn push(&self, sock: TcpStream) {
        self.sockets.lock().unwrap().push_back(sock);
        self.not_empty.notify_one();
    }

    /// Blocks until a socket is available or shutdown is signaled.
    fn pop(&self) -> Option<TcpStream> {
        let mut guard = self.sockets.lock().unwrap();
        loop {
            if let Some(sock) = guard.pop_front() {
                return Some(sock);
            }
            if self.shutdown.load(Ordering::Relaxed) {
                return None;
            }
            let (next, _timeout) = self.not_empty.wait_timeout(guard, POLL_INTERVAL).unwrap();
            guard = next;
        }
    }

    fn trigger_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.not_empty.notify_all();
    }

    /// Drains and drops whatever sockets are left after workers have joined.
    fn drain(&self) {
        self.sockets.lock().unwrap().clear();
    }
}

/// Runs the RPC server until `shutdown` is observed set. Blocks the calling
/// thread: the accept loop and worker pool all run for the duration of this
/// call, scoped so they may borrow `engine`/`history` by reference instead
/// of requiring `Arc` everywhere.
pub fn serve(
    config: &DaemonConfig,
    engine: &dyn TorrentEngine,
    history: &History,
    shutdown: &AtomicBool,
) -> Result<(), ServerError> {
    let acceptor = build_acceptor(&config.pem_path)?;
    let listener = TcpListener::bind(config.listen_addr)
        .map_err(|e| ServerError::Bind(config.listen_addr, e))?;
    listener.set_nonblocking(true).ok();
    info!("listening on {}", config.listen_addr);

    let queue = JobQueue::new();
    let dispatcher = Dispatcher::new();

    crossbeam::thread::scope(|scope| {
        for worker_id in 0..config.worker_count.max(1) {
            scope.spawn(|_| {
                worker_loop(worker_id, &queue, &acceptor, &dispatcher, engine, history, config)
            });
        }

        accept_loop(&listener, &queue, shutdown, config);
        queue.trigger_shutdown();
    })
    .expect("worker pool thread panicked");

    queue.drain();
    info!("server shut down");
    Ok(())
}

fn accept_loop(listener: &TcpListener, queue: &JobQueue, shutdown: &AtomicBool, config: &DaemonConfig) {
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((sock, peer)) => {
                debug!("accepted connection from {peer}");
                if queue.sockets.lock().unwrap().len() >= config.worker_count.max(1) * 4 {
                    warn!("job queue saturated, dropping connection from {peer}");
                    continue;
                }
                queue.push(sock);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                error!("accept failed, shutting down: {e}");
                break;
            }
        }
    }
}

fn worker_loop(
    worker_id: usize,
    queue: &JobQueue,
    acceptor: &SslAcceptor,
    dispatcher: &Dispatcher,
    engine: &dyn TorrentEngine,
    history: &History,
    config: &DaemonConfig,
) {
    while let Some(sock) = queue.pop() {
        sock.set_nonblocking(false).ok();
        let peer = sock
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());

        let ssl = match Ssl::new(acceptor.context()) {
            Ok(ssl) => ssl,
            Err(e) => {
                warn!("worker {worker_id}: failed to build ssl session for {peer}: {e}");
                continue;
            }
        };
        let mut stream = match ssl.accept(sock) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("worker {worker_id}: tls handshake failed for {peer}: {e}");
                continue;
            }
        };
        debug!("worker {worker_id}: tls handshake complete for {peer}");

        let ctx = Context { engine, history };
        let mut reader = FrameReader::with_limits(config.max_message_bytes, config.max_tokens);
        loop {
            match reader.read_message(&mut stream) {
                Ok(None) => {
                    debug!("worker {worker_id}: {peer} closed the connection");
                    break;
                }
                Ok(Some(message)) => {
                    let responses = dispatcher.dispatch(&ctx, &message.tokens, &message.buf);
                    let mut io_failed = false;
                    for payload in responses {
                        if let Err(e) = frame::write_message(&mut stream, &payload) {
                            frame::log_and_close(&peer, &e);
                            io_failed = true;
                            break;
                        }
                    }
                    if io_failed {
                        break;
                    }
                }
                Err(e @ TransportError::Io(_)) | Err(e @ TransportError::BufferCapExceeded(_)) => {
                    frame::log_and_close(&peer, &e);
                    break;
                }
                Err(e) => {
                    frame::log_and_close(&peer, &e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MapSettings, SettingValue, TestEngine};
    use crate::rencode::Encoder;
    use openssl::asn1::Asn1Time;
    use openssl::bn::{BigNum, MsbOption};
    use openssl::hash::MessageDigest;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::ssl::{SslConnector, SslVerifyMode};
    use openssl::x509::{X509NameBuilder, X509};
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    /// Generates a throwaway self-signed cert + key and writes both, PEM
    /// encoded, to one file, matching the single-PEM layout `build_acceptor`
    /// expects.
    fn self_signed_pem() -> NamedTempFile {
        let rsa = Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "localhost").unwrap();
        let name = name.build();

        let mut serial = BigNum::new().unwrap();
        serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&pkey).unwrap();
        builder
            .set_serial_number(&serial.to_asn1_integer().unwrap())
            .unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(7).unwrap())
            .unwrap();
        builder.sign(&pkey, MessageDigest::sha256()).unwrap();
        let cert = builder.build();

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&cert.to_pem().unwrap()).unwrap();
        file.write_all(&pkey.private_key_to_pem_pkcs8().unwrap())
            .unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn build_acceptor_accepts_a_valid_self_signed_pem() {
        let pem = self_signed_pem();
        build_acceptor(pem.path()).unwrap();
    }

    #[test]
    fn build_acceptor_rejects_a_missing_file() {
        let err = build_acceptor(std::path::Path::new("/nonexistent/path.pem"));
        assert!(err.is_err());
    }

    #[test]
    fn loopback_client_logs_in_over_tls() {
        // Bind ourselves first so the config can carry a real free port,
        // then hand the listener's address to `serve` and let it rebind.
        let port_probe = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = port_probe.local_addr().unwrap();
        drop(port_probe);

        let pem = self_signed_pem();
        let config = DaemonConfig {
            listen_addr: addr,
            pem_path: pem.path().to_path_buf(),
            worker_count: 1,
            max_message_bytes: crate::frame::DEFAULT_MAX_BUFFER,
            max_tokens: crate::frame::DEFAULT_MAX_TOKENS,
            log_level: "warn".to_string(),
        };
        let engine = TestEngine::new(
            "test-agent/1.0",
            MapSettings::new().with("download_rate_limit", SettingValue::Int(-1)),
        );
        let history = History::new();
        let shutdown = AtomicBool::new(false);

        crossbeam::thread::scope(|scope| {
            scope.spawn(|_| {
                serve(&config, &engine, &history, &shutdown).unwrap();
            });

            // Give the acceptor a moment to bind before the client dials in.
            std::thread::sleep(Duration::from_millis(200));

            let mut connector = SslConnector::builder(SslMethod::tls()).unwrap();
            connector.set_verify(SslVerifyMode::NONE);
            let connector = connector.build();
            let sock = TcpStream::connect(addr).unwrap();
            let mut client = connector.connect("localhost", sock).unwrap();

            let mut enc = Encoder::new();
            enc.append_list(4);
            enc.append_int(42);
            enc.append_string(b"daemon.login");
            enc.append_list(2);
            enc.append_string(b"user");
            enc.append_string(b"pass");
            enc.append_dict(0);
            frame::write_message(&mut client, enc.data()).unwrap();

            let mut reader = FrameReader::new();
            let message = reader.read_message(&mut client).unwrap().unwrap();
            assert_eq!(message.tokens[0].num_items, 3);
            assert_eq!(message.tokens[2].int_value, 42);

            drop(client);
            shutdown.store(true, Ordering::Relaxed);
        })
        .unwrap();
    }
}
