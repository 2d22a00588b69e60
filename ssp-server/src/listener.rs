//! # listener
//!
//! DatagramListener: owns one UDP socket and a receive loop running as its
//! own Tokio task. Each payload is optionally mirrored to a log file and to a
//! bounded in-memory capture, then handed to a pluggable `DatagramHandler`.
//!
//! ## Architecture
//!   1. `DatagramListener::bind` binds `0.0.0.0:<port>`; failure is a
//!      `ListenerError::Bind` the caller reports and survives
//!   2. `run()` loops on `recv_from` bounded by the configured timeout; a
//!      timeout is a polling tick (handler `on_idle`), never an error
//!   3. `ListenerHandle::stop()` flips a watch channel; the loop observes it
//!      immediately or at the latest on the next tick
//!
//! ## Invariants
//! - Handler errors are logged and never end the loop.
//! - The socket and log file are owned by the task and released on every
//!   exit path (the log is flushed before `run` returns).
//! - `stop()` is idempotent and callable from any task or thread.

use std::collections::VecDeque;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const RECV_BUFFER: usize = 1 << 16;

// ── Configuration ─────────────────────────────────────────────────────────────

/// How raw payloads are written to the log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSink {
    /// `u32` little-endian length then payload (`.all` layout).
    #[default]
    Kongsberg,
    /// Payload bytes only.
    Raw,
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Short tag used in log lines ("KM", "MVP").
    pub name: String,
    pub port: u16,
    /// Receive timeout / polling tick.
    pub timeout: Duration,
    pub log_file: Option<PathBuf>,
    pub log_sink: LogSink,
    /// Keep the last N payloads in memory (0 disables).
    pub capture: usize,
}

impl ListenerConfig {
    pub fn new(name: &str, port: u16, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            port,
            timeout,
            log_file: None,
            log_sink: LogSink::Kongsberg,
            capture: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("could not bind UDP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("could not open log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ── Handler seam ──────────────────────────────────────────────────────────────

/// Per-payload processing, run on the listener task.
pub trait DatagramHandler: Send + 'static {
    type Error: Display;

    fn handle(&mut self, payload: &[u8], sender: SocketAddr) -> Result<(), Self::Error>;

    /// Called on every receive timeout.
    fn on_idle(&mut self) {}
}

// ── Stats & handle ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    handler_errors: AtomicU64,
    logged_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    pub received: u64,
    pub handler_errors: u64,
    pub logged_bytes: u64,
}

/// Control side of a listener; cheap to clone.
#[derive(Clone)]
pub struct ListenerHandle {
    shutdown: Arc<watch::Sender<bool>>,
    counters: Arc<Counters>,
    capture: Arc<Mutex<VecDeque<Vec<u8>>>>,
    local_addr: SocketAddr,
}

impl ListenerHandle {
    /// Request the receive loop to exit. Safe to call repeatedly.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            received: self.counters.received.load(Ordering::Relaxed),
            handler_errors: self.counters.handler_errors.load(Ordering::Relaxed),
            logged_bytes: self.counters.logged_bytes.load(Ordering::Relaxed),
        }
    }

    /// Payloads held by the in-memory capture, oldest first.
    pub fn captured(&self) -> Vec<Vec<u8>> {
        self.capture.lock().map(|q| q.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn clear_captured(&self) {
        if let Ok(mut q) = self.capture.lock() {
            q.clear();
        }
    }
}

// ── Listener ──────────────────────────────────────────────────────────────────

pub struct DatagramListener<H: DatagramHandler> {
    config: ListenerConfig,
    socket: UdpSocket,
    handler: H,
    log: Option<BufWriter<File>>,
    shutdown: watch::Receiver<bool>,
    counters: Arc<Counters>,
    capture: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl<H: DatagramHandler> DatagramListener<H> {
    /// Bind the socket and open the log file (if configured).
    pub async fn bind(config: ListenerConfig, handler: H) -> Result<(Self, ListenerHandle), ListenerError> {
        let addr = format!("0.0.0.0:{}", config.port);
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|source| ListenerError::Bind { port: config.port, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| ListenerError::Bind { port: config.port, source })?;

        let log = match &config.log_file {
            Some(path) => {
                let file = File::create(path)
                    .await
                    .map_err(|source| ListenerError::LogFile { path: path.clone(), source })?;
                info!("{}: logging datagrams to {}", config.name, path.display());
                Some(BufWriter::new(file))
            }
            None => None,
        };

        info!("📡 {} listening on UDP {local_addr}", config.name);

        let (tx, rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());
        let capture = Arc::new(Mutex::new(VecDeque::with_capacity(config.capture)));
        let handle = ListenerHandle {
            shutdown: Arc::new(tx),
            counters: counters.clone(),
            capture: capture.clone(),
            local_addr,
        };
        Ok((
            Self { config, socket, handler, log, shutdown: rx, counters, capture },
            handle,
        ))
    }

    /// Receive until stopped. Returns the final counters.
    pub async fn run(mut self) -> ListenerStats {
        let mut buf = vec![0u8; RECV_BUFFER];
        let name = self.config.name.clone();

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                received = tokio::time::timeout(self.config.timeout, self.socket.recv_from(&mut buf)) => {
                    match received {
                        Err(_) => self.handler.on_idle(),
                        Ok(Err(e)) => {
                            // Log and keep receiving
                            warn!("{name}: UDP recv error: {e}");
                        }
                        Ok(Ok((len, sender))) => self.process(&buf[..len], sender).await,
                    }
                }
            }
        }

        if let Some(mut log) = self.log.take() {
            if let Err(e) = log.flush().await {
                warn!("{name}: failed to flush log file: {e}");
            }
        }
        info!("{name}: done listening");
        ListenerStats {
            received: self.counters.received.load(Ordering::Relaxed),
            handler_errors: self.counters.handler_errors.load(Ordering::Relaxed),
            logged_bytes: self.counters.logged_bytes.load(Ordering::Relaxed),
        }
    }

    async fn process(&mut self, payload: &[u8], sender: SocketAddr) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        if let Some(log) = self.log.as_mut() {
            match write_record(log, self.config.log_sink, payload).await {
                Ok(n) => {
                    self.counters.logged_bytes.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) => warn!("{}: log write failed: {e}", self.config.name),
            }
        }

        if self.config.capture > 0 {
            if let Ok(mut q) = self.capture.lock() {
                if q.len() == self.config.capture {
                    q.pop_front();
                }
                q.push_back(payload.to_vec());
            }
        }

        if let Err(e) = self.handler.handle(payload, sender) {
            self.counters.handler_errors.fetch_add(1, Ordering::Relaxed);
            debug!("{}: dropped datagram from {sender}: {e}", self.config.name);
        }
    }
}

async fn write_record(log: &mut BufWriter<File>, sink: LogSink, payload: &[u8]) -> std::io::Result<usize> {
    let mut n = payload.len();
    if sink == LogSink::Kongsberg {
        log.write_all(&(payload.len() as u32).to_le_bytes()).await?;
        n += 4;
    }
    log.write_all(payload).await?;
    Ok(n)
}
