//! # mvp
//!
//! MultiPacketReassembler for casts pushed by a moving-vessel profiler (MVP)
//! controller over UDP.
//!
//! ## NAVO ISS-60 transfer
//! A cast arrives as one header, N body blocks and one footer. Only the
//! payload length tells them apart:
//!
//! | part   | bytes  |
//! |--------|--------|
//! | header | 536    |
//! | body   | 20 032 |
//! | footer | 8      |
//!
//! Body block: `4s 4s u32 packet_number u32 total_packets u32 num_bytes
//! u32 total_bytes 20000s 4s 4s`; the cast text is `block[24..24+num_bytes]`.
//!
//! ## Invariants
//! - A cast is emitted exactly when header, ≥1 body and footer have been seen
//!   since the last completion; the accumulator resets whether or not the
//!   format driver accepts the bytes.
//! - A header always restarts accumulation.
//! - Partial casts older than the reassembly timeout are abandoned.
//! - Only one cast may be in flight: the wire format carries no cast id, so
//!   interleaved senders corrupt each other.

pub mod formats;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Buf;
use serde::{Deserialize, Serialize};
use ssp_types::Profile;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::listener::DatagramHandler;
use formats::{FormatDriver, FormatError};

pub const NAVO_HEADER_LEN: usize = 536;
pub const NAVO_BODY_LEN: usize = 20_032;
pub const NAVO_FOOTER_LEN: usize = 8;
pub const NAVO_BODY_DATA_OFFSET: usize = 24;
pub const NAVO_BODY_DATA_MAX: usize = 20_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MvpProtocol {
    #[default]
    NavoIss60,
    /// Every datagram is a complete cast.
    Undefined,
}

#[derive(Debug, Error, PartialEq)]
pub enum ReassemblyError {
    #[error("partial cast abandoned after {age:?} ({bodies} body blocks)")]
    Abandoned { age: Duration, bodies: usize },
    #[error("{0} received before any header")]
    NoHeader(&'static str),
    #[error("footer received with no body blocks")]
    NoBody,
    #[error("body block {packet}/{total} declares {num_bytes} bytes")]
    BadBlock { packet: u32, total: u32, num_bytes: u32 },
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Parsed fixed fields of a NAVO body block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyBlock {
    pub packet_number: u32,
    pub total_packets: u32,
    pub num_bytes: u32,
    pub total_bytes: u32,
}

impl BodyBlock {
    fn read(block: &[u8]) -> Self {
        let mut b = &block[8..NAVO_BODY_DATA_OFFSET];
        Self {
            packet_number: b.get_u32_le(),
            total_packets: b.get_u32_le(),
            num_bytes: b.get_u32_le(),
            total_bytes: b.get_u32_le(),
        }
    }
}

struct Partial {
    started: Instant,
    bodies: Vec<Vec<u8>>,
}

pub struct MultiPacketReassembler {
    protocol: MvpProtocol,
    driver: Box<dyn FormatDriver>,
    timeout: Duration,
    partial: Option<Partial>,
}

impl MultiPacketReassembler {
    pub fn new(protocol: MvpProtocol, driver: Box<dyn FormatDriver>, timeout: Duration) -> Self {
        Self { protocol, driver, timeout, partial: None }
    }

    pub fn protocol(&self) -> MvpProtocol {
        self.protocol
    }

    /// True when no partial cast is being accumulated.
    pub fn is_empty(&self) -> bool {
        self.partial.is_none()
    }

    /// Body blocks accumulated for the cast in flight.
    pub fn pending_bodies(&self) -> usize {
        self.partial.as_ref().map_or(0, |p| p.bodies.len())
    }

    /// Drop a partial cast that has been in flight longer than the timeout.
    pub fn expire(&mut self, now: Instant) -> Result<(), ReassemblyError> {
        let Some(p) = &self.partial else {
            return Ok(());
        };
        let age = now.saturating_duration_since(p.started);
        if age <= self.timeout {
            return Ok(());
        }
        let bodies = p.bodies.len();
        self.partial = None;
        Err(ReassemblyError::Abandoned { age, bodies })
    }

    /// Feed one datagram. Returns a cast when this datagram completes one.
    pub fn accept(&mut self, payload: &[u8], now: Instant) -> Result<Option<Profile>, ReassemblyError> {
        match self.protocol {
            MvpProtocol::Undefined => self.driver.parse(payload).map(Some).map_err(Into::into),
            MvpProtocol::NavoIss60 => {
                if let Err(e) = self.expire(now) {
                    warn!("MVP: {e}");
                }
                self.accept_navo(payload, now)
            }
        }
    }

    fn accept_navo(&mut self, payload: &[u8], now: Instant) -> Result<Option<Profile>, ReassemblyError> {
        match payload.len() {
            NAVO_HEADER_LEN => {
                if self.partial.is_some() {
                    debug!("MVP: header restarts accumulation");
                }
                self.partial = Some(Partial { started: now, bodies: Vec::new() });
                Ok(None)
            }
            NAVO_BODY_LEN => {
                let Some(p) = self.partial.as_mut() else {
                    return Err(ReassemblyError::NoHeader("body block"));
                };
                p.bodies.push(payload.to_vec());
                Ok(None)
            }
            NAVO_FOOTER_LEN => {
                let Some(p) = self.partial.take() else {
                    return Err(ReassemblyError::NoHeader("footer"));
                };
                if p.bodies.is_empty() {
                    return Err(ReassemblyError::NoBody);
                }
                let data = unify(&p.bodies)?;
                info!("MVP: assembling cast from {} body blocks ({} bytes)", p.bodies.len(), data.len());
                self.driver.parse(&data).map(Some).map_err(Into::into)
            }
            other => {
                debug!("MVP: ignoring {other}-byte datagram");
                Ok(None)
            }
        }
    }
}

/// Concatenate the data sections of the body blocks in arrival order.
fn unify(bodies: &[Vec<u8>]) -> Result<Vec<u8>, ReassemblyError> {
    let mut out = Vec::new();
    for block in bodies {
        let info = BodyBlock::read(block);
        let n = info.num_bytes as usize;
        if n > NAVO_BODY_DATA_MAX {
            return Err(ReassemblyError::BadBlock {
                packet: info.packet_number,
                total: info.total_packets,
                num_bytes: info.num_bytes,
            });
        }
        debug!("MVP: packet {}/{} [{:.1} KB]", info.packet_number, info.total_packets, n as f64 / 1024.0);
        out.extend_from_slice(&block[NAVO_BODY_DATA_OFFSET..NAVO_BODY_DATA_OFFSET + n]);
    }
    Ok(out)
}

/// Split a cast into NAVO ISS-60 datagrams (header, bodies, footer).
pub fn navo_packets(data: &[u8]) -> Vec<Vec<u8>> {
    let chunks: Vec<&[u8]> = if data.is_empty() {
        vec![data]
    } else {
        data.chunks(NAVO_BODY_DATA_MAX).collect()
    };
    let total = chunks.len() as u32;
    let mut out = Vec::with_capacity(chunks.len() + 2);
    out.push(vec![0u8; NAVO_HEADER_LEN]);
    for (i, chunk) in chunks.iter().enumerate() {
        let mut block = vec![0u8; NAVO_BODY_LEN];
        block[8..12].copy_from_slice(&(i as u32 + 1).to_le_bytes());
        block[12..16].copy_from_slice(&total.to_le_bytes());
        block[16..20].copy_from_slice(&(chunk.len() as u32).to_le_bytes());
        block[20..24].copy_from_slice(&(data.len() as u32).to_le_bytes());
        block[NAVO_BODY_DATA_OFFSET..NAVO_BODY_DATA_OFFSET + chunk.len()].copy_from_slice(chunk);
        out.push(block);
    }
    out.push(vec![0u8; NAVO_FOOTER_LEN]);
    out
}

// ── Listener handler ──────────────────────────────────────────────────────────

/// A completed MVP cast and the controller that sent it.
#[derive(Debug, Clone)]
pub struct MvpCast {
    pub profile: Profile,
    pub sender: SocketAddr,
}

/// Runs the reassembler on the listener task and forwards completed casts.
pub struct MvpHandler {
    reassembler: MultiPacketReassembler,
    casts_tx: mpsc::Sender<MvpCast>,
}

impl MvpHandler {
    pub fn new(reassembler: MultiPacketReassembler, casts_tx: mpsc::Sender<MvpCast>) -> Self {
        Self { reassembler, casts_tx }
    }
}

impl DatagramHandler for MvpHandler {
    type Error = ReassemblyError;

    fn handle(&mut self, payload: &[u8], sender: SocketAddr) -> Result<(), ReassemblyError> {
        let Some(profile) = self.reassembler.accept(payload, Instant::now())? else {
            return Ok(());
        };
        info!("MVP: received cast with {} samples from {sender}", profile.len());
        if let Err(e) = self.casts_tx.try_send(MvpCast { profile, sender }) {
            warn!("MVP: cast channel unavailable, dropping cast: {e}");
        }
        Ok(())
    }

    fn on_idle(&mut self) {
        if let Err(e) = self.reassembler.expire(Instant::now()) {
            warn!("MVP: {e}");
        }
    }
}
