//! # kongsberg
//!
//! Decoder for Kongsberg EM datagrams broadcast by SIS over UDP, plus the
//! request sentence used to make SIS re-broadcast its current profile.
//!
//! ## Framing
//! Every datagram starts with STX (0x02) and a type byte, followed by the
//! rest of a 16-byte little-endian header:
//!
//! | off | size | field                     |
//! |-----|------|---------------------------|
//! | 0   | 1    | STX                       |
//! | 1   | 1    | datagram type             |
//! | 2   | 2    | EM model                  |
//! | 4   | 4    | date `YYYYMMDD`           |
//! | 8   | 4    | time, ms since midnight   |
//! | 12  | 2    | ping/sequence counter     |
//! | 14  | 2    | system serial number      |
//!
//! ## Invariants
//! - Decoding never panics on short input: every read is length-checked.
//! - Types outside the caller's desired set decode to `Ok(None)`.

pub mod encode;
mod opcode;
mod records;
pub mod request;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Buf;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

pub use opcode::KmOpcode;
pub use records::*;

use crate::listener::DatagramHandler;

pub const STX: u8 = 0x02;
pub const HEADER_LEN: usize = 16;

pub type DesiredSet = HashSet<KmOpcode>;

/// Datagram types the distribution server needs.
pub fn default_desired() -> DesiredSet {
    [
        KmOpcode::Position,
        KmOpcode::Xyz88,
        KmOpcode::SoundSpeedProfile,
        KmOpcode::SurfaceSoundSpeed,
        KmOpcode::InstallationStart,
        KmOpcode::Runtime,
    ]
    .into_iter()
    .collect()
}

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("datagram too short to classify ({0} bytes)")]
    TooShort(usize),
    #[error("bad start byte 0x{0:02x}")]
    BadStart(u8),
    #[error("unknown datagram type 0x{0:02x}")]
    UnknownOpcode(u8),
    #[error("truncated {opcode:?} datagram: need {needed} bytes, have {available}")]
    Truncated { opcode: KmOpcode, needed: usize, available: usize },
    #[error("no decoder for {0:?}")]
    Unsupported(KmOpcode),
}

// ── Header ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KmHeader {
    pub opcode: KmOpcode,
    pub model: u16,
    /// `YYYYMMDD`.
    pub date: u32,
    pub time_ms: u32,
    pub counter: u16,
    pub serial: u16,
}

impl KmHeader {
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        let d = self.date;
        let date = NaiveDate::from_ymd_opt((d / 10_000) as i32, (d / 100) % 100, d % 100)?;
        date.and_hms_opt(0, 0, 0)
            .map(|t| t + chrono::Duration::milliseconds(self.time_ms as i64))
    }
}

// ── Checked little-endian reader ──────────────────────────────────────────────

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    opcode: KmOpcode,
    total: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], opcode: KmOpcode) -> Self {
        Self { buf, opcode, total: buf.len() }
    }

    pub(crate) fn need(&self, n: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < n {
            return Err(DecodeError::Truncated {
                opcode: self.opcode,
                needed: self.total - self.buf.remaining() + n,
                available: self.total,
            });
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn i8(&mut self) -> Result<i8, DecodeError> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    pub(crate) fn u16(&mut self) -> Result<u16, DecodeError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub(crate) fn i16(&mut self) -> Result<i16, DecodeError> {
        self.need(2)?;
        Ok(self.buf.get_i16_le())
    }

    pub(crate) fn u32(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub(crate) fn i32(&mut self) -> Result<i32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub(crate) fn f32(&mut self) -> Result<f32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.bytes(n).map(|_| ())
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }
}

// ── Decode entry point ────────────────────────────────────────────────────────

/// Classify a datagram by its type byte.
pub fn classify(payload: &[u8]) -> Result<KmOpcode, DecodeError> {
    if payload.len() < 2 {
        return Err(DecodeError::TooShort(payload.len()));
    }
    if payload[0] != STX {
        return Err(DecodeError::BadStart(payload[0]));
    }
    KmOpcode::from_u8(payload[1]).ok_or(DecodeError::UnknownOpcode(payload[1]))
}

/// Decode one datagram. Types outside `desired` are dropped as `Ok(None)`.
pub fn decode(payload: &[u8], desired: &DesiredSet) -> Result<Option<KmRecord>, DecodeError> {
    let opcode = classify(payload)?;
    if !desired.contains(&opcode) {
        return Ok(None);
    }
    let mut r = Reader::new(payload, opcode);
    r.skip(2)?;
    let header = KmHeader {
        opcode,
        model: r.u16()?,
        date: r.u32()?,
        time_ms: r.u32()?,
        counter: r.u16()?,
        serial: r.u16()?,
    };
    records::decode_body(header, &mut r).map(Some)
}

// ── Listener handler ──────────────────────────────────────────────────────────

/// A decoded record plus where and when it arrived.
#[derive(Debug, Clone)]
pub struct Received {
    pub record: KmRecord,
    pub sender: SocketAddr,
    pub at: Instant,
}

/// Decodes datagrams on the listener task and forwards records downstream.
pub struct KmDispatcher {
    desired: DesiredSet,
    records_tx: mpsc::Sender<Received>,
}

impl KmDispatcher {
    pub fn new(desired: DesiredSet, records_tx: mpsc::Sender<Received>) -> Self {
        Self { desired, records_tx }
    }
}

impl DatagramHandler for KmDispatcher {
    type Error = DecodeError;

    fn handle(&mut self, payload: &[u8], sender: SocketAddr) -> Result<(), DecodeError> {
        let Some(record) = decode(payload, &self.desired)? else {
            if let Ok(op) = classify(payload) {
                trace!("KM: skipping {} from {sender}", op.name());
            }
            return Ok(());
        };
        debug!("KM: {} from {sender} ({} bytes)", record.opcode().name(), payload.len());
        if let Err(e) = self.records_tx.try_send(Received { record, sender, at: Instant::now() }) {
            warn!("KM: record channel unavailable, dropping datagram: {e}");
        }
        Ok(())
    }
}
