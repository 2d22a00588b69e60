//! transport.rs: outbound UDP for SSP sentences and profile requests
//!
//! The distribution loop only sees the `Transport` trait so tests can
//! substitute a recording fake. `UdpTransport` owns one unconnected socket
//! bound to an ephemeral port and sends with `send_to`.
//!
//! Send errors are returned to the caller, which logs them against the
//! client; they never abort the loop.

use std::net::{SocketAddr, UdpSocket};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("send to {addr} failed: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("short send to {addr}: {sent} of {len} bytes")]
    Short { addr: SocketAddr, sent: usize, len: usize },
}

pub trait Transport: Send + Sync {
    fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<(), TransportError>;
}

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn new() -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(false)?;
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<(), TransportError> {
        let sent = self
            .socket
            .send_to(payload, addr)
            .map_err(|source| TransportError::Send { addr, source })?;
        if sent != payload.len() {
            return Err(TransportError::Short { addr, sent, len: payload.len() });
        }
        debug!("UDP → {addr} {sent} bytes");
        Ok(())
    }
}
