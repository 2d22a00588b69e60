//! Acquisition-system clients that receive transmitted casts.
//!
//! Clients are configured as `name:ip:port:protocol` strings. Each protocol
//! fixes the wire format it is sent and whether reception can be confirmed
//! by asking the client to reflect its current profile.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ssp_types::{KmFormat, Profile};
use thiserror::Error;

use crate::wire::{encode_calc, encode_km, WireError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClientProtocol {
    Sis,
    Qinsy,
    Pds2000,
    Hypack,
}

/// Wire format a client is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFormat {
    Km(KmFormat),
    Calc,
}

impl ClientProtocol {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sis => "SIS",
            Self::Qinsy => "QINSY",
            Self::Pds2000 => "PDS2000",
            Self::Hypack => "HYPACK",
        }
    }

    /// SIS gets S01 so the profile is applied immediately; QINSY and PDS2000
    /// only understand S12.
    pub fn format(&self) -> ClientFormat {
        match self {
            Self::Sis => ClientFormat::Km(KmFormat::S01),
            Self::Qinsy | Self::Pds2000 => ClientFormat::Km(KmFormat::S12),
            Self::Hypack => ClientFormat::Calc,
        }
    }

    /// Only SIS re-broadcasts the profile it has applied.
    pub fn confirmable(&self) -> bool {
        matches!(self, Self::Sis)
    }
}

impl fmt::Display for ClientProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ClientProtocol {
    type Err = ClientParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SIS" => Ok(Self::Sis),
            "QINSY" => Ok(Self::Qinsy),
            "PDS2000" => Ok(Self::Pds2000),
            "HYPACK" => Ok(Self::Hypack),
            _ => Err(ClientParseError::Protocol(s.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ClientParseError {
    #[error("client '{0}' is not name:ip:port:protocol")]
    Shape(String),
    #[error("bad client address '{0}'")]
    Address(String),
    #[error("bad client port '{0}'")]
    Port(String),
    #[error("unknown client protocol '{0}'")]
    Protocol(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientEndpoint {
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    pub protocol: ClientProtocol,
    /// Cleared when the client misses a confirmation; only a restart sets it again.
    pub alive: bool,
}

impl ClientEndpoint {
    pub fn new(name: &str, address: IpAddr, port: u16, protocol: ClientProtocol) -> Self {
        Self { name: name.to_string(), address, port, protocol, alive: true }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Render a cast in this client's format.
    pub fn encode(&self, profile: &Profile) -> Result<String, WireError> {
        match self.protocol.format() {
            ClientFormat::Km(fmt) => encode_km(profile, fmt),
            ClientFormat::Calc => encode_calc(profile),
        }
    }
}

impl fmt::Display for ClientEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}) {}", self.name, self.socket_addr(), self.protocol)
    }
}

impl FromStr for ClientEndpoint {
    type Err = ClientParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // the address may itself contain colons (IPv6), so peel port and
        // protocol off the right
        let shape = || ClientParseError::Shape(s.to_string());
        let (name, rest) = s.split_once(':').ok_or_else(shape)?;
        let mut tail = rest.rsplitn(3, ':');
        let (Some(protocol), Some(port), Some(ip)) = (tail.next(), tail.next(), tail.next()) else {
            return Err(shape());
        };
        let host = ip.trim().trim_start_matches('[').trim_end_matches(']');
        let address = host.parse().map_err(|_| ClientParseError::Address(ip.to_string()))?;
        let port = port.trim().parse().map_err(|_| ClientParseError::Port(port.to_string()))?;
        Ok(Self::new(name.trim(), address, port, protocol.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_string() {
        let c: ClientEndpoint = "Bridge:192.168.1.20:4001:sis".parse().unwrap();
        assert_eq!(c.name, "Bridge");
        assert_eq!(c.socket_addr(), "192.168.1.20:4001".parse().unwrap());
        assert_eq!(c.protocol, ClientProtocol::Sis);
        assert!(c.alive);
        assert_eq!(c.to_string(), "Bridge(192.168.1.20:4001) SIS");
    }

    #[test]
    fn parses_ipv6_client_strings() {
        let c: ClientEndpoint = "Bridge:fe80::1:4001:SIS".parse().unwrap();
        assert_eq!(c.address, "fe80::1".parse::<IpAddr>().unwrap());
        assert_eq!(c.port, 4001);
        assert_eq!(c.to_string(), "Bridge([fe80::1]:4001) SIS");

        let c: ClientEndpoint = "B:[::1]:4001:sis".parse().unwrap();
        assert_eq!(c.socket_addr(), "[::1]:4001".parse().unwrap());
        assert_eq!(c.protocol, ClientProtocol::Sis);
    }

    #[test]
    fn rejects_malformed_clients() {
        assert!(matches!("a:b:c".parse::<ClientEndpoint>(), Err(ClientParseError::Shape(_))));
        assert!(matches!("a:nohost:1:SIS".parse::<ClientEndpoint>(), Err(ClientParseError::Address(_))));
        assert!(matches!("a:127.0.0.1:x:SIS".parse::<ClientEndpoint>(), Err(ClientParseError::Port(_))));
        assert!(matches!("a:127.0.0.1:1:CARIS".parse::<ClientEndpoint>(), Err(ClientParseError::Protocol(_))));
    }

    #[test]
    fn protocol_selects_format() {
        assert_eq!(ClientProtocol::Sis.format(), ClientFormat::Km(KmFormat::S01));
        assert_eq!(ClientProtocol::Qinsy.format(), ClientFormat::Km(KmFormat::S12));
        assert_eq!(ClientProtocol::Pds2000.format(), ClientFormat::Km(KmFormat::S12));
        assert_eq!(ClientProtocol::Hypack.format(), ClientFormat::Calc);
        assert!(ClientProtocol::Sis.confirmable());
        assert!(!ClientProtocol::Hypack.confirmable());
    }

    #[test]
    fn encode_uses_protocol_format() {
        let p = Profile::from_depth_speed(&[0.0, 10.0], &[1500.0, 1490.0]);
        let hypack: ClientEndpoint = "h:10.0.0.1:9888:HYPACK".parse().unwrap();
        assert!(hypack.encode(&p).unwrap().starts_with("CALC,"));
        let qinsy: ClientEndpoint = "q:10.0.0.2:4001:QINSY".parse().unwrap();
        assert!(qinsy.encode(&p).unwrap().starts_with("$MVS12,"));
    }
}
