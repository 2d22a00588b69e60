//! R20 profile request: asks SIS to re-broadcast the profile it is using.
//!
//! The EM model behind a SIS host is unknown, so every known sensor code is
//! tried in turn with a pause between attempts.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tracing::{info, warn};

use crate::transport::Transport;
use crate::wire::{seal, verify_checksum};

/// SIS datagram input port for external requests.
pub const REQUEST_PORT: u16 = 4001;

pub const SENSOR_CODES: [&str; 5] = ["710", "122", "302", "3020", "2040"];

/// `$SMR20,EMX=<code>,*hh\` CR LF
pub fn request_sentence(code: &str) -> String {
    seal(format!("$SMR20,EMX={code},"))
}

/// Sensor code of a valid request sentence.
pub fn parse_request(sentence: &str) -> Option<&str> {
    verify_checksum(sentence).ok()?;
    let rest = sentence.strip_prefix("$SMR20,EMX=")?;
    rest.split(',').next()
}

/// Send one request per sensor code to `ip`, pausing `delay` between codes.
/// Returns how many requests were sent successfully.
pub async fn request_profile(transport: &dyn Transport, ip: IpAddr, delay: Duration) -> usize {
    let addr = SocketAddr::new(ip, REQUEST_PORT);
    let mut sent = 0;
    for (i, code) in SENSOR_CODES.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        info!("KM: requesting SVP from sensor {code} at {addr}");
        match transport.send_to(request_sentence(code).as_bytes(), addr) {
            Ok(()) => sent += 1,
            Err(e) => warn!("KM: profile request failed: {e}"),
        }
    }
    sent
}
