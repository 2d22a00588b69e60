//! udp_tx.rs: Kongsberg datagram transmitter
//!
//! Sends 'P', 'X' and 'U' datagrams to the distribution server's Kongsberg
//! port. Send errors are logged and never stop the simulator.

use std::net::UdpSocket;

use chrono::{NaiveDateTime, Timelike};
use ssp_server::kongsberg::encode::{encode_position, encode_ssp, encode_xyz88};
use ssp_server::kongsberg::{KmHeader, KmOpcode};
use ssp_server::wire::{seconds_of_day, yyyymmdd};
use ssp_types::Profile;
use tracing::{debug, warn};

pub struct KmTransmitter {
    socket: UdpSocket,
    server_addr: String,
    model: u16,
    serial: u16,
    counter: u16,
}

impl KmTransmitter {
    pub fn new(server_addr: &str, model: u16, serial: u16) -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(false)?;
        Ok(Self { socket, server_addr: server_addr.to_string(), model, serial, counter: 0 })
    }

    fn header(&mut self, opcode: KmOpcode, now: NaiveDateTime) -> KmHeader {
        self.counter = self.counter.wrapping_add(1);
        KmHeader {
            opcode,
            model: self.model,
            date: yyyymmdd(&now),
            time_ms: now.num_seconds_from_midnight() * 1000 + now.nanosecond() / 1_000_000,
            counter: self.counter,
            serial: self.serial,
        }
    }

    pub fn send_position(&mut self, now: NaiveDateTime, lat: f64, lon: f64, heading: f64) {
        let h = self.header(KmOpcode::Position, now);
        let gga = format!("$GPGGA,{}", now.format("%H%M%S"));
        self.send(&encode_position(&h, lat, lon, heading, &gga), "P");
    }

    pub fn send_depth(&mut self, now: NaiveDateTime, sound_speed: f64, transducer_depth: f32) {
        let h = self.header(KmOpcode::Xyz88, now);
        self.send(&encode_xyz88(&h, sound_speed, transducer_depth, &[]), "X");
    }

    /// Re-broadcast the applied profile, stamped with its acquisition time.
    pub fn send_profile(&mut self, now: NaiveDateTime, profile: &Profile) {
        let h = self.header(KmOpcode::SoundSpeedProfile, now);
        let stamp = profile.timestamp.unwrap_or(now);
        let payload = encode_ssp(&h, yyyymmdd(&stamp), seconds_of_day(&stamp), &profile.depth, &profile.speed);
        self.send(&payload, "U");
    }

    fn send(&self, payload: &[u8], kind: &str) {
        match self.socket.send_to(payload, &self.server_addr) {
            Ok(n) => debug!("UDP → {} {kind} {n} bytes", self.server_addr),
            Err(e) => warn!("UDP: {kind} send failed: {e}"),
        }
    }
}
