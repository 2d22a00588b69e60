//! Encoders for the datagram types SIS emits and the distribution loop
//! consumes. Used by the acquisition emulator and by tests.

use bytes::{BufMut, BytesMut};

use super::records::XYZ88_BEAM_LEN;
use super::{KmHeader, STX};

/// 16-byte common header.
pub fn encode_header(h: &KmHeader) -> Vec<u8> {
    let mut b = BytesMut::with_capacity(64);
    put_header(&mut b, h);
    b.to_vec()
}

fn put_header(b: &mut BytesMut, h: &KmHeader) {
    b.put_u8(STX);
    b.put_u8(h.opcode.code());
    b.put_u16_le(h.model);
    b.put_u32_le(h.date);
    b.put_u32_le(h.time_ms);
    b.put_u16_le(h.counter);
    b.put_u16_le(h.serial);
}

/// 'P' datagram with the given position (degrees) and heading.
pub fn encode_position(h: &KmHeader, lat: f64, lon: f64, heading: f64, input: &str) -> Vec<u8> {
    let input = &input.as_bytes()[..input.len().min(u8::MAX as usize)];
    let mut b = BytesMut::with_capacity(32 + input.len());
    put_header(&mut b, h);
    b.put_i32_le((lat * 20_000_000.0).round() as i32);
    b.put_i32_le((lon * 10_000_000.0).round() as i32);
    b.put_u16_le(100);
    b.put_u16_le(0);
    b.put_u16_le(0);
    b.put_u16_le((heading * 100.0).round() as u16);
    b.put_u8(0x81);
    b.put_u8(input.len() as u8);
    b.put_slice(input);
    b.to_vec()
}

/// 'X' datagram; `beams` are (depth, across, along) in metres.
pub fn encode_xyz88(h: &KmHeader, sound_speed: f64, transducer_depth: f32, beams: &[(f32, f32, f32)]) -> Vec<u8> {
    let mut b = BytesMut::with_capacity(36 + beams.len() * XYZ88_BEAM_LEN);
    put_header(&mut b, h);
    b.put_u16_le(0);
    b.put_u16_le((sound_speed * 10.0).round() as u16);
    b.put_f32_le(transducer_depth);
    b.put_u16_le(beams.len() as u16);
    b.put_u16_le(beams.len() as u16);
    b.put_f32_le(0.0);
    b.put_u8(0);
    b.put_slice(&[0; 3]);
    for (z, y, x) in beams {
        b.put_f32_le(*z);
        b.put_f32_le(*y);
        b.put_f32_le(*x);
        b.put_u16_le(0);
        b.put_u8(0);
        b.put_i8(0);
        b.put_u8(0);
        b.put_i8(0);
        b.put_i16_le(0);
    }
    b.to_vec()
}

/// 'U' datagram at 1 cm depth resolution.
pub fn encode_ssp(h: &KmHeader, profile_date: u32, profile_time: u32, depth: &[f64], speed: &[f64]) -> Vec<u8> {
    let n = depth.len().min(speed.len());
    let mut b = BytesMut::with_capacity(28 + n * 8);
    put_header(&mut b, h);
    b.put_u32_le(profile_date);
    b.put_u32_le(profile_time);
    b.put_u16_le(n as u16);
    b.put_u16_le(1);
    for (d, s) in depth.iter().zip(speed).take(n) {
        b.put_u32_le((d * 100.0).round() as u32);
        b.put_u32_le((s * 10.0).round() as u32);
    }
    b.to_vec()
}

/// 'G' datagram from (seconds, m/s) pairs.
pub fn encode_surface_sound_speed(h: &KmHeader, samples: &[(u16, f64)]) -> Vec<u8> {
    let mut b = BytesMut::with_capacity(18 + samples.len() * 4);
    put_header(&mut b, h);
    b.put_u16_le(samples.len() as u16);
    for (t, s) in samples {
        b.put_u16_le(*t);
        b.put_u16_le((s * 10.0).round() as u16);
    }
    b.to_vec()
}
