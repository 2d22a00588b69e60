//! Typed Kongsberg datagram records and their little-endian decoders.
//!
//! Every decoder starts after the 16-byte common header and checks each read
//! against the remaining length, so a short datagram yields
//! `DecodeError::Truncated` instead of a panic.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use ssp_types::{Profile, Sample, SampleSource, SensorType};

use super::{DecodeError, KmHeader, KmOpcode, Reader};

// ── Navigation & attitude ─────────────────────────────────────────────────────

/// 'P' position datagram.
#[derive(Debug, Clone, Serialize)]
pub struct PositionRecord {
    pub header: KmHeader,
    /// Decimal degrees.
    pub latitude: f64,
    /// Decimal degrees.
    pub longitude: f64,
    pub fix_quality_cm: u16,
    pub speed_cm_s: u16,
    /// Degrees.
    pub course: f64,
    /// Degrees.
    pub heading: f64,
    pub descriptor: u8,
    /// Raw input sentence as received by the PU (usually NMEA).
    pub input: String,
}

fn decode_position(header: KmHeader, r: &mut Reader) -> Result<PositionRecord, DecodeError> {
    let latitude = r.i32()? as f64 / 20_000_000.0;
    let longitude = r.i32()? as f64 / 10_000_000.0;
    let fix_quality_cm = r.u16()?;
    let speed_cm_s = r.u16()?;
    let course = r.u16()? as f64 / 100.0;
    let heading = r.u16()? as f64 / 100.0;
    let descriptor = r.u8()?;
    let len = r.u8()? as usize;
    let input = String::from_utf8_lossy(r.bytes(len)?).trim_end_matches('\0').to_string();
    Ok(PositionRecord {
        header,
        latitude,
        longitude,
        fix_quality_cm,
        speed_cm_s,
        course,
        heading,
        descriptor,
        input,
    })
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AttitudeSample {
    pub time_ms: u16,
    pub status: u16,
    /// Degrees.
    pub roll: f64,
    /// Degrees.
    pub pitch: f64,
    /// Metres.
    pub heave: f64,
    /// Degrees.
    pub heading: f64,
}

/// 'A' attitude datagram.
#[derive(Debug, Clone, Serialize)]
pub struct AttitudeRecord {
    pub header: KmHeader,
    pub samples: Vec<AttitudeSample>,
    pub descriptor: Option<u8>,
}

fn decode_attitude(header: KmHeader, r: &mut Reader) -> Result<AttitudeRecord, DecodeError> {
    let n = r.u16()? as usize;
    r.need(n * 12)?;
    let mut samples = Vec::with_capacity(n);
    for _ in 0..n {
        samples.push(AttitudeSample {
            time_ms: r.u16()?,
            status: r.u16()?,
            roll: r.i16()? as f64 / 100.0,
            pitch: r.i16()? as f64 / 100.0,
            heave: r.i16()? as f64 / 100.0,
            heading: r.u16()? as f64 / 100.0,
        });
    }
    let descriptor = r.u8().ok();
    Ok(AttitudeRecord { header, samples, descriptor })
}

// ── Depth ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Xyz88Beam {
    pub depth: f32,
    pub across_track: f32,
    pub along_track: f32,
    pub window_length: u16,
    pub quality: u8,
    pub incidence_adjustment: i8,
    pub detection_info: u8,
    pub cleaning_info: i8,
    /// 0.1 dB units.
    pub reflectivity: i16,
}

/// 'X' XYZ88 depth datagram. Carries the sound speed at the transducer,
/// used as the surface sound speed.
#[derive(Debug, Clone, Serialize)]
pub struct Xyz88Record {
    pub header: KmHeader,
    /// Degrees.
    pub heading: f64,
    /// m/s.
    pub sound_speed: f64,
    /// Transmit transducer depth re water level, metres.
    pub transducer_depth: f32,
    pub max_beams: u16,
    pub valid_detections: u16,
    pub sampling_frequency: f32,
    pub scanning_info: u8,
    pub beams: Vec<Xyz88Beam>,
}

pub(crate) const XYZ88_BEAM_LEN: usize = 20;

fn decode_xyz88(header: KmHeader, r: &mut Reader) -> Result<Xyz88Record, DecodeError> {
    let heading = r.u16()? as f64 / 100.0;
    let sound_speed = r.u16()? as f64 / 10.0;
    let transducer_depth = r.f32()?;
    let max_beams = r.u16()?;
    let valid_detections = r.u16()?;
    let sampling_frequency = r.f32()?;
    let scanning_info = r.u8()?;
    r.skip(3)?;
    let n = valid_detections as usize;
    r.need(n * XYZ88_BEAM_LEN)?;
    let mut beams = Vec::with_capacity(n);
    for _ in 0..n {
        beams.push(Xyz88Beam {
            depth: r.f32()?,
            across_track: r.f32()?,
            along_track: r.f32()?,
            window_length: r.u16()?,
            quality: r.u8()?,
            incidence_adjustment: r.i8()?,
            detection_info: r.u8()?,
            cleaning_info: r.i8()?,
            reflectivity: r.i16()?,
        });
    }
    Ok(Xyz88Record {
        header,
        heading,
        sound_speed,
        transducer_depth,
        max_beams,
        valid_detections,
        sampling_frequency,
        scanning_info,
        beams,
    })
}

// ── Raw range and angle 78 ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TxSector78 {
    /// Degrees.
    pub tilt_angle: f64,
    /// Metres.
    pub focus_range: f64,
    pub signal_length: f32,
    pub tx_delay: f32,
    pub center_frequency: f32,
    /// dB/km.
    pub mean_absorption: f64,
    pub waveform_id: u8,
    pub sector: u8,
    pub bandwidth: f32,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RxBeam78 {
    /// Degrees.
    pub pointing_angle: f64,
    pub tx_sector: u8,
    pub detection_info: u8,
    pub window_length: u16,
    pub quality: u8,
    pub d_corr: i8,
    /// Seconds.
    pub travel_time: f32,
    /// dB.
    pub reflectivity: f64,
    pub cleaning_info: i8,
}

/// 'N' raw range and angle datagram.
#[derive(Debug, Clone, Serialize)]
pub struct RawRangeAngle78Record {
    pub header: KmHeader,
    /// m/s.
    pub sound_speed: f64,
    pub valid_detections: u16,
    pub sampling_frequency: f32,
    pub dscale: u32,
    pub tx: Vec<TxSector78>,
    pub rx: Vec<RxBeam78>,
}

fn decode_range_angle78(header: KmHeader, r: &mut Reader) -> Result<RawRangeAngle78Record, DecodeError> {
    let sound_speed = r.u16()? as f64 / 10.0;
    let ntx = r.u16()? as usize;
    let nrx = r.u16()? as usize;
    let valid_detections = r.u16()?;
    let sampling_frequency = r.f32()?;
    let dscale = r.u32()?;
    r.need(ntx * 24 + nrx * 16)?;
    let mut tx = Vec::with_capacity(ntx);
    for _ in 0..ntx {
        tx.push(TxSector78 {
            tilt_angle: r.i16()? as f64 / 100.0,
            focus_range: r.u16()? as f64 / 10.0,
            signal_length: r.f32()?,
            tx_delay: r.f32()?,
            center_frequency: r.f32()?,
            mean_absorption: r.u16()? as f64 / 100.0,
            waveform_id: r.u8()?,
            sector: r.u8()?,
            bandwidth: r.f32()?,
        });
    }
    let mut rx = Vec::with_capacity(nrx);
    for _ in 0..nrx {
        let pointing_angle = r.i16()? as f64 / 100.0;
        let tx_sector = r.u8()?;
        let detection_info = r.u8()?;
        let window_length = r.u16()?;
        let quality = r.u8()?;
        let d_corr = r.i8()?;
        let travel_time = r.f32()?;
        let reflectivity = r.i16()? as f64 / 10.0;
        let cleaning_info = r.i8()?;
        r.skip(1)?;
        rx.push(RxBeam78 {
            pointing_angle,
            tx_sector,
            detection_info,
            window_length,
            quality,
            d_corr,
            travel_time,
            reflectivity,
            cleaning_info,
        });
    }
    Ok(RawRangeAngle78Record { header, sound_speed, valid_detections, sampling_frequency, dscale, tx, rx })
}

// ── Installation & runtime ────────────────────────────────────────────────────

/// 'I' / 'i' installation parameters datagram.
#[derive(Debug, Clone, Serialize)]
pub struct InstallationRecord {
    pub header: KmHeader,
    pub started: bool,
    pub survey_line: u16,
    pub secondary_serial: u16,
    /// `KEY=value` pairs in datagram order.
    pub params: Vec<(String, String)>,
}

impl InstallationRecord {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Water line vertical location re reference point, metres.
    pub fn water_line(&self) -> Option<f64> {
        self.param("WLZ").and_then(|v| v.parse().ok())
    }
}

fn decode_installation(header: KmHeader, started: bool, r: &mut Reader) -> Result<InstallationRecord, DecodeError> {
    let survey_line = r.u16()?;
    let secondary_serial = r.u16()?;
    let text = String::from_utf8_lossy(r.rest());
    let params = text
        .split(',')
        .filter_map(|kv| {
            let (k, v) = kv.split_once('=')?;
            let k = k.trim_matches(|c: char| c.is_whitespace() || c.is_control());
            let v = v.trim_matches(|c: char| c.is_whitespace() || c.is_control());
            (!k.is_empty()).then(|| (k.to_string(), v.to_string()))
        })
        .collect();
    Ok(InstallationRecord { header, started, survey_line, secondary_serial, params })
}

/// 'R' runtime parameters datagram (leading fields).
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeRecord {
    pub header: KmHeader,
    pub mode: u8,
    pub filter_id: u8,
    pub min_depth: u16,
    pub max_depth: u16,
    /// dB/km.
    pub absorption: f64,
    pub pulse_length_us: u16,
    /// Degrees.
    pub tx_beamwidth: f64,
    pub tx_power_db: i8,
    /// Degrees.
    pub rx_beamwidth: f64,
    /// Hz.
    pub rx_bandwidth: u32,
    pub rx_fixed_gain: u8,
    pub tvg_crossover_deg: u8,
    pub sound_speed_source: u8,
}

fn decode_runtime(header: KmHeader, r: &mut Reader) -> Result<RuntimeRecord, DecodeError> {
    r.need(22)?;
    r.skip(4)?;
    Ok(RuntimeRecord {
        header,
        mode: r.u8()?,
        filter_id: r.u8()?,
        min_depth: r.u16()?,
        max_depth: r.u16()?,
        absorption: r.u16()? as f64 / 100.0,
        pulse_length_us: r.u16()?,
        tx_beamwidth: r.u16()? as f64 / 10.0,
        tx_power_db: r.i8()?,
        rx_beamwidth: r.u8()? as f64 / 10.0,
        rx_bandwidth: r.u8()? as u32 * 50,
        rx_fixed_gain: r.u8()?,
        tvg_crossover_deg: r.u8()?,
        sound_speed_source: r.u8()?,
    })
}

// ── Sound speed ───────────────────────────────────────────────────────────────

/// 'U' sound speed profile datagram: the profile currently applied by the
/// acquisition system.
#[derive(Debug, Clone, Serialize)]
pub struct SspRecord {
    pub header: KmHeader,
    /// `YYYYMMDD`.
    pub profile_date: u32,
    /// Seconds since midnight.
    pub profile_time: u32,
    pub depth_resolution_cm: u16,
    /// Metres.
    pub depth: Vec<f64>,
    /// m/s.
    pub speed: Vec<f64>,
}

impl SspRecord {
    /// Time the profile was taken, as stamped by the acquisition system.
    pub fn acquisition_time(&self) -> Option<NaiveDateTime> {
        let d = self.profile_date;
        let date = NaiveDate::from_ymd_opt((d / 10_000) as i32, (d / 100) % 100, d % 100)?;
        date.and_hms_opt(0, 0, 0)
            .map(|t| t + chrono::Duration::seconds(self.profile_time as i64))
    }

    pub fn to_profile(&self) -> Profile {
        let mut p = Profile::new();
        for (d, s) in self.depth.iter().zip(&self.speed) {
            p.push(Sample { source: SampleSource::Raw, ..Sample::raw(*d, *s) });
        }
        p.timestamp = self.acquisition_time();
        p.sensor_type = SensorType::Svp;
        p.driver = "KM.U".into();
        p
    }
}

fn decode_ssp(header: KmHeader, r: &mut Reader) -> Result<SspRecord, DecodeError> {
    let profile_date = r.u32()?;
    let profile_time = r.u32()?;
    let n = r.u16()? as usize;
    let depth_resolution_cm = r.u16()?;
    r.need(n * 8)?;
    let resolution = depth_resolution_cm as f64;
    let mut depth = Vec::with_capacity(n);
    let mut speed = Vec::with_capacity(n);
    for _ in 0..n {
        depth.push(r.u32()? as f64 * resolution / 100.0);
        speed.push(r.u32()? as f64 / 10.0);
    }
    Ok(SspRecord { header, profile_date, profile_time, depth_resolution_cm, depth, speed })
}

/// 'G' surface sound speed datagram.
#[derive(Debug, Clone, Serialize)]
pub struct SurfaceSoundSpeedRecord {
    pub header: KmHeader,
    /// (seconds since record start, m/s)
    pub samples: Vec<(u16, f64)>,
}

impl SurfaceSoundSpeedRecord {
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().map(|(_, s)| s).sum::<f64>() / self.samples.len() as f64)
    }
}

fn decode_surface_ss(header: KmHeader, r: &mut Reader) -> Result<SurfaceSoundSpeedRecord, DecodeError> {
    let n = r.u16()? as usize;
    r.need(n * 4)?;
    let mut samples = Vec::with_capacity(n);
    for _ in 0..n {
        samples.push((r.u16()?, r.u16()? as f64 / 10.0));
    }
    Ok(SurfaceSoundSpeedRecord { header, samples })
}

// ── Imagery & water column ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SeabedBeam89 {
    pub sorting_direction: i8,
    pub detection_info: u8,
    pub samples: u16,
    pub centre_sample: u16,
}

/// 'Y' seabed image 89 datagram.
#[derive(Debug, Clone, Serialize)]
pub struct SeabedImage89Record {
    pub header: KmHeader,
    pub sampling_frequency: f32,
    pub range_to_normal: u16,
    /// dB.
    pub bs_normal: f64,
    /// dB.
    pub bs_oblique: f64,
    /// Degrees.
    pub tx_beamwidth: f64,
    /// Degrees.
    pub tvg_crossover: f64,
    pub beams: Vec<SeabedBeam89>,
    /// 0.1 dB units.
    pub amplitudes: Vec<i16>,
}

fn decode_seabed89(header: KmHeader, r: &mut Reader) -> Result<SeabedImage89Record, DecodeError> {
    let sampling_frequency = r.f32()?;
    let range_to_normal = r.u16()?;
    let bs_normal = r.i16()? as f64 / 10.0;
    let bs_oblique = r.i16()? as f64 / 10.0;
    let tx_beamwidth = r.u16()? as f64 / 10.0;
    let tvg_crossover = r.u16()? as f64 / 10.0;
    let n = r.u16()? as usize;
    r.need(n * 6)?;
    let mut beams = Vec::with_capacity(n);
    for _ in 0..n {
        beams.push(SeabedBeam89 {
            sorting_direction: r.i8()?,
            detection_info: r.u8()?,
            samples: r.u16()?,
            centre_sample: r.u16()?,
        });
    }
    let total: usize = beams.iter().map(|b| b.samples as usize).sum();
    r.need(total * 2)?;
    let mut amplitudes = Vec::with_capacity(total);
    for _ in 0..total {
        amplitudes.push(r.i16()?);
    }
    Ok(SeabedImage89Record {
        header,
        sampling_frequency,
        range_to_normal,
        bs_normal,
        bs_oblique,
        tx_beamwidth,
        tvg_crossover,
        beams,
        amplitudes,
    })
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct WaterColumnTx {
    /// Degrees.
    pub tilt_angle: f64,
    /// Hz.
    pub center_frequency: u32,
    pub sector: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaterColumnBeam {
    /// Degrees.
    pub pointing_angle: f64,
    pub start_range: u16,
    pub detected_range: u16,
    pub tx_sector: u8,
    pub beam_number: u8,
    /// 0.5 dB units.
    pub amplitudes: Vec<i8>,
}

/// 'k' water column datagram (one of possibly several per ping).
#[derive(Debug, Clone, Serialize)]
pub struct WaterColumnRecord {
    pub header: KmHeader,
    pub datagram_count: u16,
    pub datagram_number: u16,
    pub total_rx_beams: u16,
    /// m/s.
    pub sound_speed: f64,
    /// Hz.
    pub sampling_frequency: f64,
    /// Metres.
    pub tx_heave: f64,
    pub tvg_function: u8,
    pub tvg_offset: i8,
    pub scanning_info: u8,
    pub tx: Vec<WaterColumnTx>,
    pub beams: Vec<WaterColumnBeam>,
}

fn decode_water_column(header: KmHeader, r: &mut Reader) -> Result<WaterColumnRecord, DecodeError> {
    let datagram_count = r.u16()?;
    let datagram_number = r.u16()?;
    let ntx = r.u16()? as usize;
    let total_rx_beams = r.u16()?;
    let nrx = r.u16()? as usize;
    let sound_speed = r.u16()? as f64 / 10.0;
    let sampling_frequency = r.u32()? as f64 / 100.0;
    let tx_heave = r.i16()? as f64 / 100.0;
    let tvg_function = r.u8()?;
    let tvg_offset = r.i8()?;
    let scanning_info = r.u8()?;
    r.skip(3)?;
    r.need(ntx * 6)?;
    let mut tx = Vec::with_capacity(ntx);
    for _ in 0..ntx {
        let tilt_angle = r.i16()? as f64 / 100.0;
        let center_frequency = r.u16()? as u32 * 10;
        let sector = r.u8()?;
        r.skip(1)?;
        tx.push(WaterColumnTx { tilt_angle, center_frequency, sector });
    }
    let mut beams = Vec::with_capacity(nrx);
    for _ in 0..nrx {
        let pointing_angle = r.i16()? as f64 / 100.0;
        let start_range = r.u16()?;
        let ns = r.u16()? as usize;
        let detected_range = r.u16()?;
        let tx_sector = r.u8()?;
        let beam_number = r.u8()?;
        let amplitudes = r.bytes(ns)?.iter().map(|b| *b as i8).collect();
        beams.push(WaterColumnBeam { pointing_angle, start_range, detected_range, tx_sector, beam_number, amplitudes });
    }
    Ok(WaterColumnRecord {
        header,
        datagram_count,
        datagram_number,
        total_rx_beams,
        sound_speed,
        sampling_frequency,
        tx_heave,
        tvg_function,
        tvg_offset,
        scanning_info,
        tx,
        beams,
    })
}

/// 'B' built-in self test output.
#[derive(Debug, Clone, Serialize)]
pub struct BistRecord {
    pub header: KmHeader,
    pub test_number: u16,
    pub status: i16,
    pub report: String,
}

fn decode_bist(header: KmHeader, r: &mut Reader) -> Result<BistRecord, DecodeError> {
    let test_number = r.u16()?;
    let status = r.i16()?;
    let report = String::from_utf8_lossy(r.rest())
        .trim_end_matches(|c: char| c == '\0' || c == '\u{3}')
        .to_string();
    Ok(BistRecord { header, test_number, status, report })
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// One decoded datagram.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KmRecord {
    Position(PositionRecord),
    Attitude(AttitudeRecord),
    Xyz88(Xyz88Record),
    RawRangeAngle78(RawRangeAngle78Record),
    Installation(InstallationRecord),
    Runtime(RuntimeRecord),
    SoundSpeedProfile(SspRecord),
    SurfaceSoundSpeed(SurfaceSoundSpeedRecord),
    SeabedImage89(SeabedImage89Record),
    WaterColumn(WaterColumnRecord),
    Bist(BistRecord),
}

impl KmRecord {
    pub fn header(&self) -> &KmHeader {
        match self {
            Self::Position(r) => &r.header,
            Self::Attitude(r) => &r.header,
            Self::Xyz88(r) => &r.header,
            Self::RawRangeAngle78(r) => &r.header,
            Self::Installation(r) => &r.header,
            Self::Runtime(r) => &r.header,
            Self::SoundSpeedProfile(r) => &r.header,
            Self::SurfaceSoundSpeed(r) => &r.header,
            Self::SeabedImage89(r) => &r.header,
            Self::WaterColumn(r) => &r.header,
            Self::Bist(r) => &r.header,
        }
    }

    pub fn opcode(&self) -> KmOpcode {
        self.header().opcode
    }
}

pub(super) fn decode_body(header: KmHeader, r: &mut Reader) -> Result<KmRecord, DecodeError> {
    Ok(match header.opcode {
        KmOpcode::Position => KmRecord::Position(decode_position(header, r)?),
        KmOpcode::Attitude => KmRecord::Attitude(decode_attitude(header, r)?),
        KmOpcode::Xyz88 => KmRecord::Xyz88(decode_xyz88(header, r)?),
        KmOpcode::RawRangeAngle78 => KmRecord::RawRangeAngle78(decode_range_angle78(header, r)?),
        KmOpcode::InstallationStart => KmRecord::Installation(decode_installation(header, true, r)?),
        KmOpcode::InstallationStop => KmRecord::Installation(decode_installation(header, false, r)?),
        KmOpcode::Runtime => KmRecord::Runtime(decode_runtime(header, r)?),
        KmOpcode::SoundSpeedProfile => KmRecord::SoundSpeedProfile(decode_ssp(header, r)?),
        KmOpcode::SurfaceSoundSpeed => KmRecord::SurfaceSoundSpeed(decode_surface_ss(header, r)?),
        KmOpcode::SeabedImage89 => KmRecord::SeabedImage89(decode_seabed89(header, r)?),
        KmOpcode::WaterColumn => KmRecord::WaterColumn(decode_water_column(header, r)?),
        KmOpcode::Bist => KmRecord::Bist(decode_bist(header, r)?),
        other => return Err(DecodeError::Unsupported(other)),
    })
}
