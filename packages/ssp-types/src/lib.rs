//! # ssp-types
//!
//! Shared sound speed profile model for the SSP distribution workspace.
//!
//! These types are used by:
//! - `ssp-server`: profile processing, wire encoding, distribution loop
//! - `sis-simulator`: reflecting received casts back as acquisition datagrams
//!
//! ## Conventions
//!
//! - Depth in metres, positive down
//! - Sound speed in m/s, temperature in °C, salinity in psu
//! - Samples are stored columnar; every column has the same length
//! - `flag` is the reject column: `Flag::Keep` samples form the valid view

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ── Sample provenance ─────────────────────────────────────────────────────────

/// Where a single sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SampleSource {
    Raw = 0,
    User = 1,
    Atlas = 2,
    Interp = 3,
    SurfaceSensor = 4,
    Woa09Extend = 5,
    Woa13Extend = 6,
    RtofsExtend = 7,
    UserRefExtend = 8,
}

impl SampleSource {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Raw,
            1 => Self::User,
            2 => Self::Atlas,
            3 => Self::Interp,
            4 => Self::SurfaceSensor,
            5 => Self::Woa09Extend,
            6 => Self::Woa13Extend,
            7 => Self::RtofsExtend,
            8 => Self::UserRefExtend,
            _ => return None,
        })
    }
}

/// Reject flag for a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Flag {
    #[default]
    Keep = 0,
    Reject = 1,
}

// ── Instrument classification ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SensorType {
    #[default]
    Unknown = 0,
    Synthetic = 1,
    Svp = 2,
    Ctd = 3,
    Xbt = 4,
    Xsv = 5,
    Xctd = 6,
    Svpt = 7,
    Mvp = 8,
}

impl SensorType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Synthetic => "Synthetic",
            Self::Svp => "SVP",
            Self::Ctd => "CTD",
            Self::Xbt => "XBT",
            Self::Xsv => "XSV",
            Self::Xctd => "XCTD",
            Self::Svpt => "SVPT",
            Self::Mvp => "MVP",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProbeType {
    #[default]
    Unknown = 0,
    Synthetic = 1,
    Svp = 2,
    Castaway = 3,
    Idronaut = 4,
    S2 = 5,
    Sbe = 6,
    Xbt = 7,
    DeepBlue = 8,
    T10 = 9,
    T11 = 10,
    T4 = 11,
    T5 = 12,
    T5_20 = 13,
    T7 = 14,
    Xsv01 = 15,
    Xsv02 = 16,
    Xctd1 = 17,
    Xctd2 = 18,
    MonitorSvp500 = 20,
    MidasSvp6000 = 21,
    MiniSvp = 22,
    Mvp = 23,
}

impl ProbeType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Synthetic => "Synthetic",
            Self::Svp => "SVP",
            Self::Castaway => "Castaway",
            Self::Idronaut => "Idronaut",
            Self::S2 => "S2",
            Self::Sbe => "SBE",
            Self::Xbt => "XBT",
            Self::DeepBlue => "Deep Blue",
            Self::T10 => "T-10",
            Self::T11 => "T-11 (Fine Structure)",
            Self::T4 => "T-4",
            Self::T5 => "T-5",
            Self::T5_20 => "T-5/20",
            Self::T7 => "T-7",
            Self::Xsv01 => "XSV-01",
            Self::Xsv02 => "XSV-02",
            Self::Xctd1 => "XCTD-1",
            Self::Xctd2 => "XCTD-2",
            Self::MonitorSvp500 => "MONITOR SVP 500",
            Self::MidasSvp6000 => "MIDAS SVP 6000",
            Self::MiniSvp => "MiniSVP",
            Self::Mvp => "MVP",
        }
    }
}

// ── Sample columns ────────────────────────────────────────────────────────────

/// Numeric columns addressable by flagging and resampling operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Column {
    Depth,
    Speed,
    Temperature,
    Salinity,
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Depth => "depth",
            Self::Speed => "speed",
            Self::Temperature => "temperature",
            Self::Salinity => "salinity",
        };
        f.write_str(s)
    }
}

// ── Kongsberg SSP formats ─────────────────────────────────────────────────────

/// Sound velocity profile layouts accepted by Kongsberg SIS.
///
/// The digit pair after `S` selects the fields carried per sample:
/// `x0` depth+speed, `x1` depth+speed+temperature+salinity, `x2`
/// depth+temperature+salinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KmFormat {
    Asvp,
    S00,
    S01,
    S10,
    S11,
    S02,
    S12,
    S22,
}

impl KmFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Asvp => "ASVP",
            Self::S00 => "S00",
            Self::S01 => "S01",
            Self::S10 => "S10",
            Self::S11 => "S11",
            Self::S02 => "S02",
            Self::S12 => "S12",
            Self::S22 => "S22",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "ASVP" => Self::Asvp,
            "S00" => Self::S00,
            "S01" => Self::S01,
            "S10" => Self::S10,
            "S11" => Self::S11,
            "S02" => Self::S02,
            "S12" => Self::S12,
            "S22" => Self::S22,
            _ => return None,
        })
    }
}

// ── Position ──────────────────────────────────────────────────────────────────

/// Geographic position in decimal degrees (WGS84).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

// ── Profile ───────────────────────────────────────────────────────────────────

/// One row of the sample table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub depth: f64,
    pub speed: f64,
    pub temperature: f64,
    pub salinity: f64,
    pub source: SampleSource,
    pub flag: Flag,
}

impl Sample {
    pub fn raw(depth: f64, speed: f64) -> Self {
        Self {
            depth,
            speed,
            temperature: 0.0,
            salinity: 0.0,
            source: SampleSource::Raw,
            flag: Flag::Keep,
        }
    }
}

/// A sound speed cast: metadata plus a columnar sample table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub position: Option<Position>,
    pub timestamp: Option<NaiveDateTime>,
    #[serde(default)]
    pub sensor_type: SensorType,
    #[serde(default)]
    pub probe_type: ProbeType,
    #[serde(default)]
    pub driver: String,
    /// Provenance trail, tokens separated by `/`.
    #[serde(default)]
    pub source_info: String,
    pub depth: Vec<f64>,
    pub speed: Vec<f64>,
    #[serde(default)]
    pub temperature: Vec<f64>,
    #[serde(default)]
    pub salinity: Vec<f64>,
    #[serde(default)]
    pub source: Vec<SampleSource>,
    #[serde(default)]
    pub flag: Vec<Flag>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a raw profile from parallel depth/speed columns.
    pub fn from_depth_speed(depth: &[f64], speed: &[f64]) -> Self {
        let mut p = Self::new();
        for (d, s) in depth.iter().zip(speed) {
            p.push(Sample::raw(*d, *s));
        }
        p
    }

    pub fn len(&self) -> usize {
        self.depth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth.is_empty()
    }

    pub fn push(&mut self, s: Sample) {
        self.depth.push(s.depth);
        self.speed.push(s.speed);
        self.temperature.push(s.temperature);
        self.salinity.push(s.salinity);
        self.source.push(s.source);
        self.flag.push(s.flag);
    }

    pub fn insert(&mut self, index: usize, s: Sample) {
        self.depth.insert(index, s.depth);
        self.speed.insert(index, s.speed);
        self.temperature.insert(index, s.temperature);
        self.salinity.insert(index, s.salinity);
        self.source.insert(index, s.source);
        self.flag.insert(index, s.flag);
    }

    pub fn sample(&self, i: usize) -> Sample {
        Sample {
            depth: self.depth[i],
            speed: self.speed[i],
            temperature: self.temperature[i],
            salinity: self.salinity[i],
            source: self.source[i],
            flag: self.flag[i],
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        (0..self.len()).map(move |i| self.sample(i))
    }

    /// True when every column has the same length.
    pub fn is_consistent(&self) -> bool {
        let n = self.depth.len();
        self.speed.len() == n
            && self.temperature.len() == n
            && self.salinity.len() == n
            && self.source.len() == n
            && self.flag.len() == n
    }

    /// Pad short optional columns (files that only carry depth/speed).
    pub fn normalize_columns(&mut self) {
        let n = self.depth.len();
        self.speed.resize(n, 0.0);
        self.temperature.resize(n, 0.0);
        self.salinity.resize(n, 0.0);
        self.source.resize(n, SampleSource::Raw);
        self.flag.resize(n, Flag::Keep);
    }

    pub fn column(&self, c: Column) -> &[f64] {
        match c {
            Column::Depth => &self.depth,
            Column::Speed => &self.speed,
            Column::Temperature => &self.temperature,
            Column::Salinity => &self.salinity,
        }
    }

    pub fn column_mut(&mut self, c: Column) -> &mut Vec<f64> {
        match c {
            Column::Depth => &mut self.depth,
            Column::Speed => &mut self.speed,
            Column::Temperature => &mut self.temperature,
            Column::Salinity => &mut self.salinity,
        }
    }

    /// Keep rows where `keep[i]` is true.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        fn filter<T: Copy>(v: &mut Vec<T>, keep: &[bool]) {
            let mut i = 0;
            v.retain(|_| {
                let k = keep.get(i).copied().unwrap_or(true);
                i += 1;
                k
            });
        }
        filter(&mut self.depth, keep);
        filter(&mut self.speed, keep);
        filter(&mut self.temperature, keep);
        filter(&mut self.salinity, keep);
        filter(&mut self.source, keep);
        filter(&mut self.flag, keep);
    }

    /// Deepest depth among unflagged samples.
    pub fn max_valid_depth(&self) -> Option<f64> {
        self.samples()
            .filter(|s| s.flag == Flag::Keep)
            .map(|s| s.depth)
            .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))))
    }

    pub fn max_depth(&self) -> Option<f64> {
        self.depth.iter().copied().fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))))
    }

    /// Depth-sorted copy with rejected samples removed. Sorting is stable so
    /// equal depths keep their relative order.
    pub fn clean_sorted(&self) -> Profile {
        let mut rows: Vec<Sample> = self.samples().filter(|s| s.flag == Flag::Keep).collect();
        rows.sort_by(|a, b| a.depth.total_cmp(&b.depth));
        let mut out = Profile {
            depth: Vec::with_capacity(rows.len()),
            speed: Vec::with_capacity(rows.len()),
            temperature: Vec::with_capacity(rows.len()),
            salinity: Vec::with_capacity(rows.len()),
            source: Vec::with_capacity(rows.len()),
            flag: Vec::with_capacity(rows.len()),
            ..self.metadata()
        };
        for r in rows {
            out.push(r);
        }
        out
    }

    /// Copy of the metadata with an empty sample table.
    pub fn metadata(&self) -> Profile {
        Profile {
            position: self.position,
            timestamp: self.timestamp,
            sensor_type: self.sensor_type,
            probe_type: self.probe_type,
            driver: self.driver.clone(),
            source_info: self.source_info.clone(),
            ..Profile::default()
        }
    }
}

// ── Numerics ──────────────────────────────────────────────────────────────────

/// Piecewise-linear interpolation of `x` over ascending `xs`.
///
/// Values outside the range clamp to the boundary value. Returns `None` when
/// `xs` is empty or lengths differ.
pub fn interp(x: f64, xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.is_empty() || xs.len() != ys.len() {
        return None;
    }
    let last = xs.len() - 1;
    if x <= xs[0] {
        return Some(ys[0]);
    }
    if x >= xs[last] {
        return Some(ys[last]);
    }
    // first index with xs[i] >= x; guaranteed in 1..=last
    let i = xs.partition_point(|v| *v < x);
    let (x0, x1) = (xs[i - 1], xs[i]);
    let (y0, y1) = (ys[i - 1], ys[i]);
    if x1 == x0 {
        return Some(y1);
    }
    Some(y0 + (y1 - y0) * (x - x0) / (x1 - x0))
}
