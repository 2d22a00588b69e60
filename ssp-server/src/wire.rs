//! # wire
//!
//! Textual SSP transmission formats consumed by acquisition systems.
//!
//! ## Formats
//! - Kongsberg `$MVSxx` sentences (S00/S01/S10/S11/S02/S12/S22): comma
//!   separated, CR LF rows, `*hh` XOR checksum, backslash CR LF terminator
//! - ASVP: whitespace separated `depth speed` lines, no checksum
//! - CALC: AML-style text used by HYPACK
//!
//! ## Invariants
//! - A depth-0 sample is synthesised when the shallowest kept sample is deeper
//!   than 0 m, carrying that sample's values.
//! - A fixed 12000 m abyssal sample is appended when the deepest kept sample is
//!   shallower than 12000 m.
//! - The checksum covers every byte after the leading `$` up to the `*`.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use ssp_types::{KmFormat, Position, Profile, Sample};
use thiserror::Error;

/// Abyssal sample appended to every transmitted cast, from deep Challenger
/// Deep CTD casts (Taira et al., 2005).
pub const ABYSSAL_DEPTH: f64 = 12000.0;
pub const ABYSSAL_SPEED: f64 = 1675.8;
pub const ABYSSAL_TEMPERATURE: f64 = 2.46;
pub const ABYSSAL_SALINITY: f64 = 34.70;

/// Minimum separation between consecutive transmitted samples.
const MIN_SEPARATION: f64 = 0.02;

const TERMINATOR: &str = "\\\r\n";

#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("profile has no transmittable samples")]
    Empty,
    #[error("sentence has no checksum field")]
    MissingChecksum,
    #[error("checksum mismatch: computed {computed:02x}, sentence carries {carried}")]
    BadChecksum { computed: u8, carried: String },
    #[error("malformed sentence: {0}")]
    Malformed(String),
}

// ── Checksum ──────────────────────────────────────────────────────────────────

/// XOR of all bytes.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Append `*hh` and the frame terminator to a `$`-led sentence body.
pub fn seal(mut body: String) -> String {
    let cs = checksum(body.as_bytes().get(1..).unwrap_or_default());
    body.push_str(&format!("*{cs:02x}"));
    body.push_str(TERMINATOR);
    body
}

/// Check the trailing `*hh` against the bytes between `$` and `*`.
pub fn verify_checksum(sentence: &str) -> Result<(), WireError> {
    let star = sentence.rfind('*').ok_or(WireError::MissingChecksum)?;
    let carried = sentence
        .get(star + 1..star + 3)
        .ok_or(WireError::MissingChecksum)?;
    let body = sentence.get(1..star).unwrap_or_default();
    let computed = checksum(body.as_bytes());
    if u8::from_str_radix(carried, 16).ok() == Some(computed) {
        Ok(())
    } else {
        Err(WireError::BadChecksum { computed, carried: carried.to_string() })
    }
}

// ── Kongsberg encoder ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq)]
enum Layout {
    DepthSpeed,
    Full,
    DepthTs,
    Asvp,
}

fn layout(format: KmFormat) -> Layout {
    match format {
        KmFormat::S00 | KmFormat::S10 => Layout::DepthSpeed,
        KmFormat::S01 | KmFormat::S11 | KmFormat::S12 => Layout::Full,
        KmFormat::S02 | KmFormat::S22 => Layout::DepthTs,
        KmFormat::Asvp => Layout::Asvp,
    }
}

fn prefix(format: KmFormat) -> String {
    match format {
        KmFormat::Asvp => String::new(),
        f => format!("$MV{},00000,", f.name()),
    }
}

fn row(layout: Layout, depth: f64, s: &Sample) -> String {
    match layout {
        Layout::DepthSpeed => format!("{depth:.2},{:.1},,,\r\n", s.speed),
        Layout::Full => format!("{depth:.2},{:.1},{:.2},{:.2},\r\n", s.speed, s.temperature, s.salinity),
        Layout::DepthTs => format!("{depth:.2},,{:.2},{:.2},\r\n", s.temperature, s.salinity),
        Layout::Asvp => format!("{depth:.2} {:.1}\n", s.speed),
    }
}

fn abyssal() -> Sample {
    Sample {
        depth: ABYSSAL_DEPTH,
        speed: ABYSSAL_SPEED,
        temperature: ABYSSAL_TEMPERATURE,
        salinity: ABYSSAL_SALINITY,
        ..Sample::raw(ABYSSAL_DEPTH, ABYSSAL_SPEED)
    }
}

/// Depth-sorted valid samples, skipping negative, beyond-abyssal and
/// too-closely-spaced depths.
fn transmittable(profile: &Profile) -> Vec<Sample> {
    let mut last_depth = -1.0;
    let mut out = Vec::new();
    for s in profile.clean_sorted().samples() {
        if s.depth - last_depth < MIN_SEPARATION || s.depth < 0.0 || s.depth > ABYSSAL_DEPTH {
            continue;
        }
        last_depth = s.depth;
        out.push(s);
    }
    out
}

fn cast_time(profile: &Profile) -> NaiveDateTime {
    profile.timestamp.unwrap_or_else(|| Utc::now().naive_utc())
}

/// `DDMM.mm,H,` with truncated minutes and hundredths.
fn ddmm(value: f64, positive: char, negative: char) -> String {
    let whole = value.trunc();
    let minutes = 60.0 * (value - whole).abs();
    let min = minutes as u32;
    let hundredths = (100.0 * (minutes - min as f64)) as u32;
    let hemi = if value >= 0.0 { positive } else { negative };
    format!("{:02}{:02}.{:02},{},", whole.abs() as u32, min, hundredths, hemi)
}

/// Render a cast in one of the Kongsberg SSP input formats.
pub fn encode_km(profile: &Profile, format: KmFormat) -> Result<String, WireError> {
    let rows = transmittable(profile);
    let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
        return Err(WireError::Empty);
    };
    let pad_surface = first.depth > 0.0;
    let pad_abyss = last.depth < ABYSSAL_DEPTH;
    let count = rows.len() + pad_surface as usize + pad_abyss as usize;

    let layout = layout(format);
    let time = cast_time(profile);
    let Position { lat, mut lon } = profile.position.unwrap_or_default();

    let mut out = prefix(format);
    if layout == Layout::Asvp {
        out.push_str(&format!(
            "( SoundVelocity  1.0 0 {} {lat:.7} {lon:.7} -1 0 0 OMS01_00000 P {count:4} )\n",
            time.format("%Y%m%d%H%M%S"),
        ));
    } else {
        out.push_str(&format!("{count:04},"));
        out.push_str(&time.format("%H%M%S,%d,%m,%Y,").to_string());
    }

    if pad_surface {
        if layout == Layout::Asvp {
            out.push_str(&format!("0.00 {:.2}\n", first.speed));
        } else {
            out.push_str(&row(layout, 0.0, first));
        }
    }
    for s in &rows {
        out.push_str(&row(layout, s.depth, s));
    }
    if pad_abyss {
        out.push_str(&row(layout, ABYSSAL_DEPTH, &abyssal()));
    }

    if layout == Layout::Asvp {
        return Ok(out);
    }

    if lon > 180.0 {
        lon -= 360.0;
    }
    out.push_str(&ddmm(lat, 'N', 'S'));
    out.push_str(&ddmm(lon, 'E', 'W'));
    out.push_str("0.0,");
    out.push_str("Source: ");
    out.push_str(&profile.source_info);
    Ok(seal(out))
}

// ── CALC encoder (HYPACK) ─────────────────────────────────────────────────────

fn calc_coordinate(value: f64, positive: char, negative: char) -> String {
    let deg = value.abs().trunc();
    let minutes = (value.abs() - deg) * 60.0;
    let whole = minutes.trunc();
    let frac = (((minutes - whole) * 1e7).round() as u64).min(9_999_999);
    let hemi = if value < 0.0 { negative } else { positive };
    format!("{}{:02}.{:07},{}", deg as u32, whole as u32, frac, hemi)
}

/// Render a cast as an AML CALC file.
pub fn encode_calc(profile: &Profile) -> Result<String, WireError> {
    let clean = profile.clean_sorted();
    let rows: Vec<Sample> = clean.samples().filter(|s| s.depth >= 0.0).collect();
    let Some(last) = rows.last() else {
        return Err(WireError::Empty);
    };
    let time = cast_time(profile);
    let Position { lat, mut lon } = profile.position.unwrap_or_default();
    if lon > 180.0 {
        lon -= 360.0;
    }

    let mut out = String::new();
    out.push_str(&time.format("CALC,0001,%d-%m-%Y,1,meters\n").to_string());
    out.push_str("AML SOUND VELOCITY PROFILER S/N:00000\n");
    out.push_str(&time.format("DATE:%y%j TIME:%H:%M\n").to_string());
    out.push_str("DEPTH OFFSET (M):00000.0\n");
    out.push_str("DEPTH (M) VELOCITY (M/S) TEMP (C)\n");
    for s in &rows {
        out.push_str(&format!("{:5.1} {:4.2} {:1.3}\n", s.depth, s.speed, s.temperature));
    }
    out.push_str(" 0  0  0\n");
    out.push_str("*** NAV ****\n");
    out.push_str(&format!("Bottom Depth (m): {:.1}\n", last.depth));
    out.push_str("Ship's Log (N): 0.0\n");
    out.push_str(&format!("# LAT ( ddmm.mmmmmmm,N): {}\n", calc_coordinate(lat, 'N', 'S')));
    out.push_str(&format!("# LON (dddmm.mmmmmmm,E): {}\n", calc_coordinate(lon, 'E', 'W')));
    out.push_str(&time.format("Time [hh:mm:ss.ss]: %H:%M:%S.00\n").to_string());
    out.push_str(&time.format("Date [dd/mm/yyyy]: %d/%m/%Y\n").to_string());
    Ok(out)
}

// ── Sentence parser ───────────────────────────────────────────────────────────

/// A decoded `$MVSxx` sentence.
#[derive(Debug, Clone)]
pub struct ParsedSentence {
    pub format: KmFormat,
    pub declared_count: usize,
    pub profile: Profile,
}

fn malformed(msg: impl Into<String>) -> WireError {
    WireError::Malformed(msg.into())
}

fn parse_f64(field: &str) -> Result<Option<f64>, WireError> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(None);
    }
    field.parse().map(Some).map_err(|_| malformed(format!("bad number '{field}'")))
}

/// `DDMM.mm` / `DDDMM.mm` to decimal degrees.
pub(crate) fn parse_ddmm(field: &str, hemi: &str, negative: &str) -> Result<f64, WireError> {
    let v = parse_f64(field)?.ok_or_else(|| malformed("empty coordinate"))?;
    let deg = (v / 100.0).trunc();
    let mut out = deg + (v - deg * 100.0) / 60.0;
    if hemi.trim().eq_ignore_ascii_case(negative) {
        out = -out;
    }
    Ok(out)
}

fn sample_from_fields(layout: Layout, fields: &[&str]) -> Result<Sample, WireError> {
    if fields.len() < 4 {
        return Err(malformed(format!("sample row has {} fields", fields.len())));
    }
    let depth = parse_f64(fields[0])?.ok_or_else(|| malformed("empty depth"))?;
    let speed = parse_f64(fields[1])?;
    if layout != Layout::DepthTs && speed.is_none() {
        return Err(malformed("empty speed"));
    }
    Ok(Sample {
        speed: speed.unwrap_or(0.0),
        temperature: parse_f64(fields[2])?.unwrap_or(0.0),
        salinity: parse_f64(fields[3])?.unwrap_or(0.0),
        ..Sample::raw(depth, 0.0)
    })
}

/// Parse and checksum-verify a Kongsberg `$MVSxx` sentence.
pub fn parse_sentence(sentence: &str) -> Result<ParsedSentence, WireError> {
    if !sentence.starts_with('$') {
        return Err(malformed("missing '$' start"));
    }
    verify_checksum(sentence)?;
    let star = sentence.rfind('*').ok_or(WireError::MissingChecksum)?;
    let body = &sentence[..star];
    let lines: Vec<&str> = body.lines().map(|l| l.trim_end_matches('\r')).filter(|l| !l.is_empty()).collect();
    if lines.len() < 2 {
        return Err(malformed("too few lines"));
    }

    let head: Vec<&str> = lines[0].split(',').collect();
    if head.len() < 11 {
        return Err(malformed("short header line"));
    }
    let format = head[0]
        .strip_prefix("$MV")
        .and_then(KmFormat::from_name)
        .ok_or_else(|| malformed(format!("unknown talker '{}'", head[0])))?;
    let layout = layout(format);
    let declared_count: usize = head[2].parse().map_err(|_| malformed("bad sample count"))?;

    let hhmmss = head[3];
    let time = NaiveTime::from_hms_opt(
        hhmmss.get(0..2).and_then(|v| v.parse().ok()).unwrap_or(99),
        hhmmss.get(2..4).and_then(|v| v.parse().ok()).unwrap_or(99),
        hhmmss.get(4..6).and_then(|v| v.parse().ok()).unwrap_or(99),
    );
    let date = NaiveDate::from_ymd_opt(
        head[6].parse().unwrap_or(0),
        head[5].parse().unwrap_or(0),
        head[4].parse().unwrap_or(0),
    );

    let mut profile = Profile::new();
    profile.timestamp = date.zip(time).map(|(d, t)| d.and_time(t));
    profile.push(sample_from_fields(layout, &head[7..])?);
    for line in &lines[1..lines.len() - 1] {
        let fields: Vec<&str> = line.split(',').collect();
        profile.push(sample_from_fields(layout, &fields)?);
    }
    if profile.len() != declared_count {
        return Err(malformed(format!(
            "declared {declared_count} samples, found {}",
            profile.len()
        )));
    }

    let trailer: Vec<&str> = lines[lines.len() - 1].splitn(6, ',').collect();
    if trailer.len() == 6 {
        let lat = parse_ddmm(trailer[0], trailer[1], "S")?;
        let lon = parse_ddmm(trailer[2], trailer[3], "W")?;
        profile.position = Some(Position { lat, lon });
        profile.source_info = trailer[5].trim_start_matches("Source: ").to_string();
    } else {
        return Err(malformed("short trailer"));
    }
    Ok(ParsedSentence { format, declared_count, profile })
}

/// Seconds since midnight of a timestamp, used in `U` datagram round trips.
pub fn seconds_of_day(t: &NaiveDateTime) -> u32 {
    t.num_seconds_from_midnight()
}

/// `YYYYMMDD` integer date as carried in Kongsberg headers.
pub fn yyyymmdd(t: &NaiveDateTime) -> u32 {
    t.year() as u32 * 10_000 + t.month() * 100 + t.day()
}
