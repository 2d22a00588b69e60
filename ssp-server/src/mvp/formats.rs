//! Format drivers that turn a reassembled MVP transfer into a `Profile`.
//!
//! The MVP controller can be told to emit its casts as ASVP, CALC or an S12
//! sentence; the listener is configured with the matching driver.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ssp_types::{Position, ProbeType, Profile, Sample, SensorType};
use thiserror::Error;
use tracing::debug;

use crate::wire::{parse_sentence, WireError};

const DRIVER_NAME: &str = "MVP";

#[derive(Debug, Error, PartialEq)]
pub enum FormatError {
    #[error("transfer is not valid text")]
    NotText,
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("bad {field}: '{value}'")]
    Bad { field: &'static str, value: String },
    #[error("cast has no samples")]
    NoSamples,
    #[error(transparent)]
    Sentence(#[from] WireError),
}

fn bad(field: &'static str, value: &str) -> FormatError {
    FormatError::Bad { field, value: value.to_string() }
}

/// Parses one complete cast.
pub trait FormatDriver: Send {
    fn name(&self) -> &'static str;
    fn parse(&self, data: &[u8]) -> Result<Profile, FormatError>;
}

/// Output format selected on the MVP controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MvpFormat {
    #[default]
    Asvp,
    Calc,
    S12,
}

impl MvpFormat {
    pub fn driver(self) -> Box<dyn FormatDriver> {
        match self {
            Self::Asvp => Box::new(AsvpDriver),
            Self::Calc => Box::new(CalcDriver),
            Self::S12 => Box::new(S12Driver),
        }
    }
}

fn text(data: &[u8]) -> Result<&str, FormatError> {
    std::str::from_utf8(data).map_err(|_| FormatError::NotText)
}

fn tag_mvp(mut profile: Profile) -> Result<Profile, FormatError> {
    if profile.is_empty() {
        return Err(FormatError::NoSamples);
    }
    profile.sensor_type = SensorType::Mvp;
    profile.probe_type = ProbeType::Mvp;
    profile.driver = DRIVER_NAME.to_string();
    Ok(profile)
}

// ── ASVP ──────────────────────────────────────────────────────────────────────

/// `( SoundVelocity 1.0 0 YYYYMMDDHHMM[SS] lat lon -1 0 0 id P N )` then
/// `depth speed` rows.
pub struct AsvpDriver;

impl FormatDriver for AsvpDriver {
    fn name(&self) -> &'static str {
        "ASVP"
    }

    fn parse(&self, data: &[u8]) -> Result<Profile, FormatError> {
        let text = text(data)?;
        let mut lines = text.lines();
        let head = lines.next().ok_or(FormatError::Missing("header line"))?;
        let fields: Vec<&str> = head.split_whitespace().collect();
        if fields.len() < 13 {
            return Err(bad("header", head));
        }

        let stamp = fields[4];
        let timestamp = NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S")
            .or_else(|_| NaiveDateTime::parse_from_str(&format!("{stamp}00"), "%Y%m%d%H%M%S"))
            .map_err(|_| bad("timestamp", stamp))?;
        let lat: f64 = fields[5].parse().map_err(|_| bad("latitude", fields[5]))?;
        let lon: f64 = fields[6].parse().map_err(|_| bad("longitude", fields[6]))?;
        let declared: usize = fields[12].parse().map_err(|_| bad("sample count", fields[12]))?;

        let mut profile = Profile::new();
        profile.timestamp = Some(timestamp);
        profile.position = Some(Position { lat, lon });
        for line in lines {
            let mut parts = line.split_whitespace();
            let (Some(d), Some(s), None) = (parts.next(), parts.next(), parts.next()) else {
                if !line.trim().is_empty() {
                    debug!("MVP: skipping ASVP line '{line}'");
                }
                continue;
            };
            match (d.parse(), s.parse()) {
                (Ok(d), Ok(s)) => profile.push(Sample::raw(d, s)),
                _ => debug!("MVP: skipping ASVP line '{line}'"),
            }
        }
        if profile.len() != declared {
            debug!("MVP: ASVP header declares {declared} samples, read {}", profile.len());
        }
        tag_mvp(profile)
    }
}

// ── CALC ──────────────────────────────────────────────────────────────────────

/// AML CALC: five header lines, `depth speed temp` rows closed by ` 0  0  0`,
/// then a navigation block whose last four lines carry LAT, LON, time, date.
pub struct CalcDriver;

/// `[d]ddmm.mmmm` with the degrees taking whatever precedes the minutes.
fn calc_coordinate(field: &str) -> Result<f64, FormatError> {
    let (value, hemi) = field.split_once(',').ok_or_else(|| bad("coordinate", field))?;
    let dot = value.find('.').unwrap_or(value.len());
    if dot < 2 {
        return Err(bad("coordinate", field));
    }
    let deg: f64 = value[..dot - 2].parse().map_err(|_| bad("coordinate", field))?;
    let min: f64 = value[dot - 2..].parse().map_err(|_| bad("coordinate", field))?;
    let out = deg + min / 60.0;
    Ok(match hemi.trim() {
        "S" | "W" => -out,
        _ => out,
    })
}

fn last_token(line: Option<&&str>, what: &'static str) -> Result<String, FormatError> {
    line.and_then(|l| l.split_whitespace().last())
        .map(str::to_string)
        .ok_or(FormatError::Missing(what))
}

impl FormatDriver for CalcDriver {
    fn name(&self) -> &'static str {
        "CALC"
    }

    fn parse(&self, data: &[u8]) -> Result<Profile, FormatError> {
        let text = text(data)?;
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let n = lines.len();
        if n < 9 {
            return Err(FormatError::Missing("CALC header/footer"));
        }

        let date = last_token(lines.get(n - 1), "date")?;
        let date = NaiveDate::parse_from_str(&date, "%d/%m/%Y").map_err(|_| bad("date", &date))?;
        let time = last_token(lines.get(n - 2), "time")?;
        let time = NaiveTime::parse_from_str(&time, "%H:%M:%S%.f").map_err(|_| bad("time", &time))?;
        let lon = calc_coordinate(&last_token(lines.get(n - 3), "longitude")?)?;
        let lat = calc_coordinate(&last_token(lines.get(n - 4), "latitude")?)?;

        let mut profile = Profile::new();
        profile.timestamp = Some(date.and_time(time));
        profile.position = Some(Position { lat, lon });
        for line in &lines[5..] {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 3 {
                break;
            }
            let parsed: Result<Vec<f64>, _> = fields.iter().map(|f| f.parse::<f64>()).collect();
            let Ok(v) = parsed else {
                break;
            };
            if v.iter().all(|x| *x == 0.0) {
                break;
            }
            profile.push(Sample { temperature: v[2], ..Sample::raw(v[0], v[1]) });
        }
        tag_mvp(profile)
    }
}

// ── S12 ───────────────────────────────────────────────────────────────────────

/// Kongsberg S12 sentence as forwarded by the MVP controller.
pub struct S12Driver;

impl FormatDriver for S12Driver {
    fn name(&self) -> &'static str {
        "S12"
    }

    fn parse(&self, data: &[u8]) -> Result<Profile, FormatError> {
        let parsed = parse_sentence(text(data)?.trim_start())?;
        let mut profile = parsed.profile;
        profile.source_info.clear();
        tag_mvp(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{encode_calc, encode_km};
    use approx::assert_relative_eq;
    use ssp_types::KmFormat;

    fn cast() -> Profile {
        let mut p = Profile::from_depth_speed(&[1.0, 5.0, 10.0], &[1500.0, 1498.5, 1497.0]);
        p.temperature = vec![12.0, 11.0, 10.0];
        p.salinity = vec![35.0; 3];
        p.position = Some(Position { lat: 43.1234, lon: -70.5 });
        p.timestamp = NaiveDate::from_ymd_opt(2026, 10, 19).and_then(|d| d.and_hms_opt(12, 34, 0));
        p
    }

    #[test]
    fn asvp_reads_header_and_rows() {
        let text = encode_km(&cast(), KmFormat::Asvp).unwrap();
        let p = AsvpDriver.parse(text.as_bytes()).unwrap();
        // surface pad + 3 samples + abyssal pad
        assert_eq!(p.len(), 5);
        assert_eq!(p.depth[1], 1.0);
        assert_relative_eq!(p.speed[2], 1498.5);
        let pos = p.position.unwrap();
        assert_relative_eq!(pos.lat, 43.1234, epsilon = 1e-7);
        assert_relative_eq!(pos.lon, -70.5, epsilon = 1e-7);
        assert_eq!(p.timestamp, cast().timestamp);
        assert_eq!(p.sensor_type, SensorType::Mvp);
        assert_eq!(p.driver, "MVP");
    }

    #[test]
    fn asvp_accepts_minute_resolution_stamp() {
        let text = "( SoundVelocity  1.0 0 201304091324 43.0 -70.0 -1 0 0 OMS01_00000 P 2 )\n0.5 1500.0\n2.0 1499.0\n";
        let p = AsvpDriver.parse(text.as_bytes()).unwrap();
        assert_eq!(p.timestamp.unwrap().to_string(), "2013-04-09 13:24:00");
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn calc_reads_rows_until_terminator() {
        let text = encode_calc(&cast()).unwrap();
        let p = CalcDriver.parse(text.as_bytes()).unwrap();
        assert_eq!(p.depth, vec![1.0, 5.0, 10.0]);
        assert_eq!(p.temperature, vec![12.0, 11.0, 10.0]);
        let pos = p.position.unwrap();
        assert_relative_eq!(pos.lat, 43.1234, epsilon = 1e-6);
        assert_relative_eq!(pos.lon, -70.5, epsilon = 1e-6);
        assert_eq!(p.timestamp.unwrap().to_string(), "2026-10-19 12:34:00");
    }

    #[test]
    fn s12_sentence_round_trips_through_driver() {
        let text = encode_km(&cast(), KmFormat::S12).unwrap();
        let p = S12Driver.parse(text.as_bytes()).unwrap();
        assert_eq!(p.len(), 5);
        assert_eq!(p.probe_type, ProbeType::Mvp);
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(AsvpDriver.parse(&[0xff, 0xfe]).unwrap_err(), FormatError::NotText);
        assert!(CalcDriver.parse(b"CALC\n").is_err());
        assert!(matches!(S12Driver.parse(b"$MVS12,nope"), Err(FormatError::Sentence(_))));
    }
}
