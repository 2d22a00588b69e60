//! vessel.rs: dead-reckoned survey vessel with noisy surface sound speed
//!
//! The track is a straight line at constant speed and heading. Surface
//! sound speed follows a slow linear drift plus uniform sensor noise, which
//! is what makes the server re-send casts while the grid cell is unchanged.

use rand::Rng;
use serde::Deserialize;

const METRES_PER_DEG_LAT: f64 = 111_320.0;
const KNOT: f64 = 0.514_444;

#[derive(Debug, Clone, Deserialize)]
pub struct VesselConfig {
    pub start_lat: f64,
    pub start_lon: f64,
    pub speed_knots: f64,
    pub heading_deg: f64,
    /// Transducer depth below the water line (m).
    pub transducer_depth: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    pub nav_rate_hz: f64,
    /// Surface sound speed at start (m/s).
    pub sss_start: f64,
    /// Linear drift (m/s per minute).
    pub sss_drift_per_min: f64,
    /// Uniform noise amplitude (m/s).
    pub sss_noise: f64,
    /// Position noise amplitude (m).
    pub position_noise_m: f64,
}

pub struct Vessel {
    pub lat: f64,
    pub lon: f64,
    pub heading_deg: f64,
    pub transducer_depth: f32,
    speed_mps: f64,
    sss_base: f64,
    sensors: SensorConfig,
}

impl Vessel {
    pub fn new(v: &VesselConfig, sensors: &SensorConfig) -> Self {
        Self {
            lat: v.start_lat,
            lon: v.start_lon,
            heading_deg: v.heading_deg,
            transducer_depth: v.transducer_depth,
            speed_mps: v.speed_knots * KNOT,
            sss_base: sensors.sss_start,
            sensors: sensors.clone(),
        }
    }

    /// Advance the vessel by `dt` seconds.
    pub fn tick(&mut self, dt: f64) {
        let hdg = self.heading_deg.to_radians();
        let north = self.speed_mps * dt * hdg.cos();
        let east = self.speed_mps * dt * hdg.sin();
        self.lat += north / METRES_PER_DEG_LAT;
        self.lon += east / (METRES_PER_DEG_LAT * self.lat.to_radians().cos().max(1e-6));
        self.sss_base += self.sensors.sss_drift_per_min * dt / 60.0;
    }

    /// Measured position with GNSS noise.
    pub fn measured_position(&self) -> (f64, f64) {
        let mut rng = rand::thread_rng();
        let n = self.sensors.position_noise_m;
        let (dn, de) = if n > 0.0 { (rng.gen_range(-n..n), rng.gen_range(-n..n)) } else { (0.0, 0.0) };
        let lat = self.lat + dn / METRES_PER_DEG_LAT;
        let lon = self.lon + de / (METRES_PER_DEG_LAT * self.lat.to_radians().cos().max(1e-6));
        (lat, lon)
    }

    /// Measured surface sound speed with sensor noise.
    pub fn measured_sound_speed(&self) -> f64 {
        let n = self.sensors.sss_noise;
        if n > 0.0 {
            self.sss_base + rand::thread_rng().gen_range(-n..n)
        } else {
            self.sss_base
        }
    }
}
