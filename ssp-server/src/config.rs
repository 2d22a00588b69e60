//! Server configuration.
//!
//! Precedence, lowest first: built-in defaults, `SSP_*` environment
//! variables (read by the `Default` impls), the TOML file, CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::clients::{ClientEndpoint, ClientParseError};
use crate::kongsberg::{default_desired, DesiredSet, KmOpcode};
use crate::listener::{ListenerConfig, LogSink};
use crate::mvp::formats::MvpFormat;
use crate::mvp::MvpProtocol;
use crate::profile::TX_THIN_TOLERANCE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Client(#[from] ClientParseError),
    #[error("{0}")]
    Invalid(String),
}

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(fallback)
}

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KongsbergConfig {
    /// UDP port SIS broadcasts datagrams to (default 16103)
    pub port: u16,
    pub timeout_ms: u64,
    /// Datagram types to decode; anything else is dropped on arrival.
    pub datagrams: Vec<KmOpcode>,
    /// Write every received datagram to this `.all`-style file.
    pub log_file: Option<PathBuf>,
}

impl Default for KongsbergConfig {
    fn default() -> Self {
        Self {
            port: env_or("SSP_KM_PORT", 16103),
            timeout_ms: 1000,
            datagrams: {
                let mut d: Vec<KmOpcode> = default_desired().into_iter().collect();
                d.sort_by_key(|op| op.code());
                d
            },
            log_file: None,
        }
    }
}

impl KongsbergConfig {
    pub fn desired(&self) -> DesiredSet {
        self.datagrams.iter().copied().collect()
    }

    pub fn listener(&self) -> ListenerConfig {
        ListenerConfig {
            log_file: self.log_file.clone(),
            log_sink: LogSink::Kongsberg,
            ..ListenerConfig::new("KM", self.port, Duration::from_millis(self.timeout_ms))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MvpConfig {
    pub enabled: bool,
    /// UDP port the MVP controller pushes casts to (default 2006)
    pub port: u16,
    pub timeout_ms: u64,
    pub protocol: MvpProtocol,
    pub format: MvpFormat,
    pub reassembly_timeout_secs: u64,
    pub log_file: Option<PathBuf>,
}

impl Default for MvpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: env_or("SSP_MVP_PORT", 2006),
            timeout_ms: 1000,
            protocol: MvpProtocol::NavoIss60,
            format: MvpFormat::Asvp,
            reassembly_timeout_secs: 30,
            log_file: None,
        }
    }
}

impl MvpConfig {
    pub fn listener(&self) -> ListenerConfig {
        ListenerConfig {
            log_file: self.log_file.clone(),
            log_sink: LogSink::Raw,
            ..ListenerConfig::new("MVP", self.port, Duration::from_millis(self.timeout_ms))
        }
    }
}

/// Which atlas the server prefers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AtlasSource {
    #[default]
    Rtofs,
    Woa09,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// Seconds between evaluations.
    pub wait_secs: u64,
    pub source: AtlasSource,
    pub apply_surface_sound_speed: bool,
    /// Overrides the transducer depth reported by the sonar.
    pub vessel_draft: Option<f64>,
    pub confirm_timeout_secs: u64,
    pub confirm_poll_ms: u64,
    /// Pause after sending to a client that cannot confirm.
    pub settle_secs: u64,
    /// Pause between profile requests to successive sensor codes.
    pub request_delay_ms: u64,
    pub thin_tolerance: f64,
    /// Keep sending to clients that cannot confirm reception.
    pub transmit_unconfirmable: bool,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            wait_secs: env_or("SSP_WAIT_SECS", 10),
            source: AtlasSource::Rtofs,
            apply_surface_sound_speed: true,
            vessel_draft: None,
            confirm_timeout_secs: 60,
            confirm_poll_ms: 1000,
            settle_secs: 5,
            request_delay_ms: 1000,
            thin_tolerance: TX_THIN_TOLERANCE,
            transmit_unconfirmable: false,
        }
    }
}

impl DistributionConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn confirm_poll(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_ms.max(1))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// JSON grid for the RTOFS forecast.
    pub rtofs: Option<PathBuf>,
    /// JSON grid for the WOA09 climatology.
    pub woa09: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// HTTP status/control port (default 8080)
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: env_or("SSP_STATUS_PORT", 8080) }
    }
}

// ── Top level ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub kongsberg: KongsbergConfig,
    pub mvp: MvpConfig,
    pub server: DistributionConfig,
    pub api: ApiConfig,
    pub atlas: AtlasConfig,
    /// `name:ip:port:protocol`
    pub clients: Vec<String>,
}

impl ServerConfig {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let cfg: ServerConfig =
            toml::from_str(text).map_err(|source| ConfigError::Toml { path: path.to_path_buf(), source })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a file, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            info!("Config: no file given, using defaults");
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let cfg = Self::from_toml(&text, path)?;
        info!("Config: loaded {} ({} clients)", path.display(), cfg.clients.len());
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.thin_tolerance.is_nan() || self.server.thin_tolerance < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "server.thin_tolerance must be >= 0, got {}",
                self.server.thin_tolerance
            )));
        }
        if self.kongsberg.timeout_ms == 0 || self.mvp.timeout_ms == 0 {
            return Err(ConfigError::Invalid("listener timeout_ms must be > 0".into()));
        }
        self.client_endpoints()?;
        Ok(())
    }

    pub fn client_endpoints(&self) -> Result<Vec<ClientEndpoint>, ConfigError> {
        self.clients.iter().map(|c| c.parse::<ClientEndpoint>().map_err(ConfigError::from)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ClientProtocol;

    #[test]
    fn defaults_cover_the_usual_datagrams() {
        let cfg = ServerConfig::default();
        let desired = cfg.kongsberg.desired();
        assert!(desired.contains(&KmOpcode::SoundSpeedProfile));
        assert!(desired.contains(&KmOpcode::Position));
        assert_eq!(cfg.server.thin_tolerance, TX_THIN_TOLERANCE);
        assert!(cfg.clients.is_empty());
    }

    #[test]
    fn toml_overrides_sections() {
        let text = r#"
            clients = ["SIS:127.0.0.1:4001:SIS", "Hypack:10.0.0.9:9888:HYPACK"]

            [kongsberg]
            port = 17000
            datagrams = ["position", "sound_speed_profile"]
            log_file = "km.all"

            [mvp]
            protocol = "UNDEFINED"
            format = "CALC"

            [server]
            wait_secs = 3
            source = "WOA09"
            vessel_draft = 4.5
        "#;
        let cfg = ServerConfig::from_toml(text, Path::new("test.toml")).unwrap();
        assert_eq!(cfg.kongsberg.port, 17000);
        assert_eq!(cfg.kongsberg.desired().len(), 2);
        assert_eq!(cfg.kongsberg.listener().log_file, Some(PathBuf::from("km.all")));
        assert_eq!(cfg.mvp.protocol, MvpProtocol::Undefined);
        assert_eq!(cfg.mvp.format, MvpFormat::Calc);
        assert_eq!(cfg.server.wait(), Duration::from_secs(3));
        assert_eq!(cfg.server.source, AtlasSource::Woa09);
        assert_eq!(cfg.server.vessel_draft, Some(4.5));
        let clients = cfg.client_endpoints().unwrap();
        assert_eq!(clients[1].protocol, ClientProtocol::Hypack);
    }

    #[test]
    fn bad_values_are_rejected() {
        let p = Path::new("x.toml");
        assert!(matches!(
            ServerConfig::from_toml("clients = [\"nope\"]", p),
            Err(ConfigError::Client(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml("[server]\nthin_tolerance = -1.0", p),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(ServerConfig::from_toml("[server", p), Err(ConfigError::Toml { .. })));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ssp.toml");
        std::fs::write(&path, "[api]\nport = 9999\n").unwrap();
        let cfg = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.api.port, 9999);
        assert!(matches!(
            ServerConfig::load(Some(&dir.path().join("missing.toml"))),
            Err(ConfigError::Read { .. })
        ));
    }
}
