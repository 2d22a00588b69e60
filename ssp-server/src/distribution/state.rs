//! Service state and the snapshot published to observers.

use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;
use ssp_types::Position;

use crate::atlas::GridCell;
use crate::clients::ClientEndpoint;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServiceState {
    /// Startup checks have not finished.
    Starting,
    Idle,
    Evaluating,
    Sending,
    Confirming,
    /// Terminal until an operator restart.
    Degraded { reason: String },
    Stopped,
}

impl ServiceState {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => f.write_str("Starting"),
            Self::Idle => f.write_str("Idle"),
            Self::Evaluating => f.write_str("Evaluating"),
            Self::Sending => f.write_str("Sending"),
            Self::Confirming => f.write_str("Confirming"),
            Self::Degraded { reason } => write!(f, "Degraded ({reason})"),
            Self::Stopped => f.write_str("Stopped"),
        }
    }
}

/// Baseline of the last successful delivery. A new cast is only sent when
/// the vessel leaves this grid cell or the surface sound speed drifts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleState {
    pub grid_cell: Option<GridCell>,
    pub surface_sound_speed: Option<f64>,
    pub last_tx_timestamp: Option<NaiveDateTime>,
    pub delivered_count: u32,
}

/// Everything an operator sees about the service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub cycle: CycleState,
    pub clients: Vec<ClientEndpoint>,
    pub position: Option<Position>,
    pub surface_sound_speed: Option<f64>,
    /// Pending refraction corrector (m/s), consumed by the next cast.
    pub corrector: f64,
    /// Acquisition time SIS reported for the last confirmed cast.
    pub last_confirmed_time: Option<NaiveDateTime>,
    pub last_error: Option<String>,
    /// Last transmitted sentence, as sent to the first client.
    pub last_tx: Option<String>,
}

impl Default for ServiceStatus {
    fn default() -> Self {
        Self {
            state: ServiceState::Starting,
            cycle: CycleState::default(),
            clients: Vec::new(),
            position: None,
            surface_sound_speed: None,
            corrector: 0.0,
            last_confirmed_time: None,
            last_error: None,
            last_tx: None,
        }
    }
}
