//! # distribution
//!
//! DistributionService: the autonomous loop that picks an atlas cast for the
//! vessel's position, applies the surface corrections, thins it and sends it
//! to every live acquisition client, confirming delivery where the client
//! can reflect the profile back.
//!
//! ## State machine
//! ```text
//! Starting ─┬─> Idle ─> Evaluating ─┬─> Idle              (no change / no fix)
//!           │                       └─> Sending ─> Confirming ─┬─> Idle
//!           └─> Degraded <──────────────────────────────────────┘
//! ```
//! `Degraded` holds until `Command::Restart`; `Command::Stop` ends the loop
//! from any state within one poll interval.
//!
//! ## Invariants
//! - Every wait is bounded: poll ticks, confirmation timeout, settle delay.
//! - A client that misses a confirmation stays dead until restart.
//! - The corrector is applied to exactly one cast, then reset to 0.

mod service;
pub mod state;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::atlas::{Atlas, AtlasError};
use crate::profile::ProfileError;
use crate::wire::WireError;

pub use service::DistributionService;
pub use state::{CycleState, ServiceState, ServiceStatus};

/// Operator commands.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ForceSend,
    /// Refraction corrector (m/s) added to the next cast.
    SetCorrector(f64),
    Restart,
    Stop,
}

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("no atlas is available")]
    NoAtlas,
    #[error("no position datagram received")]
    NoPosition,
    #[error("unable to retrieve a synthetic cast: {0}")]
    Atlas(#[from] AtlasError),
    #[error("cast processing failed: {0}")]
    Profile(#[from] ProfileError),
    #[error("unable to encode cast: {0}")]
    Encode(#[from] WireError),
    #[error("Unable to confirm interaction with any clients")]
    NoInteraction,
    #[error("No more live clients")]
    NoLiveClients,
    #[error("No Tx to live clients")]
    NoDelivery,
}

/// The two oceanographic sources, either of which may be missing.
#[derive(Clone, Default)]
pub struct Atlases {
    pub rtofs: Option<Arc<dyn Atlas>>,
    pub woa09: Option<Arc<dyn Atlas>>,
}

/// Control side of a running service; cheap to clone.
#[derive(Clone)]
pub struct DistributionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ServiceStatus>,
}

impl DistributionHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>, status: watch::Receiver<ServiceStatus>) -> Self {
        Self { commands, status }
    }

    /// Returns false when the service has already exited.
    pub async fn send(&self, cmd: Command) -> bool {
        self.commands.send(cmd).await.is_ok()
    }

    pub async fn force_send(&self) -> bool {
        self.send(Command::ForceSend).await
    }

    pub async fn set_corrector(&self, value: f64) -> bool {
        self.send(Command::SetCorrector(value)).await
    }

    pub async fn restart(&self) -> bool {
        self.send(Command::Restart).await
    }

    pub async fn stop(&self) -> bool {
        self.send(Command::Stop).await
    }

    pub fn status(&self) -> ServiceStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServiceStatus> {
        self.status.clone()
    }
}
