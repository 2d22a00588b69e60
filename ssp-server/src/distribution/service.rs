use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use ssp_types::{interp, Flag, Position, Profile, SampleSource};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::state::{CycleState, ServiceState, ServiceStatus};
use super::{Atlases, Command, DistributionError, DistributionHandle};
use crate::atlas::GridCell;
use crate::clients::ClientEndpoint;
use crate::config::{AtlasSource, DistributionConfig};
use crate::kongsberg::request::request_profile;
use crate::kongsberg::{KmRecord, Received, SspRecord};
use crate::profile::ProfileEngine;
use crate::transport::Transport;
use crate::wire::parse_sentence;

/// Surface sound speed change (m/s) that triggers a new cast in the same cell.
const SSS_DRIFT: f64 = 1.0;
/// Max speed difference (m/s) between sent and reflected profile.
const CONFIRM_TOLERANCE: f64 = 0.2;
/// Surface sound speed is applied down to this multiple of the draft.
const DRAFT_FACTOR: f64 = 1.15;
const COMMAND_QUEUE: usize = 16;
const MISMATCH: &str = "Times mismatch > Another agent uploaded SSP on SIS";
const UNCONFIRMED: &str = "Unable to confirm SSP reception";

#[derive(Debug, Clone, Copy)]
struct NavFix {
    lat: f64,
    lon: f64,
    time: NaiveDateTime,
}

/// Latest values seen on the Kongsberg record stream.
#[derive(Debug, Default)]
struct Nav {
    fix: Option<NavFix>,
    sound_speed: Option<f64>,
    transducer_depth: Option<f64>,
    ssp: Option<SspRecord>,
    /// Host whose 'U' datagram is awaited; others are ignored.
    ssp_from: Option<IpAddr>,
}

enum Outcome {
    NoFix,
    Unchanged,
    Delivered(usize),
    Stopped,
}

pub struct DistributionService {
    config: DistributionConfig,
    clients: Vec<ClientEndpoint>,
    atlases: Atlases,
    source: AtlasSource,
    transport: Arc<dyn Transport>,
    records: mpsc::Receiver<Received>,
    records_open: bool,
    commands: mpsc::Receiver<Command>,
    commands_open: bool,
    status: watch::Sender<ServiceStatus>,
    state: ServiceState,
    cycle: CycleState,
    nav: Nav,
    force_send: bool,
    corrector: f64,
    last_confirmed_time: Option<NaiveDateTime>,
    last_error: Option<String>,
    last_tx: Option<String>,
    restart: bool,
    stopping: bool,
}

impl DistributionService {
    pub fn new(
        config: DistributionConfig,
        clients: Vec<ClientEndpoint>,
        atlases: Atlases,
        transport: Arc<dyn Transport>,
        records: mpsc::Receiver<Received>,
    ) -> (Self, DistributionHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (status_tx, status_rx) =
            watch::channel(ServiceStatus { clients: clients.clone(), ..ServiceStatus::default() });
        let source = config.source;
        let service = Self {
            config,
            clients,
            atlases,
            source,
            transport,
            records,
            records_open: true,
            commands: cmd_rx,
            commands_open: true,
            status: status_tx,
            state: ServiceState::Starting,
            cycle: CycleState::default(),
            nav: Nav::default(),
            force_send: false,
            corrector: 0.0,
            last_confirmed_time: None,
            last_error: None,
            last_tx: None,
            restart: false,
            stopping: false,
        };
        (service, DistributionHandle::new(cmd_tx, status_rx))
    }

    /// Run until `Command::Stop`. Returns the final status.
    pub async fn run(mut self) -> ServiceStatus {
        info!("🛰️  Server: starting with {} clients", self.clients.len());
        self.start().await;

        while !self.stopping {
            if self.restart {
                self.reset();
                self.start().await;
                continue;
            }
            if self.state.is_degraded() {
                self.pause().await;
                continue;
            }
            match self.run_cycle().await {
                Ok(Outcome::Delivered(n)) => info!("Server: total Tx to live clients: {n}"),
                Ok(Outcome::Stopped) => break,
                Ok(Outcome::NoFix) | Ok(Outcome::Unchanged) => {}
                Err(e) => self.degrade(e),
            }
            if !self.force_send && !self.stopping {
                self.pause().await;
            }
        }

        self.set_state(ServiceState::Stopped);
        info!("Server: stopped");
        self.snapshot()
    }

    // ── Startup ───────────────────────────────────────────────────────────

    async fn start(&mut self) {
        self.set_state(ServiceState::Starting);
        match self.check_settings().await {
            Ok(()) if self.stopping => {}
            Ok(()) => self.set_state(ServiceState::Idle),
            Err(e) => self.degrade(e),
        }
    }

    fn reset(&mut self) {
        info!("Server: restarting");
        self.restart = false;
        self.force_send = false;
        self.source = self.config.source;
        self.cycle = CycleState::default();
        self.last_confirmed_time = None;
        self.last_error = None;
        self.nav.ssp = None;
        self.nav.ssp_from = None;
        for c in &mut self.clients {
            c.alive = true;
        }
    }

    async fn check_settings(&mut self) -> Result<(), DistributionError> {
        if self.source == AtlasSource::Rtofs {
            if self.atlases.rtofs.is_some() {
                info!("Server: RTOFS check OK");
            } else {
                warn!("Server: RTOFS check KO > attempting to use WOA09");
                self.source = AtlasSource::Woa09;
            }
        }
        if self.source == AtlasSource::Woa09 {
            if self.atlases.woa09.is_some() {
                info!("Server: WOA09 check OK");
            } else {
                error!("Server: WOA09 check KO > server mode is not available");
                return Err(DistributionError::NoAtlas);
            }
        }

        if !self.wait_for(self.config.confirm_timeout(), |s| s.nav.fix.is_some() || s.stopping).await
            || self.nav.fix.is_none()
        {
            if self.stopping {
                return Ok(());
            }
            error!("Server: SIS NAV broadcast KO > server mode is not available");
            return Err(DistributionError::NoPosition);
        }
        info!("Server: SIS NAV broadcast OK");
        if self.nav.sound_speed.is_some() {
            info!("Server: SIS DEPTH broadcast OK");
        } else {
            warn!("Server: SIS DEPTH broadcast KO > SIS may warn about surface sound speed");
        }

        info!("Server: testing clients for reception-confirmation interaction");
        let mut live = 0;
        for i in 0..self.clients.len() {
            if !self.clients[i].protocol.confirmable() {
                self.clients[i].alive = self.config.transmit_unconfirmable;
                live += self.clients[i].alive as usize;
                continue;
            }
            let ip = self.clients[i].address;
            info!("Server: testing client {}", self.clients[i]);
            let ok = self.cast_from_sis(ip).await.is_some();
            if self.stopping {
                return Ok(());
            }
            if ok {
                info!("Server: interaction test OK");
                live += 1;
            } else {
                warn!("Server: interaction test KO");
            }
            self.clients[i].alive = ok;
        }
        self.publish();
        if live == 0 {
            error!("Server: unable to confirm interaction with any clients > server mode is not available");
            return Err(DistributionError::NoInteraction);
        }
        info!("Server: interaction verified with {live} client(s)");

        match self.config.vessel_draft {
            Some(d) => info!("Server: vessel draft {d:.2} m (configured)"),
            None => info!("Server: vessel draft from transducer depth"),
        }
        self.cycle.delivered_count = 0;
        Ok(())
    }

    // ── Cycle ─────────────────────────────────────────────────────────────

    async fn run_cycle(&mut self) -> Result<Outcome, DistributionError> {
        self.set_state(ServiceState::Evaluating);

        let Some(fix) = self.nav.fix else {
            warn!(
                "Server: possible corrupted reception of spatial timestamp > waiting {} secs",
                self.config.wait_secs
            );
            self.set_state(ServiceState::Idle);
            return Ok(Outcome::NoFix);
        };
        let cell = self.grid_cell(fix.lat, fix.lon)?;

        let (sss, drift) = match (self.config.apply_surface_sound_speed, self.nav.sound_speed) {
            (true, Some(s)) => {
                info!("Server: using surface sound speed {s:.1}");
                (Some(s), self.cycle.surface_sound_speed.map_or(0.0, |last| (s - last).abs()))
            }
            _ => (None, 0.0),
        };
        debug!("Server: surface sound speed delta {drift:.1}");

        if self.cycle.grid_cell == Some(cell) && drift < SSS_DRIFT && !self.force_send {
            debug!("Server: same grid cell and stable surface sound speed > nothing to send");
            self.set_state(ServiceState::Idle);
            return Ok(Outcome::Unchanged);
        }
        self.force_send = false;
        info!("Server: sending a new cast");

        let cast = self.prepare_cast(fix, sss)?;

        if let Some(expected) = self.last_confirmed_time {
            info!("Server: requesting cast from SIS (prior to transmission)");
            let mut live = 0;
            for i in 0..self.clients.len() {
                if !self.clients[i].alive {
                    info!("Server: dead client {} > skipping", self.clients[i]);
                    continue;
                }
                if !self.clients[i].protocol.confirmable() {
                    live += 1;
                    continue;
                }
                let reflected = self.cast_from_sis(self.clients[i].address).await;
                if self.stopping {
                    return Ok(Outcome::Stopped);
                }
                match reflected {
                    None => {
                        warn!("Server: client {} went dead since last transmission", self.clients[i]);
                        self.clients[i].alive = false;
                    }
                    Some(ssp) if ssp.acquisition_time() != Some(expected) => {
                        error!("Server: {MISMATCH}");
                        self.last_error = Some(MISMATCH.to_string());
                        self.clients[i].alive = false;
                    }
                    Some(_) => live += 1,
                }
            }
            self.publish();
            if live == 0 {
                return Err(DistributionError::NoLiveClients);
            }
        }

        self.set_state(ServiceState::Sending);
        let mut delivered = 0;
        for i in 0..self.clients.len() {
            if !self.clients[i].alive {
                warn!("Server: dead client {} > skipping", self.clients[i]);
                continue;
            }
            let client = self.clients[i].clone();
            let result = self.deliver(&client, &cast).await;
            if self.stopping {
                return Ok(Outcome::Stopped);
            }
            match result {
                Ok(true) => delivered += 1,
                Ok(false) => {
                    error!("Server: {UNCONFIRMED} ({client})");
                    self.clients[i].alive = false;
                    self.last_error = Some(UNCONFIRMED.to_string());
                }
                Err(e) => {
                    error!("Server: {client}: {e}");
                    self.clients[i].alive = false;
                    self.last_error = Some(e.to_string());
                }
            }
            self.publish();
        }

        self.set_state(ServiceState::Confirming);
        if delivered == 0 {
            return Err(DistributionError::NoDelivery);
        }

        self.cycle = CycleState {
            grid_cell: Some(cell),
            surface_sound_speed: sss.or(self.cycle.surface_sound_speed),
            last_tx_timestamp: Some(fix.time),
            delivered_count: self.cycle.delivered_count + 1,
        };
        info!(
            "Server: delivered SSP with spatial time stamp {} @ {:.6} {:.6}",
            fix.time, fix.lat, fix.lon
        );
        self.set_state(ServiceState::Idle);
        Ok(Outcome::Delivered(delivered))
    }

    fn grid_cell(&self, lat: f64, lon: f64) -> Result<GridCell, DistributionError> {
        if self.source == AtlasSource::Rtofs {
            if let Some(rtofs) = &self.atlases.rtofs {
                match rtofs.grid_coords(lat, lon) {
                    Ok(cell) => return Ok(cell),
                    Err(e) => debug!("Server: RTOFS grid lookup failed ({e}) > using WOA09 grid"),
                }
            }
        }
        let woa = self.atlases.woa09.as_ref().ok_or(DistributionError::NoAtlas)?;
        Ok(woa.grid_coords(lat, lon)?)
    }

    /// Query the atlases and apply corrector, surface sound speed and thinning.
    fn prepare_cast(&mut self, fix: NavFix, sss: Option<f64>) -> Result<Profile, DistributionError> {
        let woa = self.atlases.woa09.as_ref().map(|a| a.query(fix.lat, fix.lon, fix.time));

        let mut engine = match (self.source, self.atlases.rtofs.as_ref()) {
            (AtlasSource::Rtofs, Some(rtofs)) => match rtofs.query(fix.lat, fix.lon, fix.time) {
                Ok(cast) => {
                    let mut engine = ProfileEngine::new(cast.profile);
                    if let Some(Ok(w)) = &woa {
                        if engine.extend(&w.profile, SampleSource::Woa09Extend) > 0 {
                            engine.modify_source_info("ext. WOA09");
                        }
                    }
                    engine
                }
                Err(e) => {
                    error!("Server: failed on RTOFS lookup ({e}) > reverting to WOA09");
                    ProfileEngine::new(woa.ok_or(DistributionError::NoAtlas)??.profile)
                }
            },
            _ => ProfileEngine::new(woa.ok_or(DistributionError::NoAtlas)??.profile),
        };
        if engine.is_empty() {
            warn!("Server: atlas returned an empty cast");
            return Err(DistributionError::Profile(crate::profile::ProfileError::Empty));
        }
        engine.store_raw();

        if self.corrector != 0.0 {
            engine.offset_speed(self.corrector);
            info!("Server: applied corrector {:.2} m/s", self.corrector);
            self.corrector = 0.0;
        }

        if let Some(sss) = sss {
            let draft = self.config.vessel_draft.or(self.nav.transducer_depth).unwrap_or(0.0);
            let depth = DRAFT_FACTOR * draft;
            engine.insert_sample(depth, Some(sss), None, None, SampleSource::SurfaceSensor, Flag::Keep)?;
            let n = engine.overwrite_speed_above(depth, sss);
            info!("Server: surface sound speed {sss:.1} applied down to {depth:.2} m ({n} samples above)");
        }

        let before = engine.len();
        engine.thin(self.config.thin_tolerance)?;
        info!("Server: thinned cast from {before} to {} samples", engine.len());
        Ok(engine.into_profile())
    }

    /// Send a cast to one client. `Ok(true)` when delivered (and confirmed,
    /// for clients that can confirm).
    async fn deliver(&mut self, client: &ClientEndpoint, cast: &Profile) -> Result<bool, DistributionError> {
        let sentence = client.encode(cast)?;
        let confirmable = client.protocol.confirmable();
        if confirmable {
            self.expect_ssp(client.address);
        }

        info!("Server: transmitting cast to {client}");
        if let Err(e) = self.transport.send_to(sentence.as_bytes(), client.socket_addr()) {
            warn!("Server: {e}");
            return Ok(false);
        }
        self.last_tx = Some(sentence.clone());

        if !confirmable {
            info!("Server: transmitted cast, protocol does not allow verification");
            self.wait_for(self.config.settle(), |s| s.stopping).await;
            return Ok(true);
        }

        self.set_state(ServiceState::Confirming);
        request_profile(self.transport.as_ref(), client.address, self.config.request_delay()).await;
        info!("Server: waiting for receipt confirmation...");
        if !self.wait_for(self.config.confirm_timeout(), |s| s.nav.ssp.is_some() || s.stopping).await {
            info!("Server: reception not confirmed > unable to catch the back datagram");
            return Ok(false);
        }
        let Some(ssp) = self.nav.ssp.clone() else {
            return Ok(false);
        };

        let sent = parse_sentence(&sentence)?.profile;
        let Some(diff) = max_speed_difference(&sent, &ssp) else {
            info!("Server: reception not confirmed > reflected profile is empty");
            return Ok(false);
        };
        info!("Server: casts differ by {diff:.1} m/s");
        if diff < CONFIRM_TOLERANCE {
            self.last_confirmed_time = ssp.acquisition_time();
            Ok(true)
        } else {
            info!("Server: reception not confirmed > too big delta");
            Ok(false)
        }
    }

    /// Ask SIS at `ip` to re-broadcast its profile and wait for it.
    async fn cast_from_sis(&mut self, ip: IpAddr) -> Option<SspRecord> {
        self.expect_ssp(ip);
        request_profile(self.transport.as_ref(), ip, self.config.request_delay()).await;
        self.wait_for(self.config.confirm_timeout(), |s| s.nav.ssp.is_some() || s.stopping).await;
        self.nav.ssp.clone()
    }

    fn expect_ssp(&mut self, ip: IpAddr) {
        self.nav.ssp = None;
        self.nav.ssp_from = Some(ip);
    }

    // ── Event handling ────────────────────────────────────────────────────

    /// Idle between cycles; a command can cut the wait short.
    async fn pause(&mut self) {
        let wait = self.config.wait();
        self.wait_for(wait, |s| s.stopping || s.restart || s.force_send).await;
    }

    /// Process records and commands until `done` holds or `limit` elapses.
    /// Checks `done` once per poll interval and after every event.
    async fn wait_for(&mut self, limit: Duration, done: fn(&Self) -> bool) -> bool {
        let poll = self.config.confirm_poll();
        let polls = ((limit.as_millis() + poll.as_millis() - 1) / poll.as_millis()).max(1);
        for _ in 0..polls {
            if done(self) {
                return true;
            }
            let deadline = Instant::now() + poll;
            while self.next_event(deadline).await {
                if done(self) {
                    return true;
                }
            }
        }
        done(self)
    }

    /// Wait for one record or command. Returns false when `deadline` passes first.
    async fn next_event(&mut self, deadline: Instant) -> bool {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => false,
            record = self.records.recv(), if self.records_open => {
                match record {
                    Some(r) => self.on_record(r),
                    None => {
                        warn!("Server: record stream closed");
                        self.records_open = false;
                    }
                }
                true
            }
            cmd = self.commands.recv(), if self.commands_open => {
                match cmd {
                    Some(c) => self.on_command(c),
                    None => {
                        debug!("Server: all handles dropped");
                        self.commands_open = false;
                    }
                }
                true
            }
        }
    }

    fn on_record(&mut self, received: Received) {
        match received.record {
            KmRecord::Position(p) => match p.header.timestamp() {
                Some(time) => self.nav.fix = Some(NavFix { lat: p.latitude, lon: p.longitude, time }),
                None => debug!("Server: position datagram without valid time"),
            },
            KmRecord::Xyz88(x) => {
                self.nav.sound_speed = Some(x.sound_speed);
                self.nav.transducer_depth = Some(x.transducer_depth as f64);
            }
            KmRecord::SoundSpeedProfile(u) => match self.nav.ssp_from {
                Some(ip) if ip != received.sender.ip() => {
                    debug!("Server: ignoring SSP from {} while waiting on {ip}", received.sender);
                }
                _ => {
                    debug!("Server: SSP from {} ({} samples)", received.sender, u.depth.len());
                    self.nav.ssp = Some(u);
                }
            },
            other => trace!("Server: ignoring {}", other.opcode().name()),
        }
    }

    fn on_command(&mut self, cmd: Command) {
        info!("Server: command {cmd:?}");
        match cmd {
            Command::ForceSend if self.state.is_degraded() => {
                warn!("Server: force send ignored while degraded, restart first");
            }
            Command::ForceSend => self.force_send = true,
            Command::SetCorrector(v) => {
                self.corrector = v;
                self.publish();
            }
            Command::Restart => self.restart = true,
            Command::Stop => self.stopping = true,
        }
    }

    // ── Status ────────────────────────────────────────────────────────────

    fn degrade(&mut self, reason: impl ToString) {
        let reason = reason.to_string();
        error!("Server: {reason}");
        self.last_error = Some(reason.clone());
        self.set_state(ServiceState::Degraded { reason });
    }

    fn set_state(&mut self, next: ServiceState) {
        if self.state != next {
            info!("Server: {} → {}", self.state, next);
            self.state = next;
        }
        self.publish();
    }

    fn snapshot(&self) -> ServiceStatus {
        ServiceStatus {
            state: self.state.clone(),
            cycle: self.cycle.clone(),
            clients: self.clients.clone(),
            position: self.nav.fix.map(|f| Position { lat: f.lat, lon: f.lon }),
            surface_sound_speed: self.nav.sound_speed,
            corrector: self.corrector,
            last_confirmed_time: self.last_confirmed_time,
            last_error: self.last_error.clone(),
            last_tx: self.last_tx.clone(),
        }
    }

    fn publish(&self) {
        self.status.send_replace(self.snapshot());
    }
}

/// Largest |sent − reflected| speed at the sent depths, with the reflected
/// profile interpolated onto them.
fn max_speed_difference(sent: &Profile, reflected: &SspRecord) -> Option<f64> {
    sent.depth
        .iter()
        .zip(&sent.speed)
        .map(|(d, s)| interp(*d, &reflected.depth, &reflected.speed).map(|r| (s - r).abs()))
        .try_fold(0.0_f64, |acc, diff| diff.map(|d| acc.max(d)))
        .filter(|_| !sent.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kongsberg::{KmHeader, KmOpcode};

    fn ssp(depth: &[f64], speed: &[f64]) -> SspRecord {
        SspRecord {
            header: KmHeader {
                opcode: KmOpcode::SoundSpeedProfile,
                model: 710,
                date: 20261019,
                time_ms: 0,
                counter: 0,
                serial: 0,
            },
            profile_date: 20261019,
            profile_time: 3600,
            depth_resolution_cm: 1,
            depth: depth.to_vec(),
            speed: speed.to_vec(),
        }
    }

    #[test]
    fn reflected_profile_is_interpolated_onto_sent_depths() {
        let sent = Profile::from_depth_speed(&[0.0, 5.0, 10.0], &[1500.0, 1495.1, 1490.0]);
        let reflected = ssp(&[0.0, 10.0], &[1500.0, 1490.0]);
        let diff = max_speed_difference(&sent, &reflected).unwrap();
        assert!((diff - 0.1).abs() < 1e-9);
    }

    #[test]
    fn empty_inputs_give_no_difference() {
        let sent = Profile::from_depth_speed(&[0.0], &[1500.0]);
        assert_eq!(max_speed_difference(&sent, &ssp(&[], &[])), None);
        assert_eq!(max_speed_difference(&Profile::new(), &ssp(&[0.0], &[1500.0])), None);
    }
}
