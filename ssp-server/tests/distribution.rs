//! End-to-end runs of the distribution loop against an emulated SIS.
//!
//! `FakeSis` stands in for the network: sentences sent to a reflecting host
//! are remembered, and R20 requests to that host produce a 'U' datagram on
//! the record channel, the way SIS re-broadcasts the profile it applies.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use chrono::{NaiveDate, NaiveDateTime};
use ssp_types::Profile;
use tokio::sync::mpsc;

use ssp_server::atlas::{Atlas, AtlasCast, AtlasError, GridCell};
use ssp_server::clients::{ClientEndpoint, ClientProtocol};
use ssp_server::config::DistributionConfig;
use ssp_server::distribution::{Atlases, DistributionHandle, DistributionService, ServiceState, ServiceStatus};
use ssp_server::kongsberg::encode::{encode_position, encode_ssp, encode_xyz88};
use ssp_server::kongsberg::request::{parse_request, REQUEST_PORT};
use ssp_server::kongsberg::{decode, default_desired, KmHeader, KmOpcode, Received};
use ssp_server::transport::{Transport, TransportError};
use ssp_server::wire::{parse_sentence, seconds_of_day, yyyymmdd};

const GOOD: &str = "10.0.0.1";
const BAD: &str = "10.0.0.2";
const SIS_PORT: u16 = 4002;

fn header(opcode: KmOpcode) -> KmHeader {
    KmHeader { opcode, model: 710, date: 20261019, time_ms: 43_200_000, counter: 1, serial: 101 }
}

fn t(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 19).unwrap().and_hms_opt(h, m, 0).unwrap()
}

fn cast(speed_offset: f64, time: NaiveDateTime) -> Profile {
    let mut p = Profile::from_depth_speed(
        &[0.0, 10.0, 50.0, 200.0, 1000.0],
        &[1510.0, 1508.0, 1495.0, 1485.0, 1482.0].map(|s| s + speed_offset),
    );
    p.timestamp = Some(time);
    p
}

// ── Fakes ─────────────────────────────────────────────────────────────────────

struct FakeSis {
    records: mpsc::Sender<Received>,
    reflecting: Vec<IpAddr>,
    /// Profile each host currently applies.
    applied: Mutex<HashMap<IpAddr, Profile>>,
    /// Hosts that answer R20 but never apply a received cast.
    deaf: Mutex<Vec<IpAddr>>,
    sent: Mutex<Vec<(String, SocketAddr)>>,
}

impl FakeSis {
    fn new(records: mpsc::Sender<Received>, reflecting: &[&str]) -> Arc<Self> {
        let reflecting: Vec<IpAddr> = reflecting.iter().map(|ip| ip.parse().unwrap()).collect();
        let applied = reflecting.iter().map(|ip| (*ip, cast(0.0, t(6, 0)))).collect();
        Arc::new(Self {
            records,
            reflecting,
            applied: Mutex::new(applied),
            deaf: Mutex::default(),
            sent: Mutex::default(),
        })
    }

    /// Another agent replaces the profile on `ip`.
    fn upload(&self, ip: &str, profile: Profile) {
        self.applied.lock().unwrap().insert(ip.parse().unwrap(), profile);
    }

    fn deafen(&self, ip: &str) {
        self.deaf.lock().unwrap().push(ip.parse().unwrap());
    }

    fn sentences_to(&self, ip: &str) -> Vec<String> {
        let ip: IpAddr = ip.parse().unwrap();
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, a)| a.ip() == ip && s.starts_with("$MVS"))
            .map(|(s, _)| s.clone())
            .collect()
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Transport for FakeSis {
    fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<(), TransportError> {
        let text = String::from_utf8_lossy(payload).to_string();
        self.sent.lock().unwrap().push((text.clone(), addr));
        if !self.reflecting.contains(&addr.ip()) {
            return Ok(());
        }
        if addr.port() == REQUEST_PORT {
            // Only the installed EM model answers.
            if parse_request(&text) != Some("710") {
                return Ok(());
            }
            let applied = self.applied.lock().unwrap();
            let p = &applied[&addr.ip()];
            let ts = p.timestamp.unwrap();
            let payload = encode_ssp(
                &header(KmOpcode::SoundSpeedProfile),
                yyyymmdd(&ts),
                seconds_of_day(&ts),
                &p.depth,
                &p.speed,
            );
            let record = decode(&payload, &default_desired()).unwrap().unwrap();
            let sender = SocketAddr::new(addr.ip(), 16103);
            let _ = self.records.try_send(Received { record, sender, at: Instant::now() });
        } else if self.deaf.lock().unwrap().contains(&addr.ip()) {
            return Ok(());
        } else if let Ok(parsed) = parse_sentence(&text) {
            self.applied.lock().unwrap().insert(addr.ip(), parsed.profile);
        }
        Ok(())
    }
}

/// Returns the same cast for every position, tagged with its own name.
struct FixedAtlas {
    name: &'static str,
    profile: Profile,
}

impl FixedAtlas {
    fn named(name: &'static str, profile: Profile) -> Arc<dyn Atlas> {
        Arc::new(Self { name, profile })
    }

    fn rtofs(profile: Profile) -> Option<Arc<dyn Atlas>> {
        Some(Self::named("RTOFS", profile))
    }
}

fn grid(lat: f64, lon: f64) -> GridCell {
    GridCell { lat_index: (lat * 12.0).round() as i64, lon_index: (lon * 12.0).round() as i64 }
}

impl Atlas for FixedAtlas {
    fn name(&self) -> &str {
        self.name
    }

    fn grid_coords(&self, lat: f64, lon: f64) -> Result<GridCell, AtlasError> {
        Ok(grid(lat, lon))
    }

    fn query(&self, lat: f64, lon: f64, time: NaiveDateTime) -> Result<AtlasCast, AtlasError> {
        let mut p = self.profile.clone();
        p.position = Some(ssp_types::Position { lat, lon });
        p.timestamp = Some(time);
        p.source_info = self.name.into();
        Ok(AtlasCast { profile: p, min: None, max: None })
    }
}

/// Has a grid but every lookup fails, like an atlas whose data went missing.
struct FailingAtlas(&'static str);

impl Atlas for FailingAtlas {
    fn name(&self) -> &str {
        self.0
    }

    fn grid_coords(&self, lat: f64, lon: f64) -> Result<GridCell, AtlasError> {
        Ok(grid(lat, lon))
    }

    fn query(&self, _lat: f64, _lon: f64, _time: NaiveDateTime) -> Result<AtlasCast, AtlasError> {
        Err(AtlasError::Unavailable(self.0.into()))
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

fn fast_config() -> DistributionConfig {
    DistributionConfig {
        wait_secs: 60,
        confirm_timeout_secs: 1,
        confirm_poll_ms: 20,
        settle_secs: 0,
        request_delay_ms: 0,
        vessel_draft: Some(4.0),
        ..DistributionConfig::default()
    }
}

fn sis_client(name: &str, ip: &str) -> ClientEndpoint {
    ClientEndpoint::new(name, ip.parse().unwrap(), SIS_PORT, ClientProtocol::Sis)
}

async fn feed_nav(records: &mpsc::Sender<Received>, lat: f64, lon: f64, sound_speed: f64) {
    let sender: SocketAddr = format!("{GOOD}:16103").parse().unwrap();
    let desired = default_desired();
    for payload in [
        encode_position(&header(KmOpcode::Position), lat, lon, 90.0, "$GPGGA"),
        encode_xyz88(&header(KmOpcode::Xyz88), sound_speed, 4.0, &[]),
    ] {
        let record = decode(&payload, &desired).unwrap().unwrap();
        records.send(Received { record, sender, at: Instant::now() }).await.unwrap();
    }
}

async fn wait_status(handle: &DistributionHandle, pred: impl Fn(&ServiceStatus) -> bool) -> ServiceStatus {
    let mut rx = handle.subscribe();
    let status = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| pred(s)))
        .await
        .expect("status never reached")
        .expect("service dropped its status channel")
        .clone();
    status
}

fn speed_at(profile: &Profile, depth: f64) -> f64 {
    let i = profile.depth.iter().position(|d| (d - depth).abs() < 1e-6).unwrap();
    profile.speed[i]
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn confirmed_delivery_to_good_client_and_bad_client_marked_dead() {
    let (records_tx, records_rx) = mpsc::channel(64);
    let sis = FakeSis::new(records_tx.clone(), &[GOOD]);
    let atlases = Atlases { rtofs: FixedAtlas::rtofs(cast(0.0, t(0, 0))), woa09: None };
    let clients = vec![sis_client("SIS-A", GOOD), sis_client("SIS-B", BAD)];
    feed_nav(&records_tx, 43.1, -70.5, 1512.0).await;

    let (service, handle) = DistributionService::new(fast_config(), clients, atlases, sis.clone(), records_rx);
    let task = tokio::spawn(service.run());

    let status = wait_status(&handle, |s| s.cycle.delivered_count == 1 && s.state == ServiceState::Idle).await;
    assert!(status.clients[0].alive);
    assert!(!status.clients[1].alive);
    assert!(status.last_confirmed_time.is_some());
    assert!(status.cycle.grid_cell.is_some());
    assert_eq!(status.cycle.surface_sound_speed, Some(1512.0));

    let sent = sis.sentences_to(GOOD);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("$MVS01,"));
    assert!(sis.sentences_to(BAD).is_empty());

    // Surface sound speed replaces the atlas value near the surface.
    let tx = parse_sentence(&sent[0]).unwrap().profile;
    assert_eq!(tx.speed[0], 1512.0);

    assert!(handle.stop().await);
    let last = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert_eq!(last.state, ServiceState::Stopped);
}

#[tokio::test]
async fn same_cell_and_stable_surface_speed_sends_nothing_new() {
    let (records_tx, records_rx) = mpsc::channel(64);
    let sis = FakeSis::new(records_tx.clone(), &[GOOD]);
    let atlases = Atlases { rtofs: FixedAtlas::rtofs(cast(0.0, t(0, 0))), woa09: None };
    feed_nav(&records_tx, 43.1, -70.5, 1512.0).await;

    let config = DistributionConfig { wait_secs: 0, ..fast_config() };
    let (service, handle) = DistributionService::new(config, vec![sis_client("SIS", GOOD)], atlases, sis.clone(), records_rx);
    let task = tokio::spawn(service.run());

    wait_status(&handle, |s| s.cycle.delivered_count == 1).await;
    // Sub-threshold drift in the same cell.
    feed_nav(&records_tx, 43.1, -70.5, 1512.5).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(handle.status().cycle.delivered_count, 1);
    assert_eq!(sis.sentences_to(GOOD).len(), 1);

    // Drift above 1 m/s triggers a new cast.
    feed_nav(&records_tx, 43.1, -70.5, 1514.0).await;
    let status = wait_status(&handle, |s| s.cycle.delivered_count == 2).await;
    assert_eq!(status.cycle.surface_sound_speed, Some(1514.0));

    handle.stop().await;
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn profile_uploaded_by_another_agent_stops_distribution() {
    let (records_tx, records_rx) = mpsc::channel(64);
    let sis = FakeSis::new(records_tx.clone(), &[GOOD]);
    let atlases = Atlases { rtofs: FixedAtlas::rtofs(cast(0.0, t(0, 0))), woa09: None };
    feed_nav(&records_tx, 43.1, -70.5, 1512.0).await;

    let (service, handle) =
        DistributionService::new(fast_config(), vec![sis_client("SIS", GOOD)], atlases, sis.clone(), records_rx);
    let task = tokio::spawn(service.run());
    wait_status(&handle, |s| s.cycle.delivered_count == 1).await;

    sis.upload(GOOD, cast(3.0, t(13, 30)));
    assert!(handle.force_send().await);

    let status = wait_status(&handle, |s| s.state.is_degraded()).await;
    assert_eq!(status.state, ServiceState::Degraded { reason: "No more live clients".into() });
    assert!(!status.clients[0].alive);
    assert_eq!(sis.sentences_to(GOOD).len(), 1);

    // Force send is ignored until a restart.
    handle.force_send().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handle.status().state.is_degraded());

    handle.stop().await;
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn restart_revives_clients_after_degradation() {
    let (records_tx, records_rx) = mpsc::channel(64);
    let sis = FakeSis::new(records_tx.clone(), &[GOOD]);
    let atlases = Atlases { rtofs: FixedAtlas::rtofs(cast(0.0, t(0, 0))), woa09: None };
    feed_nav(&records_tx, 43.1, -70.5, 1512.0).await;

    let (service, handle) =
        DistributionService::new(fast_config(), vec![sis_client("SIS", GOOD)], atlases, sis.clone(), records_rx);
    let task = tokio::spawn(service.run());
    wait_status(&handle, |s| s.cycle.delivered_count == 1).await;
    sis.upload(GOOD, cast(3.0, t(13, 30)));
    handle.force_send().await;
    wait_status(&handle, |s| s.state.is_degraded()).await;

    handle.restart().await;
    let status = wait_status(&handle, |s| s.cycle.delivered_count == 1 && s.state == ServiceState::Idle).await;
    assert!(status.clients[0].alive);
    assert_eq!(sis.sentences_to(GOOD).len(), 2);

    handle.stop().await;
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn missing_atlases_degrade_before_any_transmission() {
    let (records_tx, records_rx) = mpsc::channel(64);
    let sis = FakeSis::new(records_tx.clone(), &[GOOD]);
    feed_nav(&records_tx, 43.1, -70.5, 1512.0).await;

    let (service, handle) = DistributionService::new(
        fast_config(),
        vec![sis_client("SIS", GOOD)],
        Atlases::default(),
        sis.clone(),
        records_rx,
    );
    let task = tokio::spawn(service.run());

    let status = wait_status(&handle, |s| s.state.is_degraded()).await;
    assert_eq!(status.last_error.as_deref(), Some("no atlas is available"));
    assert_eq!(sis.sent_count(), 0);

    handle.stop().await;
    let last = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert_eq!(last.state, ServiceState::Stopped);
}

#[tokio::test]
async fn no_reflecting_client_degrades_after_startup_check() {
    let (records_tx, records_rx) = mpsc::channel(64);
    let sis = FakeSis::new(records_tx.clone(), &[]);
    let atlases = Atlases { rtofs: FixedAtlas::rtofs(cast(0.0, t(0, 0))), woa09: None };
    feed_nav(&records_tx, 43.1, -70.5, 1512.0).await;

    let (service, handle) =
        DistributionService::new(fast_config(), vec![sis_client("SIS", BAD)], atlases, sis.clone(), records_rx);
    let task = tokio::spawn(service.run());

    let status = wait_status(&handle, |s| s.state.is_degraded()).await;
    assert_eq!(status.last_error.as_deref(), Some("Unable to confirm interaction with any clients"));
    assert!(sis.sentences_to(BAD).is_empty());

    handle.stop().await;
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_interrupts_the_wait_for_a_position_fix() {
    let (_records_tx, records_rx) = mpsc::channel(64);
    let (fake_tx, _fake_rx) = mpsc::channel(1);
    let sis = FakeSis::new(fake_tx, &[]);
    let atlases = Atlases { rtofs: FixedAtlas::rtofs(cast(0.0, t(0, 0))), woa09: None };
    let config = DistributionConfig { confirm_timeout_secs: 30, ..fast_config() };

    let (service, handle) = DistributionService::new(config, vec![sis_client("SIS", GOOD)], atlases, sis, records_rx);
    let task = tokio::spawn(service.run());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.status().state, ServiceState::Starting);

    handle.stop().await;
    let last = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert_eq!(last.state, ServiceState::Stopped);
}

#[tokio::test]
async fn unconfirmable_clients_receive_casts_when_enabled() {
    let (records_tx, records_rx) = mpsc::channel(64);
    let sis = FakeSis::new(records_tx.clone(), &[]);
    let atlases = Atlases { rtofs: FixedAtlas::rtofs(cast(0.0, t(0, 0))), woa09: None };
    feed_nav(&records_tx, 43.1, -70.5, 1512.0).await;

    let clients = vec![
        ClientEndpoint::new("QINSy", "10.0.0.3".parse().unwrap(), 4003, ClientProtocol::Qinsy),
        ClientEndpoint::new("HYPACK", "10.0.0.4".parse().unwrap(), 4004, ClientProtocol::Hypack),
    ];
    let config = DistributionConfig { transmit_unconfirmable: true, ..fast_config() };
    let (service, handle) = DistributionService::new(config, clients, atlases, sis.clone(), records_rx);
    let task = tokio::spawn(service.run());

    let status = wait_status(&handle, |s| s.cycle.delivered_count == 1).await;
    assert!(status.clients.iter().all(|c| c.alive));
    assert!(sis.sentences_to("10.0.0.3")[0].starts_with("$MVS12,"));
    let calc = sis.sent.lock().unwrap().iter().find(|(_, a)| a.port() == 4004).map(|(s, _)| s.clone());
    assert!(calc.is_some());
    // No R20 requests to hosts that cannot reflect a profile.
    assert!(sis.sent.lock().unwrap().iter().all(|(_, a)| a.port() != REQUEST_PORT));

    handle.stop().await;
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn unconfirmed_client_is_dropped_while_the_other_still_receives() {
    let (records_tx, records_rx) = mpsc::channel(64);
    let sis = FakeSis::new(records_tx.clone(), &[GOOD, BAD]);
    // BAD keeps reflecting an old, different profile whatever it is sent.
    sis.upload(BAD, cast(5.0, t(6, 0)));
    sis.deafen(BAD);
    let atlases = Atlases { rtofs: FixedAtlas::rtofs(cast(0.0, t(0, 0))), woa09: None };
    let clients = vec![sis_client("SIS-A", GOOD), sis_client("SIS-B", BAD)];
    feed_nav(&records_tx, 43.1, -70.5, 1512.0).await;

    let (service, handle) = DistributionService::new(fast_config(), clients, atlases, sis.clone(), records_rx);
    let task = tokio::spawn(service.run());

    let status = wait_status(&handle, |s| s.cycle.delivered_count == 1 && s.state == ServiceState::Idle).await;
    assert!(status.clients[0].alive);
    assert!(!status.clients[1].alive);
    assert_eq!(status.last_error.as_deref(), Some("Unable to confirm SSP reception"));
    assert_eq!(sis.sentences_to(GOOD).len(), 1);
    assert_eq!(sis.sentences_to(BAD).len(), 1);

    // The dead client is skipped on the next cycle.
    handle.force_send().await;
    wait_status(&handle, |s| s.cycle.delivered_count == 2).await;
    assert_eq!(sis.sentences_to(GOOD).len(), 2);
    assert_eq!(sis.sentences_to(BAD).len(), 1);

    handle.stop().await;
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn rtofs_lookup_failure_falls_back_to_woa09() {
    let (records_tx, records_rx) = mpsc::channel(64);
    let sis = FakeSis::new(records_tx.clone(), &[GOOD]);
    let atlases = Atlases {
        rtofs: Some(Arc::new(FailingAtlas("RTOFS"))),
        woa09: Some(FixedAtlas::named("WOA09", cast(1.0, t(0, 0)))),
    };
    feed_nav(&records_tx, 43.1, -70.5, 1512.0).await;

    let (service, handle) =
        DistributionService::new(fast_config(), vec![sis_client("SIS", GOOD)], atlases, sis.clone(), records_rx);
    let task = tokio::spawn(service.run());

    let status = wait_status(&handle, |s| s.cycle.delivered_count == 1).await;
    assert!(status.clients[0].alive);
    let sent = sis.sentences_to(GOOD);
    assert_eq!(sent.len(), 1);
    let tx = parse_sentence(&sent[0]).unwrap().profile;
    assert!(tx.source_info.starts_with("WOA09"));
    assert!(!tx.source_info.contains("RTOFS"));
    assert_relative_eq!(speed_at(&tx, 1000.0), 1483.0);

    handle.stop().await;
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn shallow_rtofs_cast_is_extended_with_woa09() {
    let (records_tx, records_rx) = mpsc::channel(64);
    let sis = FakeSis::new(records_tx.clone(), &[GOOD]);
    let shallow = Profile::from_depth_speed(&[0.0, 10.0, 50.0, 200.0], &[1510.0, 1508.0, 1495.0, 1485.0]);
    let deep = Profile::from_depth_speed(&[0.0, 500.0, 1000.0, 2000.0], &[1505.0, 1484.0, 1482.0, 1495.0]);
    let atlases = Atlases { rtofs: FixedAtlas::rtofs(shallow), woa09: Some(FixedAtlas::named("WOA09", deep)) };
    feed_nav(&records_tx, 43.1, -70.5, 1512.0).await;

    let (service, handle) =
        DistributionService::new(fast_config(), vec![sis_client("SIS", GOOD)], atlases, sis.clone(), records_rx);
    let task = tokio::spawn(service.run());

    wait_status(&handle, |s| s.cycle.delivered_count == 1).await;
    let tx = parse_sentence(&sis.sentences_to(GOOD)[0]).unwrap().profile;
    assert_relative_eq!(speed_at(&tx, 2000.0), 1495.0);
    assert!(tx.source_info.starts_with("RTOFS"));
    assert!(tx.source_info.contains("ext. WOA09"));

    handle.stop().await;
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn both_atlas_lookups_failing_degrades_without_transmission() {
    let (records_tx, records_rx) = mpsc::channel(64);
    let sis = FakeSis::new(records_tx.clone(), &[GOOD]);
    let atlases = Atlases {
        rtofs: Some(Arc::new(FailingAtlas("RTOFS"))),
        woa09: Some(Arc::new(FailingAtlas("WOA09"))),
    };
    feed_nav(&records_tx, 43.1, -70.5, 1512.0).await;

    let (service, handle) =
        DistributionService::new(fast_config(), vec![sis_client("SIS", GOOD)], atlases, sis.clone(), records_rx);
    let task = tokio::spawn(service.run());

    let status = wait_status(&handle, |s| s.state.is_degraded()).await;
    let reason = status.last_error.unwrap_or_default();
    assert!(reason.starts_with("unable to retrieve a synthetic cast"), "{reason}");
    assert!(sis.sentences_to(GOOD).is_empty());
    assert_eq!(status.cycle.delivered_count, 0);

    handle.stop().await;
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn corrector_applies_to_one_cast_then_resets() {
    let (records_tx, records_rx) = mpsc::channel(64);
    let sis = FakeSis::new(records_tx.clone(), &[GOOD]);
    let atlases = Atlases { rtofs: FixedAtlas::rtofs(cast(0.0, t(0, 0))), woa09: None };
    feed_nav(&records_tx, 43.1, -70.5, 1512.0).await;

    let (service, handle) =
        DistributionService::new(fast_config(), vec![sis_client("SIS", GOOD)], atlases, sis.clone(), records_rx);
    let task = tokio::spawn(service.run());
    wait_status(&handle, |s| s.cycle.delivered_count == 1).await;

    handle.set_corrector(0.5).await;
    wait_status(&handle, |s| s.corrector == 0.5).await;
    handle.force_send().await;
    let status = wait_status(&handle, |s| s.cycle.delivered_count == 2).await;
    assert_eq!(status.corrector, 0.0);

    handle.force_send().await;
    wait_status(&handle, |s| s.cycle.delivered_count == 3).await;

    let sent: Vec<Profile> = sis.sentences_to(GOOD).iter().map(|s| parse_sentence(s).unwrap().profile).collect();
    assert_eq!(sent.len(), 3);
    assert_relative_eq!(speed_at(&sent[0], 50.0), 1495.0);
    assert_relative_eq!(speed_at(&sent[1], 50.0), 1495.5);
    assert_relative_eq!(speed_at(&sent[2], 50.0), 1495.0);
    // The surface sound speed still wins above the draft.
    assert_relative_eq!(sent[1].speed[0], 1512.0);

    handle.stop().await;
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}
