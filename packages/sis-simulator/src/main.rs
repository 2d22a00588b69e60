//! main.rs: SIS acquisition-system emulator
//!
//! Stands in for a Kongsberg SIS host so the distribution server can run
//! end to end without a sonar:
//!   1. Nav loop: advances the vessel and broadcasts 'P' and 'X' datagrams
//!      to the server's Kongsberg port at nav_rate_hz
//!   2. Sentence port: accepts `$MVSxx` casts and applies them
//!   3. Request port: answers `$SMR20` requests for the configured EM model
//!      with a 'U' datagram carrying the applied profile
//!
//! All errors are logged; the simulator never exits on bad input.

mod udp_tx;
mod vessel;

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use clap::Parser;
use serde::Deserialize;
use ssp_server::kongsberg::request::parse_request;
use ssp_server::wire::parse_sentence;
use ssp_types::Profile;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, info, warn};

use udp_tx::KmTransmitter;
use vessel::{SensorConfig, Vessel, VesselConfig};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "sis-sim", about = "SIS acquisition-system emulator")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Distribution server Kongsberg port address (overrides config)
    #[arg(long)]
    server_addr: Option<String>,
    /// Never answer profile requests (exercises the server's dead-client path)
    #[arg(long)]
    mute: bool,
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FullConfig {
    network: NetworkConfig,
    sis: SisConfig,
    vessel: VesselConfig,
    sensors: SensorConfig,
}

#[derive(Debug, Deserialize)]
struct NetworkConfig {
    server_addr: String,
    /// Port the server sends `$MVSxx` casts to.
    sentence_port: u16,
    /// Port the server sends `$SMR20` requests to.
    request_port: u16,
}

#[derive(Debug, Deserialize)]
struct SisConfig {
    model: u16,
    serial: u16,
    /// Profile applied before the server sends one: (depth m, speed m/s).
    initial_profile: Vec<[f64; 2]>,
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct SisState {
    vessel: Vessel,
    tx: KmTransmitter,
    applied: Profile,
    model: String,
    mute: bool,
}

type SharedState = Arc<Mutex<SisState>>;

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sis_sim=info".into()),
        )
        .init();

    let args = Args::parse();

    // Load config
    let config_str = std::fs::read_to_string(&args.config)
        .unwrap_or_else(|_| include_str!("../config.toml").to_string());
    let cfg: FullConfig = toml::from_str(&config_str).expect("Invalid config.toml");
    let server_addr = args.server_addr.unwrap_or(cfg.network.server_addr.clone());

    info!(
        "🛥  SIS simulator starting: EM{} at {:.4} {:.4}, sending to {server_addr}",
        cfg.sis.model, cfg.vessel.start_lat, cfg.vessel.start_lon
    );

    let depth: Vec<f64> = cfg.sis.initial_profile.iter().map(|r| r[0]).collect();
    let speed: Vec<f64> = cfg.sis.initial_profile.iter().map(|r| r[1]).collect();
    let mut applied = Profile::from_depth_speed(&depth, &speed);
    applied.timestamp = Some(now());

    let tx = KmTransmitter::new(&server_addr, cfg.sis.model, cfg.sis.serial)
        .expect("Failed to bind UDP socket");
    let shared: SharedState = Arc::new(Mutex::new(SisState {
        vessel: Vessel::new(&cfg.vessel, &cfg.sensors),
        tx,
        applied,
        model: cfg.sis.model.to_string(),
        mute: args.mute,
    }));

    let mut ports = vec![cfg.network.sentence_port];
    if cfg.network.request_port != cfg.network.sentence_port {
        ports.push(cfg.network.request_port);
    }
    for port in ports {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await.expect("Failed to bind SIS input port");
        info!("📡 SIS input listening on UDP {port}");
        tokio::spawn(input_loop(socket, shared.clone()));
    }

    nav_loop(shared, cfg.sensors.nav_rate_hz).await;
}

// ── Nav broadcast loop ────────────────────────────────────────────────────────

async fn nav_loop(state: SharedState, rate_hz: f64) {
    let period = Duration::from_secs_f64(1.0 / rate_hz.max(0.01));
    let mut ticker = interval(period);
    let mut epoch: u64 = 0;
    loop {
        ticker.tick().await;
        let mut s = state.lock().await;
        s.vessel.tick(period.as_secs_f64());
        let (lat, lon) = s.vessel.measured_position();
        let sss = s.vessel.measured_sound_speed();
        let (heading, draft) = (s.vessel.heading_deg, s.vessel.transducer_depth);
        let t = now();
        s.tx.send_position(t, lat, lon, heading);
        s.tx.send_depth(t, sss, draft);
        epoch += 1;
        if epoch % 30 == 0 {
            info!("⏱ epoch={epoch} | {lat:.5} {lon:.5} | SSS {sss:.1} m/s");
        }
    }
}

// ── SIS input: casts and profile requests ─────────────────────────────────────

async fn input_loop(socket: UdpSocket, state: SharedState) {
    let mut buf = vec![0u8; 65_535];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!("SIS: receive failed: {e}");
                continue;
            }
        };
        let text = String::from_utf8_lossy(&buf[..n]);
        handle_input(&state, &text, from).await;
    }
}

async fn handle_input(state: &SharedState, text: &str, from: std::net::SocketAddr) {
    if text.starts_with("$SMR20") {
        let Some(code) = parse_request(text) else {
            warn!("SIS: bad request from {from}");
            return;
        };
        let mut s = state.lock().await;
        if s.mute || code != s.model {
            debug!("SIS: ignoring request for EM{code}");
            return;
        }
        let applied = s.applied.clone();
        s.tx.send_profile(now(), &applied);
        info!("↩ SIS: re-broadcast applied profile ({} samples)", applied.len());
        return;
    }
    match parse_sentence(text) {
        Ok(parsed) => {
            info!(
                "✅ SIS: applied {} cast from {from} ({} samples, source '{}')",
                parsed.format.name(),
                parsed.profile.len(),
                parsed.profile.source_info
            );
            let mut profile = parsed.profile;
            if profile.timestamp.is_none() {
                profile.timestamp = Some(now());
            }
            state.lock().await.applied = profile;
        }
        Err(e) => warn!("SIS: rejected input from {from}: {e}"),
    }
}
