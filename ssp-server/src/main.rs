use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use ssp_server::atlas::{Atlas, FileAtlas};
use ssp_server::config::ServerConfig;
use ssp_server::distribution::{Atlases, DistributionService};
use ssp_server::http::{self, ApiState, SharedMvpCast};
use ssp_server::kongsberg::KmDispatcher;
use ssp_server::listener::{DatagramListener, ListenerHandle};
use ssp_server::mvp::{MultiPacketReassembler, MvpHandler};
use ssp_server::transport::UdpTransport;

const RECORD_QUEUE: usize = 1024;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "ssp-server", about = "Sound speed profile distribution server")]
struct Args {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Kongsberg datagram port (overrides config)
    #[arg(long)]
    km_port: Option<u16>,
    /// MVP cast port (overrides config)
    #[arg(long)]
    mvp_port: Option<u16>,
    /// HTTP status/control port (overrides config)
    #[arg(long)]
    status_port: Option<u16>,
    /// Send a cast as soon as the startup checks pass
    #[arg(long)]
    force_send: bool,
}

async fn load_atlas(name: &str, path: Option<&PathBuf>) -> Option<Arc<dyn Atlas>> {
    let path = path?;
    match FileAtlas::load(path).await {
        Ok(a) => Some(Arc::new(a)),
        Err(e) => {
            warn!("{name} atlas unavailable: {e}");
            None
        }
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ssp_server=info".into()),
        )
        .init();

    let args = Args::parse();
    info!("🌊 SSP distribution server starting...");

    let mut cfg = ServerConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(p) = args.km_port {
        cfg.kongsberg.port = p;
    }
    if let Some(p) = args.mvp_port {
        cfg.mvp.port = p;
    }
    if let Some(p) = args.status_port {
        cfg.api.port = p;
    }
    let clients = cfg.client_endpoints()?;
    for c in &clients {
        info!("Client: {c}");
    }

    // Kongsberg listener
    let (records_tx, records_rx) = mpsc::channel(RECORD_QUEUE);
    let km_handle: Option<ListenerHandle> =
        match DatagramListener::bind(cfg.kongsberg.listener(), KmDispatcher::new(cfg.kongsberg.desired(), records_tx)).await {
            Ok((listener, handle)) => {
                tokio::spawn(listener.run());
                Some(handle)
            }
            Err(e) => {
                // API stays up and reports the missing listener
                error!("KM: {e}");
                None
            }
        };

    // MVP listener
    let last_mvp_cast: SharedMvpCast = Arc::default();
    let mvp_handle = if cfg.mvp.enabled {
        let (casts_tx, mut casts_rx) = mpsc::channel(8);
        let reassembler = MultiPacketReassembler::new(
            cfg.mvp.protocol,
            cfg.mvp.format.driver(),
            Duration::from_secs(cfg.mvp.reassembly_timeout_secs),
        );
        match DatagramListener::bind(cfg.mvp.listener(), MvpHandler::new(reassembler, casts_tx)).await {
            Ok((listener, handle)) => {
                tokio::spawn(listener.run());
                let store = last_mvp_cast.clone();
                tokio::spawn(async move {
                    while let Some(cast) = casts_rx.recv().await {
                        *store.write().await = Some(cast);
                    }
                });
                Some(handle)
            }
            Err(e) => {
                error!("MVP: {e}");
                None
            }
        }
    } else {
        None
    };

    // Atlases
    let atlases = Atlases {
        rtofs: load_atlas("RTOFS", cfg.atlas.rtofs.as_ref()).await,
        woa09: load_atlas("WOA09", cfg.atlas.woa09.as_ref()).await,
    };

    // Distribution service
    let transport = Arc::new(UdpTransport::new().context("binding transmit socket")?);
    let (service, handle) = DistributionService::new(cfg.server.clone(), clients, atlases, transport, records_rx);
    let service_task = tokio::spawn(service.run());
    if args.force_send {
        handle.force_send().await;
    }

    // Operator API
    let app = http::router(ApiState {
        service: handle.clone(),
        km: km_handle.clone(),
        mvp: mvp_handle.clone(),
        last_mvp_cast,
    });
    let addr = format!("0.0.0.0:{}", cfg.api.port);
    let tcp = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    info!("🚀 Status API listening on {addr}");
    let api = tokio::spawn(async move {
        if let Err(e) = axum::serve(tcp, app).await {
            error!("API: {e}");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            handle.stop().await;
        }
        _ = api => {}
    }

    match tokio::time::timeout(Duration::from_secs(30), service_task).await {
        Ok(Ok(status)) => info!("Server: final state {}, {} casts delivered", status.state, status.cycle.delivered_count),
        Ok(Err(e)) => error!("Server task failed: {e}"),
        Err(_) => warn!("Unable to properly stop the server"),
    }
    for h in [km_handle, mvp_handle].into_iter().flatten() {
        h.stop();
    }
    Ok(())
}
