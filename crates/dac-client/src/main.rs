//! DAC client entry point.
//!
//! Wires together discovery, the device registry and, when `stream.autoplay`
//! is set, a test-pattern stream to the first device found.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()          -- TOML, defaults when absent
//!  └─ start services
//!       ├─ DiscoveryListener (UDP background thread)
//!       ├─ registry pump     (Tokio task)
//!       ├─ registry pruner   (Tokio task)
//!       └─ autoplay          (optional: Connection + StreamWriter)
//! ```

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use tracing::{error, info, trace, warn};
use tracing_subscriber::EnvFilter;

use dac_client::application::pattern::CirclePattern;
use dac_client::application::registry::{
    prune_periodically, pump_sightings, DeviceRegistry, SharedRegistry,
};
use dac_client::application::stream::StreamWriter;
use dac_client::infrastructure::network::connection::Connection;
use dac_client::infrastructure::network::discovery::start_discovery_listener;
use dac_client::infrastructure::storage::config::{load_config, AppConfig};
use dac_client::DacError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_error) = match load_config() {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.client.log_level)),
        )
        .init();

    if let Some(e) = config_error {
        warn!("config not loaded, using defaults: {e}");
    }
    info!("DAC client starting");

    // Shutdown flag shared across all background services.
    let running = Arc::new(AtomicBool::new(true));

    // ── Discovery listener and registry ───────────────────────────────────────
    let bind = SocketAddr::new(config.network.bind_ip()?, config.network.discovery_port);
    let (sightings, _) = start_discovery_listener(bind, Arc::clone(&running))?;

    let registry = DeviceRegistry::shared(config.registry.expiry());
    tokio::spawn(pump_sightings(sightings, Arc::clone(&registry)));
    tokio::spawn(prune_periodically(
        Arc::clone(&registry),
        config.registry.prune_interval(),
        Arc::clone(&running),
    ));

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    info!("DAC client ready.  Press Ctrl-C to exit.");

    if config.stream.autoplay {
        if let Err(e) = autoplay(&config, &registry, &running).await {
            error!("autoplay failed: {e:#}");
        }
    }

    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!("DAC client stopped");
    Ok(())
}

/// Waits for a device, then streams the circle pattern to it until Ctrl-C.
async fn autoplay(
    config: &AppConfig,
    registry: &SharedRegistry,
    running: &Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let entry = loop {
        if !running.load(Ordering::Relaxed) {
            return Ok(());
        }
        let first = registry
            .write()
            .await
            .live_entries(Instant::now())
            .into_iter()
            .next();
        if let Some(entry) = first {
            break entry;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    let addr = SocketAddr::new(entry.address, config.network.command_port);
    let settings = config.network.connection_settings(config.stream.point_layout)?;
    let stream_settings = config.stream.settings()?;
    // The connection gets its own flag so it can still send `stop` after Ctrl-C.
    let mut conn = Connection::connect(
        addr,
        Some(entry.identity),
        &settings,
        Arc::new(AtomicBool::new(true)),
    )
    .await?;

    let mut status_rx = conn.subscribe_status();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let st = *status_rx.borrow();
            trace!(
                "status: {:?} fullness={} rate={} played={}",
                st.playback_state,
                st.buffer_fullness,
                st.point_rate,
                st.point_count
            );
        }
    });

    info!("streaming test pattern to {}", entry.identity.mac);
    let mut pattern = CirclePattern::default();
    let result = StreamWriter::new(&mut conn, stream_settings, Arc::clone(running))
        .run(&mut pattern)
        .await;

    match result {
        Ok(summary) => info!("stream finished: {} points", summary.points),
        Err(DacError::Cancelled) => {
            info!("stream cancelled; stopping playback");
            conn.stop().await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
