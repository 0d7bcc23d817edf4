//! occupancyd - cabin seat occupancy daemon
//!
//! This daemon:
//! 1. Loads seat polygons and the detector backend
//! 2. Pulls frames from the configured source (stub, camera, image, or video file)
//! 3. Assigns detected people to seats and debounces per-frame occupancy
//! 4. Prints each confirmed occupancy map to stdout as a JSON line
//! 5. Upserts confirmed maps into the seat record store, when one is configured

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use seat_occupancy::config::{DetectorKind, DetectorSettings, OccupancyConfig};
use seat_occupancy::detect::{BackendRegistry, ReplayBackend, SharedBackend};
use seat_occupancy::ingest::open_source;
use seat_occupancy::{
    ConfirmedEvent, OccupancyPipeline, PersistenceGateway, SeatGeometry, SqliteSeatStore,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Detect seat occupancy from a cabin camera and persist confirmed changes"
)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "OCCUPANCY_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Frame source: stub://..., a camera (/dev/videoN or N), an image, an image directory, or a video file.
    #[arg(long, value_name = "URI")]
    source: Option<String>,

    /// Seat polygon file.
    #[arg(long, value_name = "PATH")]
    seats: Option<PathBuf>,

    /// Seconds an occupancy map must hold before it is confirmed.
    #[arg(long, value_name = "SECS")]
    hold_secs: Option<f64>,

    /// Seat record database; omit to run detection-only.
    #[arg(long, value_name = "PATH")]
    db: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = OccupancyConfig::load_from(args.config.as_deref())?;
    if let Some(source) = args.source {
        cfg.source.uri = source;
    }
    if let Some(seats) = args.seats {
        cfg.seats_path = seats;
    }
    if let Some(hold_secs) = args.hold_secs {
        cfg.hold_secs = hold_secs;
    }
    if let Some(db) = args.db {
        cfg.store.db_path = Some(db);
    }
    cfg.validate()?;

    log::info!(
        "occupancyd {} source={} seats={} hold={}s stride={} confidence={}",
        env!("CARGO_PKG_VERSION"),
        cfg.source.uri,
        cfg.seats_path.display(),
        cfg.hold_secs,
        cfg.source.frame_stride,
        cfg.detector.confidence
    );

    let geometry = SeatGeometry::load(&cfg.seats_path)?;
    log::info!("loaded {} seat polygon(s)", geometry.seat_count());

    let detector = build_detector(&cfg.detector)?;
    let gateway = open_gateway(&cfg);
    let mut source = open_source(&cfg.source_config())?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let mut pipeline = OccupancyPipeline::new(geometry, detector, gateway, cfg.pipeline_settings());
    let stdout = std::io::stdout();
    let mut emit = |event: &ConfirmedEvent| {
        let line = match event.to_json_line() {
            Ok(line) => line,
            Err(e) => {
                log::error!("failed to encode event for frame {}: {}", event.frame, e);
                return;
            }
        };
        let mut out = stdout.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            log::error!("failed to write event: {}", e);
        }
    };

    let summary = pipeline.run(source.as_mut(), &stop, &mut emit)?;
    log::info!(
        "occupancyd done: {} frame(s) read, {} processed, {} confirmed event(s){}",
        summary.frames_read,
        summary.frames_processed,
        summary.events,
        if summary.stopped { " (stopped)" } else { "" }
    );
    Ok(())
}

fn build_detector(settings: &DetectorSettings) -> Result<SharedBackend> {
    let mut registry = BackendRegistry::new();
    match settings.backend {
        DetectorKind::Replay => {
            let backend = match &settings.replay_path {
                Some(path) => ReplayBackend::open(path)?,
                None => {
                    log::warn!("no detection replay configured; every frame is empty");
                    ReplayBackend::empty()
                }
            };
            registry.register(backend);
        }
        DetectorKind::Tract => {
            #[cfg(feature = "backend-tract")]
            {
                registry.register(seat_occupancy::detect::TractPoseBackend::new(
                    &settings.model_path,
                    settings.input_size,
                )?);
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                return Err(anyhow!(
                    "detector backend tract requires the backend-tract feature (model {})",
                    settings.model_path.display()
                ));
            }
        }
    }

    let backend = registry.person_detector()?;
    {
        let mut guard = backend
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        guard.warm_up().context("detector warm-up")?;
        log::info!("detector backend: {}", guard.name());
    }
    Ok(backend)
}

/// Seat store gateway, falling back to detection-only when the store cannot be used.
fn open_gateway(cfg: &OccupancyConfig) -> PersistenceGateway<SqliteSeatStore> {
    let section = cfg.section();
    let Some(db_path) = cfg.store.db_path.as_deref() else {
        log::info!("no seat store configured; running detection-only");
        return PersistenceGateway::disabled(section);
    };

    let store = match SqliteSeatStore::open(db_path) {
        Ok(store) => store,
        Err(e) => {
            log::warn!("seat store unavailable ({:#}); running detection-only", e);
            return PersistenceGateway::disabled(section);
        }
    };
    let mut gateway = PersistenceGateway::new(store, section);
    if let Err(e) = gateway.warm_cache() {
        log::warn!("seat record cache warm-up failed: {:#}", e);
    }
    log::info!(
        "seat store {} -> {}",
        db_path,
        gateway.section().collection_path()
    );
    gateway
}
