//! Entrypoint: wires the concurrency fabric together and runs the
//! cloud-callback/map-thread pipeline until a shutdown signal arrives.
//!
//! Grounded on the teacher's `ox-bin::AppStartup` (logging setup, panic
//! hook, `clap` args) and `original_source/src/application.cpp` (which
//! component owns which buffer, the blocking `sigwait` shutdown gate).

mod cloud_callback;
mod map_thread;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use slam_bridge::{RingCloudSource, RingVisualizationSink, VisualizationSink};
use slam_concurrency::RingBuffer;
use slam_geometry::FloatTransform;
use slam_globalmap::GlobalMap;
use slam_imu::ImuAccumulator;
use slam_localmap::LocalMap;
use slam_registration::RegistrationParams;
use slam_tsdf::TsdfParams;

use map_thread::{ActivationPolicy, MapThreadHandle};

/// The original hardcodes this filename in `Application::run()` rather than
/// making it configurable; kept the same way here.
const GLOBAL_MAP_PATH: &str = "GlobalMap.sled";
const DEFAULT_CONFIG_PATH: &str = "slam-engine.toml";

#[derive(Parser, Debug)]
#[command(name = "slam-engine", version, about = "Realtime LiDAR+IMU TSDF SLAM engine")]
struct Args {
    /// Path to the TOML configuration file. Everything the engine needs —
    /// ports, buffer sizes, registration/map/bridge parameters — is read
    /// from here, not from further CLI flags.
    #[arg(long = "config")]
    config: Option<PathBuf>,
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        AppStartup { log_guard: None }
    }

    fn configure_logging(&mut self) {
        let log_dir = Path::new(".");
        let file_appender = tracing_appender::rolling::never(log_dir, "slam-engine.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(_) => self.log_guard = Some(guard),
            Err(_) => {
                // a subscriber is already installed (e.g. under a test harness)
            }
        }
    }

    fn install_panic_hook() {
        static HOOK: std::sync::Once = std::sync::Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "slam_engine::panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

fn main() {
    let mut startup = AppStartup::new();
    startup.configure_logging();
    AppStartup::install_panic_hook();

    match run() {
        Ok(()) => {
            tracing::info!(target: "slam_engine", "shutdown complete");
            std::process::exit(0);
        }
        Err(err) => {
            tracing::error!(target: "slam_engine", ?err, "fatal error");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<()> {
    tracing::info!(target: "slam_engine", "startup");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = slam_config::load_from(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let default_value = (config.slam.max_distance / config.slam.map_resolution.max(1)) as i16;
    let default_weight = config.slam.initial_map_weight as i16;
    let global_map = Arc::new(
        GlobalMap::open(Path::new(GLOBAL_MAP_PATH), default_value, default_weight)
            .context("opening global map store")?,
    );

    let default_entry = slam_globalmap::TsdfEntry::new(default_value, default_weight);
    let local_map = Arc::new(Mutex::new(LocalMap::new(
        (config.slam.map_size_x, config.slam.map_size_y, config.slam.map_size_z),
        slam_geometry::Point3i::ZERO,
        default_entry,
    )));

    let pose = Arc::new(Mutex::new(FloatTransform::identity()));
    let imu = Arc::new(ImuAccumulator::new());

    let cloud_buffer = Arc::new(RingBuffer::new(config.lidar_buffer_size));
    let cloud_source: Box<dyn slam_bridge::CloudSource> =
        Box::new(RingCloudSource::new(cloud_buffer.clone()));

    let viz_buffer = Arc::new(RingBuffer::new(2));
    let viz_sink: Arc<Mutex<dyn VisualizationSink>> =
        Arc::new(Mutex::new(RingVisualizationSink::new(viz_buffer)));

    let map_thread_handle = MapThreadHandle::new();

    let tsdf_params = TsdfParams {
        map_resolution: config.slam.map_resolution,
        tau: config.slam.tau,
        max_weight: config.slam.max_weight,
        dz_per_distance: 0,
    };
    let policy = ActivationPolicy {
        position_threshold_mm: config.slam.position_threshold as f64,
        period: config.slam.period,
    };
    let registration_params = RegistrationParams {
        map_resolution: config.slam.map_resolution,
        max_iterations: config.registration.max_iterations,
        it_weight_gradient: config.registration.it_weight_gradient,
        epsilon: config.registration.epsilon,
    };

    tracing::info!(target: "slam_engine", "starting worker threads");

    let map_thread_join = {
        let handle = map_thread_handle.clone();
        let local_map = local_map.clone();
        let global_map = global_map.clone();
        let viz_sink = viz_sink.clone();
        let cloud_buffer_closer = map_thread::closer(cloud_buffer.clone());
        let map_resolution = config.slam.map_resolution;
        let tau = config.slam.tau;
        std::thread::Builder::new()
            .name("map-thread".into())
            .spawn(move || {
                map_thread::run(
                    handle,
                    local_map,
                    global_map,
                    tsdf_params,
                    policy,
                    tau,
                    map_resolution,
                    viz_sink,
                    cloud_buffer_closer,
                )
            })
            .context("spawning map thread")?
    };

    let cloud_callback_join = {
        let local_map = local_map.clone();
        let global_map = global_map.clone();
        let imu = imu.clone();
        let pose = pose.clone();
        let map_thread_handle = map_thread_handle.clone();
        std::thread::Builder::new()
            .name("cloud-callback".into())
            .spawn(move || {
                cloud_callback::run(
                    cloud_source,
                    local_map,
                    global_map,
                    imu,
                    pose,
                    map_thread_handle,
                    registration_params,
                )
            })
            .context("spawning cloud callback thread")?
    };

    // The signal wait runs on its own thread rather than blocking `main`
    // directly: a fatal error inside either worker thread (e.g. a chunk
    // persistence failure in the map thread, or a pose-history write
    // failure in the cloud callback) must unwind to `main` immediately
    // rather than wait for an operator to send SIGINT, per spec §7 ("fatal
    // conditions unwind to main"). Each worker already cascades shutdown to
    // the other on its own error path; this thread only needs to cover the
    // operator-initiated path.
    spawn_signal_watcher(cloud_buffer.clone(), map_thread_handle.clone())
        .context("spawning signal watcher thread")?;

    tracing::info!(target: "slam_engine", "started, waiting for shutdown signal or worker exit");

    let cloud_callback_result = cloud_callback_join
        .join()
        .map_err(|_| anyhow::anyhow!("cloud callback thread panicked"))?;
    let map_thread_result = map_thread_join
        .join()
        .map_err(|_| anyhow::anyhow!("map thread panicked"))?;

    global_map.write_back().context("final global map flush")?;

    cloud_callback_result.and(map_thread_result)
}

/// Spawns a detached thread that blocks on SIGINT/SIGTERM, mirroring the
/// original's blocking `sigwait` on a signal set blocked at startup, and on
/// receipt runs the same shutdown sequence a fatal worker error would
/// trigger itself: close the cloud buffer and wake the map thread so both
/// worker threads observe the shutdown and their `main`-side `join` calls
/// return. Not joined: once either worker thread exits (cleanly or via
/// error), `main` proceeds regardless of whether a signal ever arrives, and
/// the process exits via `std::process::exit`, tearing this thread down
/// with it.
fn spawn_signal_watcher(
    cloud_buffer: Arc<RingBuffer<slam_concurrency::Stamped<slam_bridge::PointCloud>>>,
    map_thread_handle: Arc<MapThreadHandle>,
) -> std::io::Result<()> {
    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])?;
    std::thread::Builder::new().name("signal-watcher".into()).spawn(move || {
        if signals.forever().next().is_some() {
            tracing::info!(target: "slam_engine", "shutdown signal received, stopping pipeline");
            cloud_buffer.close();
            map_thread_handle.shutdown();
        }
    })?;
    Ok(())
}
