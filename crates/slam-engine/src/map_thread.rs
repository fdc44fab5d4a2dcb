//! The map thread: shifts the local map to the latest registered position,
//! folds a scan into it, and publishes a visualization snapshot.
//!
//! Grounded on `original_source/src/callback/map_thread.h`'s `MapThread`:
//! `go()` stashes the latest `(pos, scan)` and wakes the thread, which wakes,
//! re-checks the activation policy, and either does the shift/update/publish
//! cycle or drops the call silently. The C++ version uses a second mutex as
//! a binary semaphore (`start_mutex_`); a `Mutex` + `Condvar` pair over an
//! `Option<Pending>` is the idiomatic equivalent.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use slam_bridge::{TSDFBridgeMessage, VisualizationSink};
use slam_concurrency::RingBuffer;
use slam_geometry::Point3i;
use slam_globalmap::GlobalMap;
use slam_localmap::LocalMap;
use slam_tsdf::TsdfParams;

struct Pending {
    pos: Point3i,
    scan: Vec<Point3i>,
}

struct State {
    pending: Option<Pending>,
    shutdown: bool,
}

/// Handle the cloud callback thread uses to activate the map thread, and
/// the map thread itself waits on.
pub struct MapThreadHandle {
    state: Mutex<State>,
    cv: std::sync::Condvar,
}

impl MapThreadHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(MapThreadHandle {
            state: Mutex::new(State { pending: None, shutdown: false }),
            cv: std::sync::Condvar::new(),
        })
    }

    /// Stashes the latest position and scan, overwriting any call the map
    /// thread has not yet picked up. Mirrors `MapThread::go`: a call that
    /// arrives faster than the map thread drains is coalesced, not queued.
    pub fn go(&self, pos: Point3i, scan: Vec<Point3i>) {
        let mut guard = self.state.lock().unwrap();
        guard.pending = Some(Pending { pos, scan });
        self.cv.notify_one();
    }

    /// Wakes the map thread one last time so it can observe `shutdown` and
    /// exit its loop even with no pending activation.
    pub fn shutdown(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.shutdown = true;
        self.cv.notify_all();
    }

    fn wait_for_work(&self) -> Option<Pending> {
        let mut guard = self.state.lock().unwrap();
        loop {
            if let Some(pending) = guard.pending.take() {
                return Some(pending);
            }
            if guard.shutdown {
                return None;
            }
            guard = self.cv.wait(guard).unwrap();
        }
    }
}

/// Parameters governing when a stashed `go()` call actually triggers a map
/// update, per spec §4.8's activation policy.
#[derive(Debug, Clone, Copy)]
pub struct ActivationPolicy {
    pub position_threshold_mm: f64,
    /// Activate every `period` registrations regardless of distance moved.
    /// Values below 1 disable the period-based trigger.
    pub period: u64,
}

impl ActivationPolicy {
    fn should_activate(&self, last: Option<Point3i>, pos: Point3i, reg_cnt: u64) -> bool {
        let distance_triggered = match last {
            None => true,
            Some(last) => {
                let delta = pos - last;
                (delta.norm2() as f64).sqrt() > self.position_threshold_mm
            }
        };
        let period_triggered = self.period >= 1 && reg_cnt >= self.period;
        distance_triggered || period_triggered
    }
}

/// Runs the map thread loop until `handle` is shut down or a persistence
/// failure occurs. A persistence failure stops the pipeline (spec §7): the
/// error is returned and `cloud_buffer` is closed so the cloud callback
/// thread unblocks out of its own `pop` and exits too.
pub fn run(
    handle: Arc<MapThreadHandle>,
    local_map: Arc<Mutex<LocalMap>>,
    global_map: Arc<GlobalMap>,
    tsdf_params: TsdfParams,
    policy: ActivationPolicy,
    tau: i32,
    map_resolution: i32,
    viz_sink: Arc<Mutex<dyn VisualizationSink>>,
    cloud_buffer: Arc<dyn Fn() + Send + Sync>,
) -> Result<()> {
    let mut last_activation: Option<Point3i> = None;
    let mut reg_cnt: u64 = 0;

    while let Some(Pending { pos, scan }) = handle.wait_for_work() {
        reg_cnt += 1;
        if !policy.should_activate(last_activation, pos, reg_cnt) {
            continue;
        }
        last_activation = Some(pos);
        reg_cnt = 0;

        let result: Result<()> = (|| {
            // `pos` arrives in millimeters (the same frame as scan points and
            // the activation threshold); the local map is addressed in
            // cells, so the window center needs the same mm->cell
            // conversion the TSDF update applies per point.
            let cell_center = Point3i::new(
                slam_geometry::floor_div(pos.x, map_resolution),
                slam_geometry::floor_div(pos.y, map_resolution),
                slam_geometry::floor_div(pos.z, map_resolution),
            );
            let mut map = local_map.lock().unwrap();
            map.shift(cell_center, &global_map).context("shifting local map window")?;
            slam_tsdf::update(&scan, pos, &tsdf_params, &mut map);
            let snapshot = TSDFBridgeMessage::from_local_map(&map, tau, map_resolution);
            drop(map);
            global_map.write_back().context("writing back global map chunks")?;
            viz_sink.lock().unwrap().publish(snapshot);
            Ok(())
        })();

        if let Err(err) = result {
            tracing::error!(target: "slam_engine::map_thread", ?err, "persistence failure, stopping pipeline");
            cloud_buffer();
            return Err(err);
        }
    }

    tracing::info!(target: "slam_engine::map_thread", "map thread stopped");
    Ok(())
}

/// Type-erased "close my input buffer" callback, so the map thread does not
/// need to know the cloud buffer's element type.
pub fn closer<T: Send + 'static>(buffer: Arc<RingBuffer<T>>) -> Arc<dyn Fn() + Send + Sync> {
    Arc::new(move || buffer.close())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_threshold_triggers_without_period() {
        let policy = ActivationPolicy { position_threshold_mm: 1000.0, period: 0 };
        assert!(policy.should_activate(Some(Point3i::ZERO), Point3i::new(2000, 0, 0), 1));
        assert!(!policy.should_activate(Some(Point3i::ZERO), Point3i::new(100, 0, 0), 1));
    }

    #[test]
    fn period_triggers_regardless_of_distance() {
        let policy = ActivationPolicy { position_threshold_mm: 1_000_000.0, period: 3 };
        assert!(!policy.should_activate(Some(Point3i::ZERO), Point3i::ZERO, 2));
        assert!(policy.should_activate(Some(Point3i::ZERO), Point3i::ZERO, 3));
    }

    #[test]
    fn first_call_always_activates() {
        let policy = ActivationPolicy { position_threshold_mm: 1_000_000.0, period: 0 };
        assert!(policy.should_activate(None, Point3i::ZERO, 1));
    }

    #[test]
    fn shutdown_with_no_pending_work_drains_immediately() {
        let handle = MapThreadHandle::new();
        handle.shutdown();
        assert!(handle.wait_for_work().is_none());
    }

    #[test]
    fn go_coalesces_repeated_calls_before_drain() {
        let handle = MapThreadHandle::new();
        handle.go(Point3i::new(1, 0, 0), vec![Point3i::ZERO]);
        handle.go(Point3i::new(2, 0, 0), vec![Point3i::ZERO, Point3i::ZERO]);
        let pending = handle.wait_for_work().unwrap();
        assert_eq!(pending.pos, Point3i::new(2, 0, 0));
        assert_eq!(pending.scan.len(), 2);
    }
}
