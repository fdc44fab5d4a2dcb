//! The cloud callback thread: drains registered scans off the cloud
//! source, aligns each to the local map, folds the result into the running
//! pose, and hands the scan onward to the map thread.
//!
//! Grounded on `original_source/src/callback/cloud_callback.h`'s
//! `CloudCallback::callback()` loop and `preprocess_scan`.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

use slam_bridge::CloudSource;
use slam_geometry::{FloatTransform, Point3i};
use slam_globalmap::GlobalMap;
use slam_imu::ImuAccumulator;
use slam_localmap::LocalMap;
use slam_registration::{register_cloud, RegistrationParams};

use crate::map_thread::MapThreadHandle;

/// Drops sentinel and origin-return points, the two markers a LiDAR driver
/// uses for "no measurement here" (spec §4.7 step 2, `original_source`'s
/// `Preprocessing::preprocess_scan` trims the same way before the points
/// ever reach registration).
fn preprocess_scan(points: Vec<Point3i>) -> Vec<Point3i> {
    points
        .into_iter()
        .filter(|p| !p.is_invalid() && *p != Point3i::ZERO)
        .collect()
}

/// Runs the cloud callback loop until `cloud_source` is drained and closed,
/// or a pose persistence failure occurs.
///
/// Returning `Ok(())` after the source is drained is the normal shutdown
/// path (spec §7 "buffer closed"): no error, just an empty `Option` from
/// `recv()`. A failure to append to the global map's pose history is a
/// persistence failure (spec §7): fatal, and it wakes the map thread (which
/// would otherwise block forever waiting on a `go()` that will never come)
/// before unwinding to `main`.
pub fn run(
    mut cloud_source: Box<dyn CloudSource>,
    local_map: Arc<Mutex<LocalMap>>,
    global_map: Arc<GlobalMap>,
    imu: Arc<ImuAccumulator>,
    pose: Arc<Mutex<FloatTransform>>,
    map_thread: Arc<MapThreadHandle>,
    params: RegistrationParams,
) -> Result<()> {
    let mut pose_index = global_map.pose_count();

    loop {
        let Some(stamped) = cloud_source.recv() else {
            tracing::info!(target: "slam_engine::cloud_callback", "cloud source closed, stopping");
            return Ok(());
        };

        let mut scan = preprocess_scan(stamped.payload.points);
        if scan.is_empty() {
            tracing::warn!(target: "slam_engine::cloud_callback", "scan had no valid points after preprocessing, dropping");
            continue;
        }

        let t_scan = {
            let map = local_map.lock().unwrap();
            register_cloud(&map, &mut scan, &imu, &params)
        };

        let pos = {
            let mut current = pose.lock().unwrap();
            *current = t_scan.mul(&current);
            if let Err(err) = global_map.save_pose(pose_index, &current) {
                tracing::error!(target: "slam_engine::cloud_callback", ?err, "persistence failure, stopping pipeline");
                map_thread.shutdown();
                return Err(err).context("appending to pose history");
            }
            pose_index += 1;
            let (tx, ty, tz) = current.translation_vec();
            Point3i::new(tx.round() as i32, ty.round() as i32, tz.round() as i32)
        };
        tracing::debug!(target: "slam_engine::cloud_callback", ?pos, "pose updated");

        map_thread.go(pos, scan);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_drops_zero_and_invalid_points() {
        let points = vec![Point3i::ZERO, Point3i::INVALID, Point3i::new(1, 2, 3)];
        let scan = preprocess_scan(points);
        assert_eq!(scan, vec![Point3i::new(1, 2, 3)]);
    }

    #[test]
    fn preprocess_of_all_invalid_scan_is_empty() {
        let points = vec![Point3i::ZERO, Point3i::INVALID];
        assert!(preprocess_scan(points).is_empty());
    }
}
