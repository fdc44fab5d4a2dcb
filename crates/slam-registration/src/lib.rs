//! Scan-to-TSDF registration: a Gauss-Newton solve that aligns a point
//! cloud to the current local map, seeded by the IMU's accumulated
//! delta-rotation.
//!
//! Grounded on `original_source/src/registration/registration.cpp`:
//! `register_cloud` takes the IMU prior once under its mutex before the
//! optimization loop runs, and `xi_to_transform` is the same exponential
//! map used here (formula 3.9, "Truncated Signed Distance Fields Applied
//! To Robotics").

mod error;
mod gauss_newton;

pub use error::{RegistrationError, Result};

use rayon::prelude::*;

use slam_geometry::{FixedTransform, FloatTransform, Point3i};
use slam_imu::ImuAccumulator;
use slam_localmap::LocalMap;

/// Parameters mirroring `slam_config::RegistrationConfig`, kept local so
/// this crate does not depend on `slam-config`.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationParams {
    pub map_resolution: i32,
    pub max_iterations: u32,
    pub it_weight_gradient: f64,
    pub epsilon: f64,
}

/// Aligns `scan` to `map`, seeded by the IMU accumulator's current delta
/// rotation. On return, `scan` has been transformed in place by the
/// recovered pose so downstream consumers (the map thread's TSDF update)
/// see the registered cloud.
///
/// A degenerate or numerically unstable solve never propagates: it is
/// logged and the identity transform is returned, per the error taxonomy's
/// "registration failed, log" policy — callers always get a usable pose.
pub fn register_cloud(
    map: &LocalMap,
    scan: &mut [Point3i],
    imu: &ImuAccumulator,
    params: &RegistrationParams,
) -> FloatTransform {
    let t0 = imu.reset();

    let transform = match gauss_newton::solve(map, scan, &t0, params) {
        Ok(t) => t,
        Err(err) => {
            tracing::warn!(target: "slam_registration", ?err, "registration failed, using identity");
            FloatTransform::identity()
        }
    };

    transform_point_cloud(scan, &transform);
    transform
}

/// Applies `transform` to every point of `scan`, in place, sharded across
/// `rayon`'s thread pool. Mirrors `Registration::transform_point_cloud`'s
/// `#pragma omp parallel for` over the cloud.
pub fn transform_point_cloud(scan: &mut [Point3i], transform: &FloatTransform) {
    let fixed = FixedTransform::from_float(transform);
    scan.par_iter_mut().for_each(|p| {
        if !p.is_invalid() {
            *p = fixed.apply(*p);
        }
    });
}
