//! Integration tests for spec §8 seed scenarios 3 and 4: register a
//! transformed copy of a scan against a TSDF built from the original, and
//! check the registered result lands close to the original again.
//!
//! Uses a synthetic spherical-shell scan rather than a flat wall, so the
//! TSDF gradient field constrains translation along every axis and
//! rotation about the scanner, instead of leaving part of the
//! Gauss-Newton system under-determined the way a single planar surface
//! would.
//!
//! The named scenarios describe the expected outcome as "T^-1 applied to
//! the transformed scan comes back within 100mm of the original scan",
//! but `register_cloud` (spec §4.6 step 3, mirroring
//! `Registration::register_cloud`/`transform_point_cloud`) already applies
//! its solved transform directly to the scan it mutates in place, and that
//! solved transform is itself read off the map the *un*-shifted scan was
//! staged into, so it is the one that cancels the scan's own injected
//! offset. Checking the already-mutated scan against the original scan is
//! the same check spec §8 describes, without a second hand-rolled
//! inversion step.

use slam_geometry::{FixedTransform, FloatTransform, Point3i};
use slam_globalmap::TsdfEntry;
use slam_imu::ImuAccumulator;
use slam_localmap::LocalMap;
use slam_registration::{register_cloud, RegistrationParams};
use slam_tsdf::TsdfParams;

const RESOLUTION: i32 = 50;
const RADIUS: f64 = 1500.0;
const MAP_MARGIN_MM: f64 = 600.0;

fn tsdf_params() -> TsdfParams {
    TsdfParams { map_resolution: RESOLUTION, tau: 6 * RESOLUTION, max_weight: 100, dz_per_distance: 0 }
}

fn registration_params() -> RegistrationParams {
    RegistrationParams { map_resolution: RESOLUTION, max_iterations: 50, it_weight_gradient: 0.05, epsilon: 1e-3 }
}

/// A deterministic spherical-shell scan, dense enough across all three
/// axes that the Gauss-Newton system is well conditioned for both
/// translation and rotation.
fn sphere_scan() -> Vec<Point3i> {
    let mut scan = Vec::new();
    for i in 1..6 {
        let theta = i as f64 * std::f64::consts::PI / 6.0; // 30, 60, ..., 150 degrees
        for j in 0..8 {
            let phi = j as f64 * std::f64::consts::PI / 4.0; // 0, 45, ..., 315 degrees
            let x = RADIUS * theta.sin() * phi.cos();
            let y = RADIUS * theta.sin() * phi.sin();
            let z = RADIUS * theta.cos();
            scan.push(Point3i::new(x.round() as i32, y.round() as i32, z.round() as i32));
        }
    }
    scan
}

/// Same rotation-matrix construction as `slam_imu`'s private `rotation_z`,
/// duplicated here since it is test-only and that helper isn't public.
fn rotation_z_deg(deg: f64) -> FloatTransform {
    let angle = deg.to_radians();
    let (s, c) = angle.sin_cos();
    let mut t = FloatTransform::identity();
    t.m[0][0] = c;
    t.m[0][1] = -s;
    t.m[1][0] = s;
    t.m[1][1] = c;
    t
}

fn mean_distance(a: &[Point3i], b: &[Point3i]) -> f64 {
    assert_eq!(a.len(), b.len());
    let sum: f64 = a.iter().zip(b).map(|(&p, &q)| (p - q).norm()).sum();
    sum / a.len() as f64
}

fn build_map(scan: &[Point3i]) -> LocalMap {
    let half = ((RADIUS + MAP_MARGIN_MM) / RESOLUTION as f64).ceil() as i32 + 1;
    let size = 2 * half + 1;
    let mut map = LocalMap::new((size, size, size), Point3i::ZERO, TsdfEntry::default());
    slam_tsdf::update(scan, Point3i::ZERO, &tsdf_params(), &mut map);
    map
}

#[test]
fn translation_seed_scenario_recovers_within_100mm() {
    // spec §8 scenario 3: inject T = translate(300mm, 300mm, 0), register
    // the shifted scan against the original's TSDF, expect the registered
    // scan back within 100mm of its original positions.
    let original = sphere_scan();
    let map = build_map(&original);

    let injected = FixedTransform::from_float(&FloatTransform::translation(300.0, 300.0, 0.0));
    let mut scan: Vec<Point3i> = original.iter().map(|&p| injected.apply(p)).collect();

    let imu = ImuAccumulator::new();
    register_cloud(&map, &mut scan, &imu, &registration_params());

    let mean = mean_distance(&scan, &original);
    assert!(mean < 100.0, "mean per-point distance {mean}mm should be below 100mm");
}

#[test]
fn rotation_seed_scenario_recovers_within_100mm() {
    // spec §8 scenario 4: inject T = Rz(5 degrees) about the scanner,
    // register the rotated scan against the original's TSDF, expect the
    // registered scan back within 100mm of its original positions.
    let original = sphere_scan();
    let map = build_map(&original);

    let injected = FixedTransform::from_float(&rotation_z_deg(5.0));
    let mut scan: Vec<Point3i> = original.iter().map(|&p| injected.apply(p)).collect();

    let imu = ImuAccumulator::new();
    register_cloud(&map, &mut scan, &imu, &registration_params());

    let mean = mean_distance(&scan, &original);
    assert!(mean < 100.0, "mean per-point distance {mean}mm should be below 100mm");
}
