//! Ray-marching TSDF update: projects a scan into signed-distance samples
//! and merges them into a [`slam_localmap::LocalMap`].
//!
//! Two-phase (stage then merge) by construction: every point, in any
//! shard, in any order, only ever touches a staging buffer; the merge into
//! the live map happens once, after every shard has staged, which is what
//! makes the whole update order-invariant and shardable across `rayon`.

use std::collections::HashMap;

use rayon::prelude::*;
use slam_geometry::{floor_div, Point3i};
use slam_globalmap::TsdfEntry;
use slam_localmap::LocalMap;

/// Parameters that would otherwise be read from `slam_config::MapConfig`;
/// kept as a plain struct here so this crate does not depend on
/// `slam-config`, only on the numbers it needs.
#[derive(Debug, Clone, Copy)]
pub struct TsdfParams {
    pub map_resolution: i32,
    pub tau: i32,
    pub max_weight: i32,
    /// Vertical replication constant driving z-interpolation: millimeters
    /// of ring gap grown per millimeter of ray length, in
    /// [`slam_geometry::MATRIX_RESOLUTION`]-scaled fixed point.
    pub dz_per_distance: i32,
}

const WEIGHT_RESOLUTION: i32 = slam_geometry::WEIGHT_RESOLUTION;

#[derive(Debug, Clone, Copy, Default)]
struct StageEntry {
    value: i32,
    weight: i32,
}

type Staging = HashMap<Point3i, StageEntry>;

/// Updates `map` in place from `scan`, as observed from `scanner`.
///
/// The scan is split into contiguous shards and ray-marched in parallel;
/// shard results are combined with the same closer-to-surface rule used
/// within a shard, so the final staged state does not depend on shard
/// count or point order.
pub fn update(scan: &[Point3i], scanner: Point3i, params: &TsdfParams, map: &mut LocalMap) {
    if scan.is_empty() {
        tracing::warn!(target: "slam_tsdf", "empty scan passed to update, nothing to stage");
        return;
    }
    let shard_count = rayon::current_num_threads().max(1).min(scan.len());
    let shard_len = scan.len().div_ceil(shard_count);
    let (sx, sy, sz) = map.size();
    let d_max = ((sx / 2 + sy / 2 + sz / 2) as f64) * params.map_resolution as f64;

    let staged = scan
        .par_chunks(shard_len.max(1))
        .map(|shard| stage_shard(shard, scanner, params, d_max))
        .reduce(Staging::new, |mut a, b| {
            merge_staging(&mut a, b);
            a
        });

    tracing::debug!(target: "slam_tsdf", points = scan.len(), cells = staged.len(), "staged scan, merging into local map");
    merge_into_map(staged, params, map);
}

fn stage_shard(points: &[Point3i], scanner: Point3i, params: &TsdfParams, d_max: f64) -> Staging {
    let mut staging = Staging::new();
    for &p in points {
        stage_point(p, scanner, params, d_max, &mut staging);
    }
    staging
}

fn stage_point(p: Point3i, scanner: Point3i, params: &TsdfParams, d_max: f64, staging: &mut Staging) {
    let d = p - scanner;
    let dist2 = d.norm2();
    if dist2 == 0 {
        tracing::warn!(target: "slam_tsdf", ?p, "scan point exactly at scanner position, skipping");
        return;
    }
    let dist = (dist2 as f64).sqrt();
    let res = params.map_resolution;
    let tau = params.tau;
    let max_len = (dist + tau as f64).min(d_max);

    let mut prev_cell: Option<Point3i> = None;
    let mut len = res as f64;
    let half_step = res as f64 * 0.5;
    while len <= max_len {
        let t = len / dist;
        let sample = Point3i::new(
            scanner.x + round(d.x as f64 * t),
            scanner.y + round(d.y as f64 * t),
            scanner.z + round(d.z as f64 * t),
        );
        let cell = world_to_cell(sample, res);
        let same_as_prev = prev_cell.map(|c| c == cell).unwrap_or(false);
        prev_cell = Some(cell);
        len += half_step;
        if same_as_prev {
            continue;
        }

        let center = cell_center(cell, res);
        let radial = (p - center).norm();
        let mut v = radial.min(tau as f64).max(0.0) as i32;
        if len > dist {
            v = -v;
        }

        let weight = sample_weight(v, tau);
        if weight == 0 {
            continue;
        }

        let dz = ((params.dz_per_distance as i64 * len as i64)
            / slam_geometry::MATRIX_RESOLUTION) as i32;
        for z_off in -dz..=dz {
            let target = Point3i::new(cell.x, cell.y, cell.z + z_off);
            stage_write(staging, target, v, weight);
        }
    }
}

fn sample_weight(v: i32, tau: i32) -> i32 {
    let epsilon = tau / 10;
    if v >= -epsilon {
        WEIGHT_RESOLUTION
    } else if v <= -tau {
        0
    } else {
        // linear decay from WEIGHT_RESOLUTION at v=-epsilon to 0 at v=-tau
        (WEIGHT_RESOLUTION as i64 * (tau + v) as i64 / (tau - epsilon) as i64) as i32
    }
}

fn stage_write(staging: &mut Staging, cell: Point3i, value: i32, weight: i32) {
    match staging.get(&cell) {
        Some(existing) if existing.weight != 0 && value.abs() >= existing.value.abs() => {}
        _ => {
            staging.insert(cell, StageEntry { value, weight });
        }
    }
}

fn merge_staging(a: &mut Staging, b: Staging) {
    for (cell, entry) in b {
        stage_write(a, cell, entry.value, entry.weight);
    }
}

fn merge_into_map(staged: Staging, params: &TsdfParams, map: &mut LocalMap) {
    for (cell, entry) in staged {
        let Ok(existing) = map.value(cell).copied() else {
            continue; // outside the local map window, nothing to merge into
        };
        let new_weight = existing.weight as i32 + entry.weight;
        if new_weight == 0 {
            continue;
        }
        let merged_value = (existing.value as i64 * existing.weight as i64
            + entry.value as i64 * entry.weight as i64)
            / new_weight as i64;
        let capped_weight = new_weight.min(params.max_weight);
        if let Ok(slot) = map.value_mut(cell) {
            *slot = TsdfEntry::new(merged_value as i16, capped_weight as i16);
        }
    }
}

fn world_to_cell(p: Point3i, res: i32) -> Point3i {
    Point3i::new(floor_div(p.x, res), floor_div(p.y, res), floor_div(p.z, res))
}

fn cell_center(cell: Point3i, res: i32) -> Point3i {
    Point3i::new(
        cell.x * res + res / 2,
        cell.y * res + res / 2,
        cell.z * res + res / 2,
    )
}

fn round(v: f64) -> i32 {
    if v < 0.0 { (v - 0.5) as i32 } else { (v + 0.5) as i32 }
}
