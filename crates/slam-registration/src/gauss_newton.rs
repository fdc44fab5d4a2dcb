//! The Gauss-Newton inner loop: linearizes the TSDF error at the scan's
//! projected points and solves for a pose refinement each iteration.

use slam_geometry::{floor_div, FixedTransform, FloatTransform, Point3i};
use slam_localmap::LocalMap;

use crate::error::{RegistrationError, Result};
use crate::RegistrationParams;

const AXES: [Point3i; 3] =
    [Point3i { x: 1, y: 0, z: 0 }, Point3i { x: 0, y: 1, z: 0 }, Point3i { x: 0, y: 0, z: 1 }];

/// Accumulated linear system for one Gauss-Newton iteration.
struct Accumulator {
    h: [[f64; 6]; 6],
    b: [f64; 6],
    err: f64,
    count: u32,
}

impl Accumulator {
    fn new() -> Self {
        Accumulator { h: [[0.0; 6]; 6], b: [0.0; 6], err: 0.0, count: 0 }
    }

    fn add(&mut self, j: [f64; 6], value: f64) {
        for r in 0..6 {
            self.b[r] += j[r] * value;
            for c in 0..6 {
                self.h[r][c] += j[r] * j[c];
            }
        }
        self.err += value.abs();
        self.count += 1;
    }

    fn regularize(&mut self, alpha: f64) {
        if alpha == 0.0 {
            return;
        }
        let diag = alpha * self.count as f64;
        for i in 0..6 {
            self.h[i][i] += diag;
        }
    }
}

pub fn solve(
    map: &LocalMap,
    scan: &[Point3i],
    t0: &FloatTransform,
    params: &RegistrationParams,
) -> Result<FloatTransform> {
    let mut t = *t0;
    let mut err_history: Vec<f64> = Vec::with_capacity(params.max_iterations as usize);

    for iteration in 0..params.max_iterations {
        let fixed = FixedTransform::from_float(&t);
        let acc = accumulate(map, scan, &fixed, params.map_resolution);

        if acc.count == 0 {
            if iteration == 0 {
                return Err(RegistrationError::DegenerateScan);
            }
            break;
        }

        let mut acc = acc;
        acc.regularize(params.it_weight_gradient * iteration as f64);

        let Some(xi) = solve6(acc.h, acc.b.map(|v| -v)) else {
            if iteration == 0 {
                return Err(RegistrationError::Singular { iteration });
            }
            break;
        };
        if xi.iter().any(|v| !v.is_finite()) {
            if iteration == 0 {
                return Err(RegistrationError::NonFinite { iteration });
            }
            break;
        }

        let delta = exponential_map(xi);
        t = delta.mul(&t);

        err_history.push(acc.err);
        if converged(&err_history, params.epsilon) {
            break;
        }
    }

    Ok(t)
}

fn accumulate(map: &LocalMap, scan: &[Point3i], fixed: &FixedTransform, map_resolution: i32) -> Accumulator {
    let mut acc = Accumulator::new();
    for &p in scan {
        if p.is_invalid() {
            continue;
        }
        let transformed = fixed.apply(p);
        let cell = world_to_cell(transformed, map_resolution);
        let Ok(entry) = map.value(cell) else { continue };
        if entry.weight == 0 {
            continue;
        }

        let Some(gradient) = tsdf_gradient(map, cell) else { continue };
        let cross = transformed.cross_f64(gradient);
        let j = [cross.0, cross.1, cross.2, gradient.0, gradient.1, gradient.2];
        acc.add(j, entry.value as f64);
    }
    acc
}

fn tsdf_gradient(map: &LocalMap, cell: Point3i) -> Option<(f64, f64, f64)> {
    let mut g = [0.0f64; 3];
    for (axis_idx, axis) in AXES.iter().enumerate() {
        let plus = map.value(cell + *axis).ok().copied();
        let minus = map.value(cell - *axis).ok().copied();
        if let (Some(p), Some(m)) = (plus, minus) {
            if p.weight != 0 && m.weight != 0 && same_sign(p.value, m.value) {
                g[axis_idx] = (p.value as f64 - m.value as f64) / 2.0;
            }
        }
    }
    Some((g[0], g[1], g[2]))
}

fn same_sign(a: i16, b: i16) -> bool {
    a.signum() == b.signum()
}

fn world_to_cell(p: Point3i, resolution: i32) -> Point3i {
    Point3i::new(floor_div(p.x, resolution), floor_div(p.y, resolution), floor_div(p.z, resolution))
}

/// `err_i` is `err_history.last()`. Compares it against the value two and
/// four iterations back, per spec: a four-deep window with only two
/// comparisons, chosen to damp oscillation-triggered false stops.
fn converged(err_history: &[f64], epsilon: f64) -> bool {
    let n = err_history.len();
    if n < 5 {
        return false;
    }
    let last = err_history[n - 1];
    (last - err_history[n - 3]).abs() < epsilon && (last - err_history[n - 5]).abs() < epsilon
}

/// Solves `xi` for the 6x6 exponential-map coordinates (rotation then
/// translation) via Gaussian elimination with partial pivoting. `None` on a
/// numerically singular system.
fn solve6(mut a: [[f64; 6]; 6], mut b: [f64; 6]) -> Option<[f64; 6]> {
    for col in 0..6 {
        let pivot_row = (col..6).max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))?;
        if a[pivot_row][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        let pivot = a[col][col];
        for k in col..6 {
            a[col][k] /= pivot;
        }
        b[col] /= pivot;

        for row in 0..6 {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..6 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    Some(b)
}

/// Exponential map from a 6-vector (rotation part then translation part) to
/// a 4x4 transform, per "Truncated Signed Distance Fields Applied To
/// Robotics" formula 3.9 (matching `Registration::xi_to_transform`).
fn exponential_map(xi: [f64; 6]) -> FloatTransform {
    let omega = (xi[0], xi[1], xi[2]);
    let theta = (omega.0 * omega.0 + omega.1 * omega.1 + omega.2 * omega.2).sqrt();

    let mut t = FloatTransform::identity();
    if theta < 1e-8 {
        // small-angle form: R ~= I + L
        t.m[0][1] = -omega.2;
        t.m[0][2] = omega.1;
        t.m[1][0] = omega.2;
        t.m[1][2] = -omega.0;
        t.m[2][0] = -omega.1;
        t.m[2][1] = omega.0;
    } else {
        let l = (omega.0 / theta, omega.1 / theta, omega.2 / theta);
        let skew = [[0.0, -l.2, l.1], [l.2, 0.0, -l.0], [-l.1, l.0, 0.0]];
        let skew2 = mat3_mul(&skew, &skew);
        let (s, c) = theta.sin_cos();
        for r in 0..3 {
            for col in 0..3 {
                let identity = if r == col { 1.0 } else { 0.0 };
                t.m[r][col] = identity + s * skew[r][col] + (1.0 - c) * skew2[r][col];
            }
        }
    }
    t.m[0][3] = xi[3];
    t.m[1][3] = xi[4];
    t.m[2][3] = xi[5];
    t
}

fn mat3_mul(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for r in 0..3 {
        for c in 0..3 {
            out[r][c] = (0..3).map(|k| a[r][k] * b[k][c]).sum();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solve6_identity_system() {
        let mut a = [[0.0; 6]; 6];
        for i in 0..6 {
            a[i][i] = 1.0;
        }
        let b = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let x = solve6(a, b).unwrap();
        assert_eq!(x, b);
    }

    #[test]
    fn solve6_singular_returns_none() {
        let a = [[0.0; 6]; 6];
        let b = [1.0; 6];
        assert!(solve6(a, b).is_none());
    }

    #[test]
    fn exponential_map_zero_is_identity() {
        let t = exponential_map([0.0; 6]);
        assert_eq!(t, FloatTransform::identity());
    }

    #[test]
    fn exponential_map_pure_translation() {
        let t = exponential_map([0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        assert_eq!(t.translation_vec(), (1.0, 2.0, 3.0));
    }

    #[test]
    fn converged_needs_five_samples() {
        assert!(!converged(&[0.0, 0.0, 0.0, 0.0], 1e-6));
        assert!(converged(&[5.0, 5.0, 5.0, 5.0, 5.0], 1e-6));
    }
}
