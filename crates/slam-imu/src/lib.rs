//! Short-horizon integrator of angular rate, producing a delta-rotation
//! prior consumed once per registration.
//!
//! Mirrors `original_source/src/registration/imu_accumulator.h`: a single
//! internal mutex guards the accumulated transform and the last-seen
//! timestamp, and `reset()` is the only way to read the accumulated value
//! back out, atomically clearing it in the same step.

use std::fmt;
use std::sync::Mutex;

use slam_geometry::FloatTransform;

/// A single IMU reading. Only `angular_rate` feeds the accumulator;
/// `linear_accel`/`mag` are carried through for downstream consumers
/// (e.g. a future gravity-aligned initializer) per the data model, but are
/// unused here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    pub angular_rate: (f64, f64, f64),
    pub linear_accel: (f64, f64, f64),
    pub mag: (f64, f64, f64),
}

impl ImuSample {
    pub fn from_angular_rate(x: f64, y: f64, z: f64) -> Self {
        ImuSample { angular_rate: (x, y, z), linear_accel: (0.0, 0.0, 0.0), mag: (0.0, 0.0, 0.0) }
    }
}

struct State {
    acc_transform: FloatTransform,
    last_ts: Option<f64>,
}

pub struct ImuAccumulator {
    state: Mutex<State>,
}

impl Default for ImuAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ImuAccumulator {
    pub fn new() -> Self {
        ImuAccumulator {
            state: Mutex::new(State { acc_transform: FloatTransform::identity(), last_ts: None }),
        }
    }

    /// Integrates one sample taken at `ts` seconds. The first call in the
    /// accumulator's lifetime (or since the last [`ImuAccumulator::reset`])
    /// only records the timestamp: there is no previous sample to derive
    /// `dt` from.
    pub fn update(&self, sample: ImuSample, ts: f64) {
        let mut state = self.state.lock().unwrap();
        let Some(last_ts) = state.last_ts else {
            tracing::debug!(target: "slam_imu", ts, "first imu sample, recording timestamp only");
            state.last_ts = Some(ts);
            return;
        };
        let dt = ts - last_ts;
        if dt <= 0.0 {
            tracing::warn!(target: "slam_imu", ts, last_ts, "non-monotonic imu timestamp, skipping sample");
            return;
        }
        let (wx, wy, wz) = sample.angular_rate;
        let delta = rotation_x(wx * dt).mul(&rotation_y(wy * dt)).mul(&rotation_z(wz * dt));
        state.acc_transform = delta.mul(&state.acc_transform);
        state.last_ts = Some(ts);
    }

    /// Atomically returns the accumulated transform and resets it to
    /// identity. Called exactly once per registration, before the
    /// Gauss-Newton loop starts, so registration never holds this lock
    /// during optimization.
    pub fn reset(&self) -> FloatTransform {
        let mut state = self.state.lock().unwrap();
        let out = state.acc_transform;
        state.acc_transform = FloatTransform::identity();
        out
    }

    pub fn peek(&self) -> FloatTransform {
        self.state.lock().unwrap().acc_transform
    }
}

impl fmt::Display for ImuAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.peek();
        write!(f, "ImuAccumulator(translation={:?})", t.translation_vec())
    }
}

fn rotation_x(angle: f64) -> FloatTransform {
    let mut m = FloatTransform::identity();
    let (s, c) = angle.sin_cos();
    m.m[1][1] = c;
    m.m[1][2] = -s;
    m.m[2][1] = s;
    m.m[2][2] = c;
    m
}

fn rotation_y(angle: f64) -> FloatTransform {
    let mut m = FloatTransform::identity();
    let (s, c) = angle.sin_cos();
    m.m[0][0] = c;
    m.m[0][2] = s;
    m.m[2][0] = -s;
    m.m[2][2] = c;
    m
}

fn rotation_z(angle: f64) -> FloatTransform {
    let mut m = FloatTransform::identity();
    let (s, c) = angle.sin_cos();
    m.m[0][0] = c;
    m.m[0][1] = -s;
    m.m[1][0] = s;
    m.m[1][1] = c;
    m
}
