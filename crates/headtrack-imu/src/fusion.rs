use crate::types::{ImuSample, Orientation};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Complementary filter coefficients and per-axis gains.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FilterTuning {
    /// Weight of the integrated gyro angle in the fused pitch/roll.
    /// The accelerometer tilt gets the remaining `1 - gyro_weight`.
    pub gyro_weight: f32,
    /// Per-axis gain correcting device-native rate units to degrees.
    /// The three axes differ in sensitivity on this hardware.
    pub pitch_scale: f32,
    pub yaw_scale: f32,
    pub roll_scale: f32,
    /// Minimum accel magnitude to trust the gravity tilt estimate.
    pub accel_rest_threshold: f32,
    /// Steps with a larger time delta skip integration (stream stall).
    pub max_dt_s: f32,
}

impl Default for FilterTuning {
    fn default() -> Self {
        Self {
            gyro_weight: 0.96,
            pitch_scale: 3.0,
            yaw_scale: 60.0,
            roll_scale: 1.0,
            accel_rest_threshold: 0.01,
            max_dt_s: 0.25,
        }
    }
}

/// Orientation integrator fusing gyro integration with accelerometer tilt.
///
/// The gyro is accurate over short spans but drifts; gravity seen by the
/// accelerometer is noisy but drift-free. Pitch and roll blend the two with
/// fixed weights; yaw has no gravity reference and is gyro-only.
#[derive(Debug)]
pub struct ComplementaryFilter {
    tuning: FilterTuning,
    /// Gyro bias from calibration, subtracted from every sample.
    bias: Vec3,
    // Raw fused angles in degrees, before the zero offset.
    pitch: f32,
    yaw: f32,
    roll: f32,
    /// Zero-view reference subtracted from the raw angles.
    zero: Orientation,
    last_timestamp: Option<Instant>,
    skipped_steps: u64,
}

impl ComplementaryFilter {
    pub fn new(bias: Vec3, tuning: FilterTuning) -> Self {
        Self {
            tuning,
            bias,
            pitch: 0.0,
            yaw: 0.0,
            roll: 0.0,
            zero: Orientation::default(),
            last_timestamp: None,
            skipped_steps: 0,
        }
    }

    /// Integrate one bias-corrected sample and return the visible orientation.
    ///
    /// The first sample only establishes the time base. Steps whose delta is
    /// non-positive or larger than `max_dt_s` advance the time base without
    /// integrating, so a stalled stream cannot apply one huge rotation.
    pub fn update(&mut self, sample: &ImuSample) -> Orientation {
        let dt = match self.last_timestamp {
            None => {
                self.last_timestamp = Some(sample.timestamp);
                return self.orientation();
            }
            Some(prev) => sample.timestamp.duration_since(prev).as_secs_f32(),
        };
        self.last_timestamp = Some(sample.timestamp);

        if dt <= 0.0 || dt > self.tuning.max_dt_s {
            self.skipped_steps += 1;
            tracing::debug!(dt_s = dt, "anomalous sample interval, skipping integration step");
            return self.orientation();
        }

        let rate = sample.gyro - self.bias;
        let pitch_gyro = self.pitch + rate.x * self.tuning.pitch_scale * dt;
        let yaw_gyro = self.yaw + rate.y * self.tuning.yaw_scale * dt;
        let roll_gyro = self.roll + rate.z * self.tuning.roll_scale * dt;

        let accel = sample.accel;
        if accel.length() > self.tuning.accel_rest_threshold {
            let pitch_accel = (-accel.x)
                .atan2((accel.y * accel.y + accel.z * accel.z).sqrt())
                .to_degrees();
            let roll_accel = accel.y.atan2(accel.z).to_degrees();

            let w = self.tuning.gyro_weight;
            self.pitch = w * pitch_gyro + (1.0 - w) * pitch_accel;
            self.roll = w * roll_gyro + (1.0 - w) * roll_accel;
        } else {
            // Free fall or dead accelerometer: no usable gravity reference.
            self.pitch = pitch_gyro;
            self.roll = roll_gyro;
        }
        self.yaw = yaw_gyro;

        self.pitch = wrap_degrees(self.pitch);
        self.yaw = wrap_degrees(self.yaw);
        self.roll = wrap_degrees(self.roll);

        self.orientation()
    }

    /// Current orientation relative to the zero reference.
    pub fn orientation(&self) -> Orientation {
        Orientation {
            pitch: wrap_degrees(self.pitch - self.zero.pitch),
            yaw: wrap_degrees(self.yaw - self.zero.yaw),
            roll: wrap_degrees(self.roll - self.zero.roll),
        }
    }

    /// Make the current head pose the new "looking straight ahead".
    pub fn set_zero(&mut self) {
        self.zero = Orientation {
            pitch: self.pitch,
            yaw: self.yaw,
            roll: self.roll,
        };
    }

    pub fn zero_offset(&self) -> Orientation {
        self.zero
    }

    /// Restore a zero reference carried over from a previous filter instance
    /// (recalibration corrects drift, not the user's chosen forward).
    pub fn set_zero_offset(&mut self, zero: Orientation) {
        self.zero = zero;
    }

    /// Integration steps dropped for anomalous time deltas.
    pub fn skipped_steps(&self) -> u64 {
        self.skipped_steps
    }
}

/// Normalize an angle to `(-180, 180]` degrees.
fn wrap_degrees(mut angle: f32) -> f32 {
    while angle > 180.0 {
        angle -= 360.0;
    }
    while angle <= -180.0 {
        angle += 360.0;
    }
    angle
}
