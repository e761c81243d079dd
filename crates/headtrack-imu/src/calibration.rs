use glam::Vec3;
use thiserror::Error;

/// Default number of stationary samples averaged for the gyro bias.
/// At the device's ~1 kHz sample rate this is about half a second of
/// calibration latency, enough to average out sensor noise.
pub const DEFAULT_CALIBRATION_SAMPLES: u32 = 500;

/// The estimator was asked for a bias before enough samples arrived
/// (typically because the transport dropped mid-calibration).
#[derive(Debug, Clone, Copy, Error)]
#[error("calibration incomplete: {collected} of {target} samples collected")]
pub struct CalibrationIncomplete {
    pub collected: u32,
    pub target: u32,
}

/// Gyro bias estimator: averages angular rate over a burst of samples taken
/// while the glasses sit still.
#[derive(Debug)]
pub struct BiasEstimator {
    gyro_sum: Vec3,
    count: u32,
    target: u32,
}

impl BiasEstimator {
    pub fn new(target: u32) -> Self {
        Self {
            gyro_sum: Vec3::ZERO,
            count: 0,
            target: target.max(1),
        }
    }

    /// Accumulate one gyro reading. Returns the finalized bias once the
    /// target count is reached; further pushes are ignored.
    pub fn push(&mut self, gyro: Vec3) -> Option<Vec3> {
        if self.count < self.target {
            self.gyro_sum += gyro;
            self.count += 1;
        }
        self.is_complete().then(|| self.gyro_sum / self.count as f32)
    }

    pub fn is_complete(&self) -> bool {
        self.count >= self.target
    }

    /// Fraction of the target collected, in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        self.count as f32 / self.target as f32
    }

    /// The averaged bias, or `CalibrationIncomplete` if the burst was cut
    /// short. The session never promotes to tracking from that condition.
    pub fn bias(&self) -> Result<Vec3, CalibrationIncomplete> {
        if self.is_complete() {
            Ok(self.gyro_sum / self.count as f32)
        } else {
            Err(CalibrationIncomplete {
                collected: self.count,
                target: self.target,
            })
        }
    }
}
