use glam::Vec3;
use std::time::Instant;

/// One decoded reading from the glasses' IMU.
///
/// The timestamp is taken locally at decode time; the device clock is not
/// usable for integration.
#[derive(Debug, Clone, Copy)]
pub struct ImuSample {
    /// Local monotonic arrival time.
    pub timestamp: Instant,
    /// Angular rate, device-native units. Axes map to (pitch, yaw, roll) rate.
    pub gyro: Vec3,
    /// Linear acceleration, device-native units, gravity included.
    pub accel: Vec3,
}

/// Head orientation in degrees, relative to the zero reference.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Orientation {
    /// Up/down (nodding).
    pub pitch: f32,
    /// Left/right (head turns).
    pub yaw: f32,
    /// Head tilt.
    pub roll: f32,
}

/// Lifecycle state of the tracker as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerStatus {
    /// No connection yet (or reconnecting).
    Connecting,
    /// Connected, collecting stationary samples for gyro bias.
    Calibrating,
    /// Calibrated and integrating; orientation is live.
    Tracking,
    /// Transport lost; orientation is stale until reconnect + recalibration.
    Disconnected,
}

/// Session-lifetime stream counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamStats {
    /// Samples decoded and fed to calibration or integration.
    pub samples: u64,
    /// Frames skipped by the decoder's structural sanity checks.
    pub malformed_frames: u64,
}

/// Latest published tracker state. Read via [`crate::HeadTracker::snapshot`]
/// without blocking the ingestion task.
#[derive(Debug, Clone, Copy)]
pub struct TrackerSnapshot {
    pub status: TrackerStatus,
    /// All zeros unless `status == Tracking`.
    pub orientation: Orientation,
    /// Fraction of calibration samples collected, while `Calibrating`.
    pub calibration_progress: Option<f32>,
    pub stats: StreamStats,
}

impl Default for TrackerSnapshot {
    fn default() -> Self {
        Self {
            status: TrackerStatus::Connecting,
            orientation: Orientation::default(),
            calibration_progress: None,
            stats: StreamStats::default(),
        }
    }
}
