use crate::calibration::BiasEstimator;
use crate::fusion::{ComplementaryFilter, FilterTuning};
use crate::types::{ImuSample, Orientation, StreamStats, TrackerSnapshot, TrackerStatus};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Commands delivered asynchronously into the session. Applied between
/// samples, never mid-sample.
#[derive(Debug, Clone, Copy)]
pub enum TrackerCommand {
    /// Make the current head pose the new zero reference for all three axes.
    ZeroView,
    /// Re-enter calibration, discarding accumulated integration drift.
    /// The zero reference is preserved unless `reset_zero` is set.
    Recalibrate { reset_zero: bool },
}

/// Why a connection's read loop ended. Surfaced to the session as the
/// `Disconnected` transition, never as a process-level failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no data within {0:?} (stream stalled)")]
    Stall(Duration),
    #[error("connection closed by device")]
    Closed,
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),
}

enum Phase {
    Calibrating {
        estimator: BiasEstimator,
        /// Zero reference to install once calibration completes.
        carried_zero: Orientation,
    },
    Tracking {
        filter: ComplementaryFilter,
    },
}

/// Synchronous tracker state machine.
///
/// Owns the calibration/tracking lifecycle and the published snapshot
/// contents. The transport driver feeds it decoded samples and connection
/// events; keeping it free of I/O makes the whole lifecycle testable
/// without a device.
pub struct TrackerSession {
    calibration_target: u32,
    tuning: FilterTuning,
    phase: Phase,
    status: TrackerStatus,
    stats: StreamStats,
}

impl TrackerSession {
    pub fn new(calibration_target: u32, tuning: FilterTuning) -> Self {
        Self {
            calibration_target,
            tuning,
            phase: Phase::Calibrating {
                estimator: BiasEstimator::new(calibration_target),
                carried_zero: Orientation::default(),
            },
            status: TrackerStatus::Connecting,
            stats: StreamStats::default(),
        }
    }

    pub fn status(&self) -> TrackerStatus {
        self.status
    }

    /// A connection attempt is starting (or restarting).
    pub fn begin_connect(&mut self) {
        self.status = TrackerStatus::Connecting;
    }

    /// The transport dropped. Orientation is stale for consumers until a
    /// reconnect and a full recalibration cycle complete; the zero reference
    /// survives so the user keeps their chosen forward direction.
    pub fn connection_lost(&mut self) {
        if self.status == TrackerStatus::Calibrating {
            if let Phase::Calibrating { estimator, .. } = &self.phase {
                if let Err(e) = estimator.bias() {
                    warn!(%e, "disconnected during calibration");
                }
            }
        }
        let carried_zero = self.current_zero();
        self.phase = Phase::Calibrating {
            estimator: BiasEstimator::new(self.calibration_target),
            carried_zero,
        };
        self.status = TrackerStatus::Disconnected;
    }

    /// Feed one decoded sample through calibration or integration.
    pub fn handle_sample(&mut self, sample: &ImuSample) {
        if matches!(
            self.status,
            TrackerStatus::Connecting | TrackerStatus::Disconnected
        ) {
            info!("first sample decoded, starting gyro calibration");
            self.status = TrackerStatus::Calibrating;
        }

        self.stats.samples += 1;
        if self.stats.samples % 1000 == 0 {
            debug!(samples = self.stats.samples, "IMU samples processed");
        }

        match &mut self.phase {
            Phase::Calibrating {
                estimator,
                carried_zero,
            } => {
                if let Some(bias) = estimator.push(sample.gyro) {
                    info!(
                        bias_x = bias.x,
                        bias_y = bias.y,
                        bias_z = bias.z,
                        "gyro calibration complete"
                    );
                    let mut filter = ComplementaryFilter::new(bias, self.tuning);
                    filter.set_zero_offset(*carried_zero);
                    self.phase = Phase::Tracking { filter };
                    self.status = TrackerStatus::Tracking;
                }
            }
            Phase::Tracking { filter } => {
                filter.update(sample);
            }
        }
    }

    pub fn handle_command(&mut self, command: TrackerCommand) {
        match command {
            TrackerCommand::ZeroView => match &mut self.phase {
                Phase::Tracking { filter } => {
                    filter.set_zero();
                    info!("zero reference set");
                }
                Phase::Calibrating { carried_zero, .. } => {
                    // Angles restart at zero after calibration, so zeroing
                    // now means dropping any carried reference.
                    *carried_zero = Orientation::default();
                }
            },
            TrackerCommand::Recalibrate { reset_zero } => {
                let carried_zero = if reset_zero {
                    Orientation::default()
                } else {
                    self.current_zero()
                };
                self.phase = Phase::Calibrating {
                    estimator: BiasEstimator::new(self.calibration_target),
                    carried_zero,
                };
                if self.status == TrackerStatus::Tracking {
                    self.status = TrackerStatus::Calibrating;
                }
                info!(samples = self.calibration_target, "recalibration started");
            }
        }
    }

    /// Count a frame the decoder rejected as malformed.
    pub fn record_malformed(&mut self) {
        self.stats.malformed_frames += 1;
    }

    /// Current published state. Orientation is only exposed while tracking;
    /// every other state reports zeros alongside its status so consumers
    /// never mistake stale angles for live ones.
    pub fn snapshot(&self) -> TrackerSnapshot {
        let orientation = match &self.phase {
            Phase::Tracking { filter } if self.status == TrackerStatus::Tracking => {
                filter.orientation()
            }
            _ => Orientation::default(),
        };
        let calibration_progress = match &self.phase {
            Phase::Calibrating { estimator, .. } if self.status == TrackerStatus::Calibrating => {
                Some(estimator.progress())
            }
            _ => None,
        };
        TrackerSnapshot {
            status: self.status,
            orientation,
            calibration_progress,
            stats: self.stats,
        }
    }

    fn current_zero(&self) -> Orientation {
        match &self.phase {
            Phase::Tracking { filter } => filter.zero_offset(),
            Phase::Calibrating { carried_zero, .. } => *carried_zero,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use std::time::Instant;

    const TARGET: u32 = 5;
    const GRAVITY: Vec3 = Vec3::new(0.0, 0.0, 1.0);

    fn session() -> TrackerSession {
        TrackerSession::new(TARGET, FilterTuning::default())
    }

    fn sample(t0: Instant, ms: u64, gyro: Vec3) -> ImuSample {
        ImuSample {
            timestamp: t0 + Duration::from_millis(ms),
            gyro,
            accel: GRAVITY,
        }
    }

    /// Drive a freshly connected session through a full calibration burst.
    /// Returns the ms offset after the last calibration sample.
    fn calibrate(session: &mut TrackerSession, t0: Instant, start_ms: u64) -> u64 {
        for i in 0..TARGET as u64 {
            session.handle_sample(&sample(t0, start_ms + i, Vec3::ZERO));
        }
        start_ms + TARGET as u64
    }

    #[test]
    fn lifecycle_connecting_calibrating_tracking() {
        let mut session = session();
        let t0 = Instant::now();
        assert_eq!(session.status(), TrackerStatus::Connecting);
        assert!(session.snapshot().calibration_progress.is_none());

        session.handle_sample(&sample(t0, 0, Vec3::ZERO));
        assert_eq!(session.status(), TrackerStatus::Calibrating);
        let progress = session.snapshot().calibration_progress.unwrap();
        assert!((progress - 1.0 / TARGET as f32).abs() < 1e-6);

        for i in 1..TARGET as u64 {
            session.handle_sample(&sample(t0, i, Vec3::ZERO));
        }
        assert_eq!(session.status(), TrackerStatus::Tracking);
        let snap = session.snapshot();
        assert!(snap.calibration_progress.is_none());
        assert_eq!(snap.orientation, Orientation::default());
        assert_eq!(snap.stats.samples, TARGET as u64);
    }

    #[test]
    fn integration_starts_after_calibration_with_bias_applied() {
        let mut session = session();
        let t0 = Instant::now();

        // Calibrate with a constant offset so bias = (0, 0.5, 0).
        for i in 0..TARGET as u64 {
            session.handle_sample(&sample(t0, i, Vec3::new(0.0, 0.5, 0.0)));
        }
        assert_eq!(session.status(), TrackerStatus::Tracking);

        // Continued readings at exactly the bias level integrate to nothing.
        let mut ms = TARGET as u64;
        for _ in 0..100 {
            session.handle_sample(&sample(t0, ms, Vec3::new(0.0, 0.5, 0.0)));
            ms += 1;
        }
        assert!(session.snapshot().orientation.yaw.abs() < 1e-3);

        // A rate above the bias is what actually turns the head.
        for _ in 0..100 {
            session.handle_sample(&sample(t0, ms, Vec3::new(0.0, 1.5, 0.0)));
            ms += 1;
        }
        // 100 steps of (1.5 - 0.5) * 60 deg/unit * 0.001 s = 6 deg.
        let yaw = session.snapshot().orientation.yaw;
        assert!((yaw - 6.0).abs() < 0.1, "yaw {yaw}");
    }

    #[test]
    fn recalibrate_runs_full_cycle_and_preserves_zero() {
        let mut session = session();
        let t0 = Instant::now();
        let mut ms = calibrate(&mut session, t0, 0);

        // Turn the head, then zero the view there.
        for _ in 0..200 {
            session.handle_sample(&sample(t0, ms, Vec3::new(0.0, 1.0, 0.0)));
            ms += 1;
        }
        session.handle_command(TrackerCommand::ZeroView);
        let zeroed = session.snapshot().orientation;
        assert!(zeroed.yaw.abs() < 1e-4);

        session.handle_command(TrackerCommand::Recalibrate { reset_zero: false });
        assert_eq!(session.status(), TrackerStatus::Calibrating);
        assert_eq!(session.snapshot().orientation, Orientation::default());

        // Tracking resumes only after a full new burst.
        for i in 0..TARGET as u64 - 1 {
            session.handle_sample(&sample(t0, ms + i, Vec3::ZERO));
            assert_eq!(session.status(), TrackerStatus::Calibrating);
        }
        ms += TARGET as u64 - 1;
        session.handle_sample(&sample(t0, ms, Vec3::ZERO));
        assert_eq!(session.status(), TrackerStatus::Tracking);

        // Integration restarted from zero angles while the zero reference
        // survived, so the view reads as minus the old zero offset.
        let yaw = session.snapshot().orientation.yaw;
        // 200 steps of 1.0 * 60 * 0.001 = 12 deg of zero offset.
        assert!((yaw + 12.0).abs() < 0.1, "yaw {yaw}");
    }

    #[test]
    fn recalibrate_with_zeroing_clears_reference() {
        let mut session = session();
        let t0 = Instant::now();
        let mut ms = calibrate(&mut session, t0, 0);

        for _ in 0..200 {
            session.handle_sample(&sample(t0, ms, Vec3::new(0.0, 1.0, 0.0)));
            ms += 1;
        }
        session.handle_command(TrackerCommand::ZeroView);
        session.handle_command(TrackerCommand::Recalibrate { reset_zero: true });
        calibrate(&mut session, t0, ms);

        assert_eq!(session.status(), TrackerStatus::Tracking);
        assert!(session.snapshot().orientation.yaw.abs() < 1e-4);
    }

    #[test]
    fn zero_view_during_calibration_drops_carried_reference() {
        let mut session = session();
        let t0 = Instant::now();
        let mut ms = calibrate(&mut session, t0, 0);

        for _ in 0..200 {
            session.handle_sample(&sample(t0, ms, Vec3::new(0.0, 1.0, 0.0)));
            ms += 1;
        }
        session.handle_command(TrackerCommand::ZeroView);
        session.handle_command(TrackerCommand::Recalibrate { reset_zero: false });
        // Mid-calibration zeroing discards the carried offset.
        session.handle_command(TrackerCommand::ZeroView);
        calibrate(&mut session, t0, ms);

        assert!(session.snapshot().orientation.yaw.abs() < 1e-4);
    }

    #[test]
    fn disconnect_mid_calibration_restarts_burst() {
        let mut session = session();
        let t0 = Instant::now();

        for i in 0..3u64 {
            session.handle_sample(&sample(t0, i, Vec3::ZERO));
        }
        assert_eq!(session.status(), TrackerStatus::Calibrating);

        session.connection_lost();
        let snap = session.snapshot();
        assert_eq!(snap.status, TrackerStatus::Disconnected);
        assert!(snap.calibration_progress.is_none());

        session.begin_connect();
        assert_eq!(session.status(), TrackerStatus::Connecting);

        // The burst starts over: progress reflects one sample, not four.
        session.handle_sample(&sample(t0, 10, Vec3::ZERO));
        let progress = session.snapshot().calibration_progress.unwrap();
        assert!((progress - 1.0 / TARGET as f32).abs() < 1e-6);
    }

    #[test]
    fn disconnect_while_tracking_flags_stale_and_keeps_zero() {
        let mut session = session();
        let t0 = Instant::now();
        let mut ms = calibrate(&mut session, t0, 0);

        for _ in 0..200 {
            session.handle_sample(&sample(t0, ms, Vec3::new(0.0, 1.0, 0.0)));
            ms += 1;
        }
        session.handle_command(TrackerCommand::ZeroView);

        session.connection_lost();
        let snap = session.snapshot();
        assert_eq!(snap.status, TrackerStatus::Disconnected);
        assert_eq!(snap.orientation, Orientation::default());

        // Reconnect and recalibrate; the old zero still applies.
        session.begin_connect();
        calibrate(&mut session, t0, ms);
        assert_eq!(session.status(), TrackerStatus::Tracking);
        let yaw = session.snapshot().orientation.yaw;
        assert!((yaw + 12.0).abs() < 0.1, "yaw {yaw}");
    }

    #[test]
    fn commands_accepted_while_disconnected() {
        let mut session = session();
        session.connection_lost();

        session.handle_command(TrackerCommand::Recalibrate { reset_zero: false });
        session.handle_command(TrackerCommand::ZeroView);
        assert_eq!(session.status(), TrackerStatus::Disconnected);
    }

    #[test]
    fn malformed_frames_counted() {
        let mut session = session();
        session.record_malformed();
        session.record_malformed();
        assert_eq!(session.snapshot().stats.malformed_frames, 2);
    }
}
