pub mod calibration;
pub mod fusion;
pub mod protocol;
pub mod session;
pub mod types;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use calibration::{BiasEstimator, CalibrationIncomplete, DEFAULT_CALIBRATION_SAMPLES};
pub use fusion::{ComplementaryFilter, FilterTuning};
pub use protocol::{FrameSchema, ProtocolError, StreamDecoder};
pub use session::{TrackerCommand, TrackerSession, TransportError};
pub use types::{ImuSample, Orientation, StreamStats, TrackerSnapshot, TrackerStatus};

/// TCP endpoint and liveness policy for the glasses link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Budget for establishing the TCP connection.
    pub connect_timeout_ms: u64,
    /// A device that sends nothing for this long is treated as stalled;
    /// distinguishes a dead stream from one that is momentarily quiet.
    pub read_timeout_ms: u64,
    /// Pause between reconnect attempts.
    pub reconnect_delay_ms: u64,
    /// Keep retrying after transport loss.
    pub auto_reconnect: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        // The glasses expose the IMU on a link-local address over the
        // USB network interface.
        Self {
            host: "169.254.2.1".into(),
            port: 52998,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 2_000,
            reconnect_delay_ms: 1_000,
            auto_reconnect: true,
        }
    }
}

/// Everything the tracker needs at construction. Variant devices are
/// supported by substituting configuration, not code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub connection: ConnectionConfig,
    pub frame: FrameSchema,
    pub filter: FilterTuning,
    /// Stationary samples averaged for the gyro bias.
    pub calibration_samples: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            frame: FrameSchema::default(),
            filter: FilterTuning::default(),
            calibration_samples: DEFAULT_CALIBRATION_SAMPLES,
        }
    }
}

/// Client handle for the head tracker.
///
/// Owns a background task that connects to the glasses, decodes the IMU
/// stream, runs calibration and the complementary filter, and publishes the
/// latest snapshot. The handle reads that snapshot without ever blocking the
/// ingestion side, at whatever rate the consumer polls.
pub struct HeadTracker {
    snapshot_rx: watch::Receiver<TrackerSnapshot>,
    command_tx: mpsc::UnboundedSender<TrackerCommand>,
    _task: JoinHandle<()>,
}

impl HeadTracker {
    /// Start the tracker. Never fails: connection problems (including the
    /// very first attempt) surface through the snapshot status, and the task
    /// keeps retrying while `auto_reconnect` is set.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: TrackerConfig) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(TrackerSnapshot::default());
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(tracker_task(config, snapshot_tx, command_rx));

        Self {
            snapshot_rx,
            command_tx,
            _task: task,
        }
    }

    /// Tracker handle for development without glasses connected: reports
    /// `Tracking` with identity orientation and ignores commands.
    pub fn mock() -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(TrackerSnapshot {
            status: TrackerStatus::Tracking,
            ..TrackerSnapshot::default()
        });
        let (command_tx, _command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            // Keep the sender alive so the snapshot stays readable.
            let _tx = snapshot_tx;
            std::future::pending::<()>().await;
        });
        Self {
            snapshot_rx,
            command_tx,
            _task: task,
        }
    }

    /// Latest published orientation and status (non-blocking).
    pub fn snapshot(&self) -> TrackerSnapshot {
        *self.snapshot_rx.borrow()
    }

    /// Make the current head pose the zero reference. Applied at the next
    /// processed sample.
    pub fn zero_view(&self) {
        let _ = self.command_tx.send(TrackerCommand::ZeroView);
    }

    /// Restart gyro bias calibration, keeping the zero reference.
    pub fn recalibrate(&self) {
        let _ = self
            .command_tx
            .send(TrackerCommand::Recalibrate { reset_zero: false });
    }

    /// Restart calibration and drop the zero reference as well.
    pub fn recalibrate_and_zero(&self) {
        let _ = self
            .command_tx
            .send(TrackerCommand::Recalibrate { reset_zero: true });
    }
}

enum LoopExit {
    /// Every client handle is gone; shut the task down.
    ClientDropped,
    Transport(TransportError),
}

/// Background task: connect, ingest, reconnect.
async fn tracker_task(
    config: TrackerConfig,
    snapshot_tx: watch::Sender<TrackerSnapshot>,
    mut command_rx: mpsc::UnboundedReceiver<TrackerCommand>,
) {
    let mut session = TrackerSession::new(config.calibration_samples, config.filter);
    let connect_timeout = Duration::from_millis(config.connection.connect_timeout_ms);
    let reconnect_delay = Duration::from_millis(config.connection.reconnect_delay_ms);
    let addr = format!("{}:{}", config.connection.host, config.connection.port);

    loop {
        session.begin_connect();
        let _ = snapshot_tx.send(session.snapshot());
        info!(%addr, "connecting to IMU");

        match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                info!(%addr, "connected to IMU");
                match run_connection(stream, &config, &mut session, &snapshot_tx, &mut command_rx)
                    .await
                {
                    LoopExit::ClientDropped => return,
                    LoopExit::Transport(err) => warn!(%err, "IMU connection lost"),
                }
            }
            Ok(Err(e)) => warn!(%e, %addr, "IMU connect failed"),
            Err(_) => warn!(?connect_timeout, %addr, "IMU connect timed out"),
        }

        session.connection_lost();
        let _ = snapshot_tx.send(session.snapshot());

        if !config.connection.auto_reconnect {
            return;
        }

        // Wait out the retry delay, still servicing commands.
        let deadline = tokio::time::Instant::now() + reconnect_delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                cmd = command_rx.recv() => match cmd {
                    Some(cmd) => {
                        session.handle_command(cmd);
                        let _ = snapshot_tx.send(session.snapshot());
                    }
                    None => return,
                },
            }
        }
    }
}

/// Read loop for one live connection. Suspension happens only at the
/// bounded-timeout read; decode and integration are synchronous.
async fn run_connection(
    mut stream: TcpStream,
    config: &TrackerConfig,
    session: &mut TrackerSession,
    snapshot_tx: &watch::Sender<TrackerSnapshot>,
    command_rx: &mut mpsc::UnboundedReceiver<TrackerCommand>,
) -> LoopExit {
    let mut decoder = StreamDecoder::new(config.frame.clone());
    let read_timeout = Duration::from_millis(config.connection.read_timeout_ms);
    let mut buf = [0u8; 4096];

    loop {
        tokio::select! {
            result = tokio::time::timeout(read_timeout, stream.read(&mut buf)) => {
                match result {
                    Err(_) => return LoopExit::Transport(TransportError::Stall(read_timeout)),
                    Ok(Ok(0)) => return LoopExit::Transport(TransportError::Closed),
                    Ok(Err(e)) => return LoopExit::Transport(TransportError::Io(e)),
                    Ok(Ok(n)) => {
                        decoder.push_bytes(&buf[..n]);
                        while let Some(decoded) = decoder.next_sample() {
                            match decoded {
                                Ok(sample) => session.handle_sample(&sample),
                                Err(e) if e.is_malformed() => {
                                    session.record_malformed();
                                    tracing::debug!(%e, "skipping malformed frame");
                                }
                                Err(e) => tracing::trace!(%e, "skipping non-sensor message"),
                            }
                        }
                        let _ = snapshot_tx.send(session.snapshot());
                    }
                }
            }
            cmd = command_rx.recv() => match cmd {
                Some(cmd) => {
                    session.handle_command(cmd);
                    let _ = snapshot_tx.send(session.snapshot());
                }
                None => return LoopExit::ClientDropped,
            },
        }
    }
}
