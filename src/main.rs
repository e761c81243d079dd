use anyhow::Result;
use headtrack_config::AppConfig;
use headtrack_imu::{HeadTracker, TrackerStatus};
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xreal_headtrack=info,headtrack_imu=info".into()),
        )
        .init();

    info!("XReal head tracking daemon starting");

    let config = headtrack_config::load_config().unwrap_or_else(|e| {
        warn!(?e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    let tracker = HeadTracker::spawn(config.tracker);

    // Poll the published snapshot at 10 Hz; log status transitions and a
    // once-a-second orientation line while tracking.
    let mut poll = tokio::time::interval(Duration::from_millis(100));
    let mut last_status: Option<TrackerStatus> = None;
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = poll.tick() => {
                let snap = tracker.snapshot();

                if last_status != Some(snap.status) {
                    match snap.status {
                        TrackerStatus::Calibrating => {
                            info!("Calibrating, keep the glasses still");
                        }
                        status => info!(?status, "Tracker status changed"),
                    }
                    last_status = Some(snap.status);
                }

                ticks += 1;
                if ticks % 10 != 0 {
                    continue;
                }
                match snap.status {
                    TrackerStatus::Calibrating => {
                        if let Some(progress) = snap.calibration_progress {
                            info!(percent = (progress * 100.0) as u32, "Calibration progress");
                        }
                    }
                    TrackerStatus::Tracking => {
                        info!(
                            pitch = format!("{:+7.2}", snap.orientation.pitch),
                            yaw = format!("{:+7.2}", snap.orientation.yaw),
                            roll = format!("{:+7.2}", snap.orientation.roll),
                            samples = snap.stats.samples,
                            "Orientation"
                        );
                    }
                    _ => {}
                }
            }
            _ = signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
