use headtrack_imu::TrackerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Connection, wire schema, filter tuning and calibration settings.
    pub tracker: TrackerConfig,
}
