//! Runtime settings for the sensor and collector roles.
//!
//! Defaults match a single sensor and collector on loopback.  The binary
//! fills these from command-line flags; tests build them directly.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::timer::TimerConfig;

pub const DEFAULT_COLLECTOR_ADDR: &str = "127.0.0.1:5005";

/// Parse a probability flag, accepting only finite values in `[0, 1]`.
pub fn parse_probability(s: &str) -> Result<f64, String> {
    let p: f64 = s.parse().map_err(|e| format!("{s:?} is not a number: {e}"))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{p} is not a probability in [0, 1]"))
    }
}

/// Bound `p` to `[0, 1]`; NaN counts as never.
pub(crate) fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

fn default_collector_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5005))
}

/// Settings for one simulated sensor device.
#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub device_id: u16,
    /// Where frames are sent.
    pub collector: SocketAddr,
    /// Local address to bind; port 0 lets the OS pick.
    pub bind: SocketAddr,
    /// Fold each tick's readings into one frame instead of one frame each.
    pub batching: bool,
    /// Period of the reading loop.
    pub data_interval: Duration,
    /// Minimum quiet time before a heartbeat is sent.
    pub heartbeat_interval: Duration,
    /// Chance that a tick produces readings rather than staying quiet.
    pub data_probability: f64,
    /// Upper bound on readings generated per tick.
    pub max_readings: usize,
    pub timers: TimerConfig,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            device_id: 1,
            collector: default_collector_addr(),
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            batching: true,
            data_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(5),
            data_probability: 0.8,
            max_readings: 3,
            timers: TimerConfig::default(),
        }
    }
}

/// Settings for the collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub bind: SocketAddr,
    /// Live CSV, appended and flushed per frame.
    pub log_path: PathBuf,
    /// CSV written at shutdown, ordered by sensor timestamp.
    pub sorted_path: PathBuf,
    pub timers: TimerConfig,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            bind: default_collector_addr(),
            log_path: PathBuf::from("Telemetry_Results.csv"),
            sorted_path: PathBuf::from("Telemetry_Results_sorted.csv"),
            timers: TimerConfig::default(),
        }
    }
}
