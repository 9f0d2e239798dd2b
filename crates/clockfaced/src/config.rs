use std::path::PathBuf;

use chrono::NaiveTime;
use clockface_core::{ShiftWindows, TimeWindow};

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the descriptor encryption key file.
    pub key_path: PathBuf,
    /// Expected descriptor vector length.
    pub descriptor_dim: usize,
    /// Euclidean distance below which a descriptor match is accepted.
    pub distance_threshold: f32,
    /// Similarity at or above which a fallback image match is accepted.
    pub fallback_threshold: f32,
    /// Seconds between identification attempts.
    pub identify_cooldown_secs: u64,
    /// Seconds the Complete screen is shown before returning to idle.
    pub complete_reset_secs: u64,
    /// Seconds the Rejected screen is shown before returning to idle.
    pub rejected_reset_secs: u64,
    /// Per-shift clock windows.
    pub windows: ShiftWindows,
}

impl Config {
    /// Load configuration from `CLOCKFACE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("clockface");

        let db_path = std::env::var("CLOCKFACE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));
        let key_path = std::env::var("CLOCKFACE_KEY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("descriptor.key"));

        let defaults = ShiftWindows::default();
        Self {
            db_path,
            key_path,
            descriptor_dim: env_usize("CLOCKFACE_DESCRIPTOR_DIM", clockface_core::DESCRIPTOR_DIM),
            distance_threshold: env_f32(
                "CLOCKFACE_DISTANCE_THRESHOLD",
                clockface_core::matcher::DISTANCE_ACCEPT_THRESHOLD,
            ),
            fallback_threshold: env_f32(
                "CLOCKFACE_FALLBACK_THRESHOLD",
                clockface_core::fallback::FALLBACK_ACCEPT_THRESHOLD,
            ),
            identify_cooldown_secs: env_u64("CLOCKFACE_IDENTIFY_COOLDOWN_SECS", 3),
            complete_reset_secs: env_u64("CLOCKFACE_COMPLETE_RESET_SECS", 3),
            rejected_reset_secs: env_u64("CLOCKFACE_REJECTED_RESET_SECS", 4),
            windows: ShiftWindows {
                morning: env_window("CLOCKFACE_MORNING_WINDOW", defaults.morning),
                afternoon: env_window("CLOCKFACE_AFTERNOON_WINDOW", defaults.afternoon),
            },
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_window(key: &str, default: TimeWindow) -> TimeWindow {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_window(&v))
        .unwrap_or(default)
}

/// Parse a `HH:MM-HH:MM` window, start inclusive and end exclusive.
fn parse_window(spec: &str) -> Option<TimeWindow> {
    let (start, end) = spec.split_once('-')?;
    let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
    let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
    Some(TimeWindow::new(start, end))
}
