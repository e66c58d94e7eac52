use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Booking rules the validator and state machine enforce.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingPolicy {
    /// Longest admissible booking (default: 480 = 8 hours)
    pub max_duration_minutes: u64,

    /// Tokens per hour for machines without a custom cost (default: 1)
    pub default_token_cost: u64,

    /// Whether an owner may cancel their own approved booking (default: admins only)
    pub owner_may_cancel_approved: bool,
}

impl BookingPolicy {
    pub fn max_duration_ms(&self) -> i64 {
        i64::try_from(self.max_duration_minutes.saturating_mul(60_000)).unwrap_or(i64::MAX)
    }
}

impl Default for BookingPolicy {
    fn default() -> Self {
        BookingPolicy {
            max_duration_minutes: 8 * 60,
            default_token_cost: 1,
            owner_may_cancel_approved: false,
        }
    }
}

/// Configuration for the facility-booking CLI and engine
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path (default: `.facility-booking/` in current directory)
    pub data_dir: PathBuf,

    /// Output format: "human" (default) or "json"
    pub output_format: String,

    /// Log level filter: "info", "debug", "warn", "error" (default: "info")
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,

    pub policy: BookingPolicy,
}

impl Config {
    /// Create a new config with defaults
    pub fn new() -> Self {
        let data_dir = env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".facility-booking");

        Config {
            data_dir,
            output_format: "human".to_string(),
            log_level: "info".to_string(),
            log_json: false,
            policy: BookingPolicy::default(),
        }
    }

    /// Create config with custom data directory
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Config {
            data_dir,
            ..Config::new()
        }
    }

    pub fn get_data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn set_data_dir(&mut self, dir: PathBuf) {
        self.data_dir = dir;
    }

    pub fn get_output_format(&self) -> &str {
        &self.output_format
    }

    /// Set output format ("human" or "json")
    pub fn set_output_format(&mut self, format: String) {
        self.output_format = format;
    }

    pub fn get_log_level(&self) -> &str {
        &self.log_level
    }

    pub fn set_log_level(&mut self, level: String) {
        self.log_level = level;
    }

    /// Get command log path
    pub fn get_command_log_path(&self) -> PathBuf {
        self.data_dir.join("commands.log")
    }

    /// Get state snapshot path
    pub fn get_state_path(&self) -> PathBuf {
        self.data_dir.join("state.bin")
    }

    /// Load config from environment variables
    ///
    /// Environment variables:
    /// - `FACILITY_BOOKING_DATA_DIR`: override data directory
    /// - `FACILITY_BOOKING_OUTPUT_FORMAT`: "human" or "json"
    /// - `FACILITY_BOOKING_LOG_LEVEL`: log level
    /// - `FACILITY_BOOKING_LOG_JSON`: "1"/"true" for JSON logs
    /// - `FACILITY_BOOKING_MAX_DURATION_MINUTES`: booking duration cap
    /// - `FACILITY_BOOKING_DEFAULT_TOKEN_COST`: fallback tokens per hour
    /// - `FACILITY_BOOKING_OWNER_MAY_CANCEL_APPROVED`: "1"/"true"
    pub fn from_env() -> Result<Self> {
        let mut config = Config::new();

        if let Ok(dir) = env::var("FACILITY_BOOKING_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(format) = env::var("FACILITY_BOOKING_OUTPUT_FORMAT") {
            config.output_format = format;
        }

        if let Ok(level) = env::var("FACILITY_BOOKING_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(v) = env::var("FACILITY_BOOKING_LOG_JSON") {
            config.log_json = parse_flag(&v);
        }

        if let Ok(v) = env::var("FACILITY_BOOKING_MAX_DURATION_MINUTES") {
            config.policy.max_duration_minutes = parse_positive("FACILITY_BOOKING_MAX_DURATION_MINUTES", &v)?;
        }

        if let Ok(v) = env::var("FACILITY_BOOKING_DEFAULT_TOKEN_COST") {
            config.policy.default_token_cost = parse_positive("FACILITY_BOOKING_DEFAULT_TOKEN_COST", &v)?;
        }

        if let Ok(v) = env::var("FACILITY_BOOKING_OWNER_MAY_CANCEL_APPROVED") {
            config.policy.owner_may_cancel_approved = parse_flag(&v);
        }

        Ok(config)
    }
}

fn parse_flag(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_positive(name: &str, v: &str) -> Result<u64> {
    match v.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config(format!("{} must be a positive integer, got {:?}", name, v))),
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::new();
        assert_eq!(config.output_format, "human");
        assert_eq!(config.log_level, "info");
        assert!(!config.log_json);
        assert!(config.data_dir.ends_with(".facility-booking"));
        assert_eq!(config.policy.max_duration_minutes, 480);
        assert_eq!(config.policy.default_token_cost, 1);
        assert!(!config.policy.owner_may_cancel_approved);
    }

    #[test]
    fn test_config_paths() {
        let config = Config::new();
        assert!(config.get_command_log_path().ends_with("commands.log"));
        assert!(config.get_state_path().ends_with("state.bin"));
    }

    #[test]
    fn test_config_setters() {
        let mut config = Config::new();
        config.set_output_format("json".to_string());
        assert_eq!(config.get_output_format(), "json");

        config.set_log_level("debug".to_string());
        assert_eq!(config.get_log_level(), "debug");
    }

    #[test]
    fn test_max_duration_ms() {
        assert_eq!(BookingPolicy::default().max_duration_ms(), 8 * 3_600_000);
    }

    #[test]
    fn test_parse_helpers() {
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag("0"));
        assert_eq!(parse_positive("X", " 6 ").unwrap(), 6);
        assert!(parse_positive("X", "0").is_err());
        assert!(parse_positive("X", "six").is_err());
    }
}
