use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub media: MediaConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub priority: PriorityConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: Option<u16>,
    pub unix_socket: Option<PathBuf>,
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub root: PathBuf,
    #[serde(default)]
    pub announce: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriorityConfig {
    #[serde(default = "default_prioritize_below")]
    pub prioritize_below: f64,
    #[serde(default = "default_keep_above")]
    pub keep_above: f64,
    #[serde(default = "default_release_above")]
    pub release_above: f64,
    #[serde(default = "default_critical_divisor")]
    pub critical_divisor: u32,
    #[serde(default = "default_rollback_on_allocation_failure")]
    pub rollback_on_allocation_failure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_status_debounce_ms")]
    pub status_debounce_ms: u64,
    #[serde(default = "default_status_heartbeat_ms")]
    pub status_heartbeat_ms: u64,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
    #[serde(default = "default_rollout_spacing_secs")]
    pub rollout_spacing_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_console")]
    pub console: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
        }
    }
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            prioritize_below: default_prioritize_below(),
            keep_above: default_keep_above(),
            release_above: default_release_above(),
            critical_divisor: default_critical_divisor(),
            rollback_on_allocation_failure: default_rollback_on_allocation_failure(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            status_debounce_ms: default_status_debounce_ms(),
            status_heartbeat_ms: default_status_heartbeat_ms(),
            stats_interval_secs: default_stats_interval_secs(),
            rollout_spacing_secs: default_rollout_spacing_secs(),
        }
    }
}

impl ScheduleConfig {
    pub fn status_debounce(&self) -> Duration {
        Duration::from_millis(self.status_debounce_ms)
    }

    pub fn status_heartbeat(&self) -> Duration {
        Duration::from_millis(self.status_heartbeat_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn rollout_spacing(&self) -> Duration {
        Duration::from_secs(self.rollout_spacing_secs)
    }
}

// Default value functions
fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_num_threads() -> usize {
    num_cpus::get()
}

fn default_prioritize_below() -> f64 {
    0.5
}

fn default_keep_above() -> f64 {
    0.9
}

fn default_release_above() -> f64 {
    0.8
}

fn default_critical_divisor() -> u32 {
    8
}

fn default_rollback_on_allocation_failure() -> bool {
    true
}

fn default_status_debounce_ms() -> u64 {
    500
}

fn default_status_heartbeat_ms() -> u64 {
    1000
}

fn default_stats_interval_secs() -> u64 {
    5
}

fn default_rollout_spacing_secs() -> u64 {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_console() -> bool {
    false
}

fn is_fraction(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .context("Failed to parse config file")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate server config
        if self.server.port.is_none() && self.server.unix_socket.is_none() {
            bail!("Either port or unix_socket must be specified in server config");
        }

        if let Some(port) = self.server.port {
            if port == 0 {
                bail!("Server port must be greater than 0");
            }
        }

        if self.server.num_threads == 0 {
            bail!("num_threads must be greater than 0");
        }

        // Validate media config
        if self.media.root.as_os_str().is_empty() {
            bail!("media root must not be empty");
        }

        // Validate priority config
        for (name, value) in [
            ("prioritize_below", self.priority.prioritize_below),
            ("keep_above", self.priority.keep_above),
            ("release_above", self.priority.release_above),
        ] {
            if !is_fraction(value) {
                bail!("{} must be between 0 and 1, got {}", name, value);
            }
        }

        if self.priority.critical_divisor == 0 {
            bail!("critical_divisor must be greater than 0");
        }

        // Validate schedule config
        if self.schedule.status_debounce_ms == 0 {
            bail!("status_debounce_ms must be greater than 0");
        }

        if self.schedule.status_heartbeat_ms == 0 {
            bail!("status_heartbeat_ms must be greater than 0");
        }

        if self.schedule.stats_interval_secs == 0 {
            bail!("stats_interval_secs must be greater than 0");
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            );
        }

        let valid_formats = ["json", "console"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            bail!(
                "Invalid log format '{}'. Must be one of: json, console",
                self.logging.format
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [server]
        port = 9090

        [media]
        root = "/tmp/media"

        [logging]
    "#;

    #[test]
    fn test_load_repository_config() {
        let path = PathBuf::from("config.toml");
        let config = Config::from_file(&path).expect("Failed to load config");

        assert_eq!(config.server.port, Some(9090));
        assert_eq!(config.schedule.rollout_spacing_secs, 15);
        assert!(config.priority.rollback_on_allocation_failure);
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();

        assert_eq!(config.server.host, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(config.stream.host, IpAddr::from([127, 0, 0, 1]));
        assert!(config.media.announce.is_empty());
        assert_eq!(config.priority.prioritize_below, 0.5);
        assert_eq!(config.priority.keep_above, 0.9);
        assert_eq!(config.priority.release_above, 0.8);
        assert_eq!(config.priority.critical_divisor, 8);
        assert_eq!(config.schedule.status_debounce(), Duration::from_millis(500));
        assert_eq!(config.schedule.status_heartbeat(), Duration::from_secs(1));
        assert_eq!(config.schedule.stats_interval(), Duration::from_secs(5));
        assert_eq!(config.schedule.rollout_spacing(), Duration::from_secs(15));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_requires_listener() {
        let content = MINIMAL.replace("port = 9090", "");
        assert!(Config::from_toml(&content).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let content = format!("{MINIMAL}\n[priority]\nkeep_above = 1.5\n");
        let err = Config::from_toml(&content).unwrap_err();
        assert!(err.to_string().contains("keep_above"));
    }

    #[test]
    fn test_rejects_zero_divisor() {
        let content = format!("{MINIMAL}\n[priority]\ncritical_divisor = 0\n");
        assert!(Config::from_toml(&content).is_err());
    }

    #[test]
    fn test_rejects_bad_log_format() {
        let content = MINIMAL.replace("[logging]", "[logging]\nformat = \"xml\"");
        assert!(Config::from_toml(&content).is_err());
    }

    #[test]
    fn test_zero_rollout_spacing_allowed() {
        let content = format!("{MINIMAL}\n[schedule]\nrollout_spacing_secs = 0\n");
        let config = Config::from_toml(&content).unwrap();
        assert_eq!(config.schedule.rollout_spacing(), Duration::ZERO);
    }
}
