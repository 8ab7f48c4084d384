use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for env var {name}: {value}")]
    InvalidEnv { name: String, value: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub autostart: AutostartConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Game REST API base URL (no trailing slash).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Requests allowed per rate-limit window.
    #[serde(default = "default_calls")]
    pub calls_per_period: usize,
    /// Length of the rate-limit window in seconds.
    #[serde(default = "default_period")]
    pub period_secs: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Back-off used when a 429 carries no usable Retry-After header.
    #[serde(default = "default_retry_after")]
    pub default_retry_after_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Simple-form tracker file (`name,uuid`).
    #[serde(default = "default_tracker_file")]
    pub tracker_file: String,
    /// Extended-form tracker file (per-character stat snapshots).
    #[serde(default = "default_advanced_tracker_file")]
    pub advanced_tracker_file: String,
    /// Combat level world scans look around.
    #[serde(default = "default_target_level")]
    pub target_level: u32,
    /// Allowed distance from `target_level`.
    #[serde(default = "default_level_range")]
    pub level_range: u32,
    /// Region prefixes swept by the server scan, e.g. ["EU", "NA", "AS"].
    #[serde(default = "default_server_regions")]
    pub server_regions: Vec<String>,
    #[serde(default = "default_servers_per_region")]
    pub servers_per_region: u32,
    /// Lower bound for the stat comparer interval.
    #[serde(default = "default_min_compare_interval")]
    pub min_compare_interval_secs: u64,
}

/// Loops the binary starts at boot. Everything is off unless configured.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutostartConfig {
    #[serde(default)]
    pub player_tracker_interval_secs: Option<u64>,
    #[serde(default)]
    pub worlds: Vec<String>,
    #[serde(default)]
    pub world_interval_secs: Option<u64>,
    #[serde(default)]
    pub compare_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_base_url() -> String {
    "https://api.wynncraft.com/v3".to_string()
}
fn default_calls() -> usize {
    95
}
fn default_period() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    10
}
fn default_retry_after() -> u64 {
    5
}
fn default_tracker_file() -> String {
    "tracker.txt".to_string()
}
fn default_advanced_tracker_file() -> String {
    "advanced_tracker.txt".to_string()
}
fn default_target_level() -> u32 {
    26
}
fn default_level_range() -> u32 {
    10
}
fn default_server_regions() -> Vec<String> {
    vec!["EU".to_string(), "NA".to_string(), "AS".to_string()]
}
fn default_servers_per_region() -> u32 {
    20
}
fn default_min_compare_interval() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            calls_per_period: default_calls(),
            period_secs: default_period(),
            request_timeout_secs: default_request_timeout(),
            default_retry_after_secs: default_retry_after(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracker_file: default_tracker_file(),
            advanced_tracker_file: default_advanced_tracker_file(),
            target_level: default_target_level(),
            level_range: default_level_range(),
            server_regions: default_server_regions(),
            servers_per_region: default_servers_per_region(),
            min_compare_interval_secs: default_min_compare_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ApiConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults plus environment overrides (no file needed).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Overlay values from `lookup`. Split out from `apply_env` so tests do
    /// not have to mutate the process environment.
    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("WYNN_API_URL") {
            self.api.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("CALLS") {
            self.api.calls_per_period = parse_env("CALLS", &v)?;
        }
        if let Some(v) = lookup("PERIOD") {
            self.api.period_secs = parse_env("PERIOD", &v)?;
        }
        if let Some(v) = lookup("TARGET_LEVEL") {
            self.tracker.target_level = parse_env("TARGET_LEVEL", &v)?;
        }
        if let Some(v) = lookup("LEVEL_RANGE") {
            self.tracker.level_range = parse_env("LEVEL_RANGE", &v)?;
        }
        if let Some(v) = lookup("SERVERS_PER_REGION") {
            self.tracker.servers_per_region = parse_env("SERVERS_PER_REGION", &v)?;
        }
        if let Some(v) = lookup("SERVER_REGIONS") {
            self.tracker.server_regions = v
                .split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect();
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}
