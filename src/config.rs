use serde::Deserialize;
use std::{fmt, time::Duration};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    #[serde(default)]
    pub camera: CameraConfig,
    pub inference: InferenceConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Config {
    pub fn get_shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

#[derive(Clone, Deserialize, Debug)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: i32,
    #[serde(default = "default_frame_side")]
    pub frame_width: i32,
    #[serde(default = "default_frame_side")]
    pub frame_height: i32,
    #[serde(default = "default_read_retry_ms")]
    pub read_retry_ms: u64,
}

fn default_frame_side() -> i32 {
    640
}

fn default_read_retry_ms() -> u64 {
    10
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            frame_width: default_frame_side(),
            frame_height: default_frame_side(),
            read_retry_ms: default_read_retry_ms(),
        }
    }
}

impl CameraConfig {
    pub fn get_frame_size(&self) -> opencv::core::Size {
        opencv::core::Size::new(self.frame_width, self.frame_height)
    }

    pub fn get_read_retry_delay(&self) -> Duration {
        Duration::from_millis(self.read_retry_ms)
    }
}

#[derive(Deserialize, Clone)]
pub struct InferenceConfig {
    pub base_url: String,
    pub model_id: String,
    pub api_key: String,
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_period_ms() -> u64 {
    500
}

fn default_timeout_ms() -> u64 {
    5000
}

impl InferenceConfig {
    /// Endpoint without the access key, safe to log.
    pub fn get_endpoint(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.model_id)
    }

    pub fn get_request_url(&self) -> String {
        format!("{}?api_key={}", self.get_endpoint(), self.api_key)
    }

    pub fn get_period(&self) -> Duration {
        Duration::from_millis(self.period_ms.max(1))
    }

    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl fmt::Debug for InferenceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceConfig")
            .field("base_url", &self.base_url)
            .field("model_id", &self.model_id)
            .field("api_key", &"<redacted>")
            .field("period_ms", &self.period_ms)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct DisplayConfig {
    #[serde(default = "default_window_title")]
    pub window_title: String,
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,
}

fn default_window_title() -> String {
    "Sleep Detection".to_string()
}

fn default_refresh_ms() -> u64 {
    15
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window_title: default_window_title(),
            refresh_ms: default_refresh_ms(),
        }
    }
}

impl DisplayConfig {
    pub fn get_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("SD")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    config.try_deserialize::<Config>()
}
