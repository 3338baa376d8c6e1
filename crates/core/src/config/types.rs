use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::orchestrator::OrchestratorConfig;
use crate::queue::QueueConfig;
use crate::stream::StreamConfig;
use crate::suite::SuiteConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub suite: SuiteConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub interpreter: InterpreterConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("testpilot.db")
}

/// Browser automation sidecar configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriverConfig {
    /// Base URL of the automation sidecar (e.g., "http://localhost:9300")
    #[serde(default = "default_driver_url")]
    pub url: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            url: default_driver_url(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_driver_url() -> String {
    "http://127.0.0.1:9300".to_string()
}

fn default_timeout() -> u32 {
    30
}

/// Available step interpreter backends
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterpreterBackend {
    /// Rule-based keyword interpreter, no external service.
    #[default]
    Keyword,
    /// Remote interpretation service.
    Http,
}

/// Step interpreter configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InterpreterConfig {
    #[serde(default)]
    pub backend: InterpreterBackend,
    /// Service URL (required when backend = "http")
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            backend: InterpreterBackend::default(),
            url: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub orchestrator: OrchestratorConfig,
    pub stream: SanitizedStreamConfig,
    pub suite: SuiteConfig,
    pub driver: DriverConfig,
    pub interpreter: InterpreterConfig,
}

/// Stream config with the token secret hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStreamConfig {
    pub fps: f64,
    pub min_interval_ms: u64,
    pub max_width: u32,
    pub max_height: u32,
    pub jpeg_quality: u8,
    pub failure_rate_threshold: f64,
    pub min_samples: u32,
    pub cooldown_ms: u64,
    pub token_secret_configured: bool,
    pub token_ttl_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let stream = &config.stream;
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            queue: config.queue.clone(),
            orchestrator: config.orchestrator.clone(),
            stream: SanitizedStreamConfig {
                fps: stream.fps,
                min_interval_ms: stream.min_interval_ms,
                max_width: stream.max_width,
                max_height: stream.max_height,
                jpeg_quality: stream.jpeg_quality,
                failure_rate_threshold: stream.failure_rate_threshold,
                min_samples: stream.min_samples,
                cooldown_ms: stream.cooldown_ms,
                token_secret_configured: !stream.token_secret.is_empty(),
                token_ttl_secs: stream.token_ttl_secs,
            },
            suite: config.suite.clone(),
            driver: config.driver.clone(),
            interpreter: config.interpreter.clone(),
        }
    }
}
