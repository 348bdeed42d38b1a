//! Application configuration using Figment
//!
//! Configuration is loaded from:
//! 1. A TOML file (default `config/mcm3000.toml`, optional)
//! 2. Environment variables prefixed with `MCM_DAQ_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use mcm_daq::config::AppConfig;
//!
//! let config = AppConfig::load().unwrap();
//! println!("Controller: {}", config.controller.stage.name);
//! ```
//!
//! ```toml
//! [application]
//! log_level = "debug"
//! log_spans = true
//!
//! [controller]
//! port = "/dev/ttyUSB0"
//! max_poll_attempts = 600
//!
//! [[controller.channels]]
//! stage = "ZFM2020"
//!
//! [[controller.channels]]
//!
//! [[controller.channels]]
//! ```
//!
//! `MCM_DAQ_CONTROLLER__PORT=COM4` overrides the port.

use daq_driver_thorlabs::mcm3000::{ChannelConfig, ControllerConfig};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/mcm3000.toml";
/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "MCM_DAQ_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Stage controller settings
    #[serde(default)]
    pub controller: ControllerSection,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Log span open/close events (shows how long each controller operation took)
    #[serde(default)]
    pub log_spans: bool,
}

/// Serial port plus the driver's controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSection {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM4")
    #[serde(default)]
    pub port: Option<String>,
    /// Channel layout and poll policy
    #[serde(flatten)]
    pub stage: ControllerConfig,
}

// Default value functions
fn default_app_name() -> String {
    "mcm-daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_spans: false,
        }
    }
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            port: None,
            stage: ControllerConfig::new(vec![
                ChannelConfig::stage("ZFM2020"),
                ChannelConfig::stage("ZFM2020"),
                ChannelConfig::stage("ZFM2020"),
            ]),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment apply. Every
    /// layer merges over [`AppConfig::default`], so a partial section only
    /// replaces the keys it names.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LEVELS.join(", ")
            ));
        }

        let format = self.application.log_format.to_lowercase();
        if !VALID_FORMATS.contains(&format.as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_FORMATS.join(", ")
            ));
        }

        if let Some(port) = &self.controller.port {
            if port.trim().is_empty() {
                return Err("controller.port must not be empty".to_string());
            }
        }

        self.controller.stage.validate().map_err(|e| e.to_string())
    }
}
