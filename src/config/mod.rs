use lazy_static::lazy_static;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_yml;
use std::error::Error;
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;
use std::sync::RwLock;

pub const CONFIG_PATHS: [&str; 2] = ["config/p1reader.yaml", "p1reader.yaml"];

fn serial_port_default() -> String {
    if cfg!(windows) { "COM3".to_string() } else { "/dev/ttyUSB0".to_string() }
}
fn serial_baud_rate_default() -> u32 { return 115200 }
fn serial_read_timeout_default() -> u64 { return 1000 }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SerialConfig {
    #[serde(default="serial_port_default")]
    pub port: String,
    #[serde(default="serial_baud_rate_default")]
    pub baud_rate: u32,
    #[serde(default="serial_read_timeout_default")]
    pub read_timeout_ms: u64,
}

fn reader_max_errors_default() -> u32 { return 10 }
fn reader_backoff_default() -> u64 { return 1000 }
fn reader_subscriber_buffer_default() -> usize { return crate::hub::DEFAULT_SUBSCRIBER_BUFFER }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ReaderConfig {
    #[serde(default="reader_max_errors_default")]
    pub max_consecutive_errors: u32,
    #[serde(default="reader_backoff_default")]
    pub error_backoff_ms: u64,
    #[serde(default="reader_subscriber_buffer_default")]
    pub subscriber_buffer: usize,
}

fn httpd_enabled_default() -> bool { return true }
fn httpd_bind_default() -> String { return "0.0.0.0".to_string() }
fn httpd_port_default() -> u16 { return 9039 }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct HttpdConfig {
    #[serde(default="httpd_enabled_default")]
    pub enabled: bool,
    #[serde(default="httpd_bind_default")]
    pub bind: String,
    #[serde(default="httpd_port_default")]
    pub port: u16
}

fn serial_default() -> SerialConfig {
    return SerialConfig { port: serial_port_default(), baud_rate: serial_baud_rate_default(), read_timeout_ms: serial_read_timeout_default() }
}
fn reader_default() -> ReaderConfig {
    return ReaderConfig {
        max_consecutive_errors: reader_max_errors_default(),
        error_backoff_ms: reader_backoff_default(),
        subscriber_buffer: reader_subscriber_buffer_default(),
    }
}
fn httpd_default() -> HttpdConfig {
    return HttpdConfig { enabled: httpd_enabled_default(), bind: httpd_bind_default(), port: httpd_port_default() }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Config {
    #[serde(default="serial_default")]
    pub serial: SerialConfig,
    #[serde(default="reader_default")]
    pub reader: ReaderConfig,
    #[serde(default="httpd_default")]
    pub httpd: HttpdConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config { serial: serial_default(), reader: reader_default(), httpd: httpd_default() }
    }
}

impl Config {
    /// Load the first config file found, fall back to defaults. Environment
    /// overrides are applied in both cases.
    pub fn load() -> Self {
        let mut config = match CONFIG_PATHS.iter().find(|p| Path::new(p).exists()) {
            Some(path) => match Config::load_from(path) {
                Ok(c) => {
                    info!("Configuration loaded from {path}");
                    c
                }
                Err(e) => {
                    warn!("Unable to use config {path}: {e}, using defaults");
                    Config::default()
                }
            },
            None => {
                warn!("No config found on {} or {}, using defaults", CONFIG_PATHS[0], CONFIG_PATHS[1]);
                Config::default()
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let mut contents = String::new();
        File::open(path)?.read_to_string(&mut contents)?;
        Ok(Config::from_yaml(&contents)?)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yml::Error> {
        /* An empty file means all defaults */
        if contents.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yml::from_str(contents)
    }

    /// P1_PORT and P1_BAUDRATE win over the config file
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("P1_PORT") {
            self.serial.port = port;
        }

        if let Some(baud) = lookup("P1_BAUDRATE") {
            match baud.trim().parse::<u32>() {
                Ok(b) => self.serial.baud_rate = b,
                Err(_) => warn!("Ignoring invalid P1_BAUDRATE {baud:?}"),
            }
        }
    }
}

lazy_static! {
    pub static ref CONFIG: RwLock<Config> = RwLock::new(Config::load());
}
