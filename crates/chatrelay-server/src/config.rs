//! Server configuration: TOML file + CLI overrides.

use crate::error::{ServerError, ServerResult};
use chatrelay_core::CodecConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub codec: CodecSection,
    #[serde(default)]
    pub log: LogSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// Bound on a single outbound frame, including the wait for the gate.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

/// `[codec]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct CodecSection {
    #[serde(default = "default_read_timeout_ms")]
    pub read_length_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_packet_timeout_ms: u64,
}

impl Default for CodecSection {
    fn default() -> Self {
        Self {
            read_length_timeout_ms: default_read_timeout_ms(),
            read_packet_timeout_ms: default_read_timeout_ms(),
        }
    }
}

/// `[log]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Include source file and line in each record.
    #[serde(default)]
    pub lines: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            lines: false,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:2000".to_string()
}
fn default_keepalive_interval_ms() -> u64 {
    1000
}
fn default_read_timeout_ms() -> u64 {
    2000
}
fn default_write_timeout_ms() -> u64 {
    2000
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Values given on the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind: Option<String>,
    pub read_length_timeout_ms: Option<u64>,
    pub read_packet_timeout_ms: Option<u64>,
    pub keepalive_interval_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    pub log_level: Option<String>,
    pub log_json: bool,
    pub log_lines: bool,
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub codec: CodecConfig,
    pub keepalive_interval: Duration,
    pub write_timeout: Duration,
    pub log_level: String,
    pub log_json: bool,
    pub log_lines: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            codec: CodecConfig::default(),
            keepalive_interval: Duration::from_millis(default_keepalive_interval_ms()),
            write_timeout: Duration::from_millis(default_write_timeout_ms()),
            log_level: default_log_level(),
            log_json: false,
            log_lines: false,
        }
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load(config_path: Option<&Path>, overrides: ConfigOverrides) -> ServerResult<Self> {
        let file_config = match config_path.map(expand_tilde) {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)?;
                toml::from_str::<ConfigFile>(&content).map_err(|e| {
                    ServerError::Config(format!("{}: {e}", path.display()))
                })?
            }
            _ => ConfigFile::default(),
        };

        let bind = overrides.bind.unwrap_or(file_config.server.bind);
        let read_length_ms = overrides
            .read_length_timeout_ms
            .unwrap_or(file_config.codec.read_length_timeout_ms);
        let read_packet_ms = overrides
            .read_packet_timeout_ms
            .unwrap_or(file_config.codec.read_packet_timeout_ms);
        let keepalive_ms = overrides
            .keepalive_interval_ms
            .unwrap_or(file_config.server.keepalive_interval_ms);
        let write_ms = overrides
            .write_timeout_ms
            .unwrap_or(file_config.server.write_timeout_ms);

        Ok(Self {
            bind: normalize_bind(&bind),
            codec: CodecConfig {
                read_length_timeout: non_zero_ms("read_length_timeout_ms", read_length_ms)?,
                read_packet_timeout: non_zero_ms("read_packet_timeout_ms", read_packet_ms)?,
            },
            keepalive_interval: non_zero_ms("keepalive_interval_ms", keepalive_ms)?,
            write_timeout: non_zero_ms("write_timeout_ms", write_ms)?,
            log_level: overrides.log_level.unwrap_or(file_config.log.level),
            log_json: overrides.log_json || file_config.log.json,
            log_lines: overrides.log_lines || file_config.log.lines,
        })
    }
}

fn non_zero_ms(field: &str, ms: u64) -> ServerResult<Duration> {
    if ms == 0 {
        return Err(ServerError::Config(format!("{field} must be greater than zero")));
    }
    Ok(Duration::from_millis(ms))
}

/// Accept the `:port` shorthand for all interfaces.
fn normalize_bind(bind: &str) -> String {
    match bind.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => bind.to_string(),
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
