//! Runtime configuration
//!
//! Configuration can be built in code, loaded from JSON, or read from the
//! environment:
//!
//! | Variable                       | Field                        |
//! |--------------------------------|------------------------------|
//! | `TOOLWARDEN_TRACE_PATH`        | `writer.path`                |
//! | `TOOLWARDEN_WRITER_MODE`       | `writer.mode` (sync, async)  |
//! | `TOOLWARDEN_BUFFER_SIZE`       | `writer.buffer_size`         |
//! | `TOOLWARDEN_FLUSH_INTERVAL_MS` | `writer.flush_interval_ms`   |
//! | `TOOLWARDEN_EXPORT`            | `export_enabled`             |

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::taint::DlpPolicy;

pub const ENV_TRACE_PATH: &str = "TOOLWARDEN_TRACE_PATH";
pub const ENV_WRITER_MODE: &str = "TOOLWARDEN_WRITER_MODE";
pub const ENV_BUFFER_SIZE: &str = "TOOLWARDEN_BUFFER_SIZE";
pub const ENV_FLUSH_INTERVAL_MS: &str = "TOOLWARDEN_FLUSH_INTERVAL_MS";
pub const ENV_EXPORT: &str = "TOOLWARDEN_EXPORT";

const DEFAULT_TRACE_PATH: &str = "toolwarden-trace.jsonl";

fn default_path() -> PathBuf {
    PathBuf::from(DEFAULT_TRACE_PATH)
}

fn default_buffer_size() -> usize {
    64
}

fn default_flush_interval_ms() -> u64 {
    1_000
}

fn default_close_timeout_ms() -> u64 {
    5_000
}

fn default_fsync() -> bool {
    true
}

/// Which trace writer variant to open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterMode {
    /// Flush inline on the calling thread
    #[default]
    Sync,
    /// Hand events to a background worker
    Async,
}

impl WriterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriterMode::Sync => "sync",
            WriterMode::Async => "async",
        }
    }
}

impl fmt::Display for WriterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriterMode {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(WriterMode::Sync),
            "async" => Ok(WriterMode::Async),
            other => Err(WardenError::Config {
                reason: format!("unknown writer mode '{}', expected sync or async", other),
            }),
        }
    }
}

/// Trace writer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Trace file, created with its parent directories when missing
    #[serde(default = "default_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub mode: WriterMode,

    /// Events buffered before a flush is forced
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Maximum time between flushes while events are pending
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// How long `close()` waits for the async worker to drain
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// Sync the file to disk after every flush
    #[serde(default = "default_fsync")]
    pub fsync: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            mode: WriterMode::default(),
            buffer_size: default_buffer_size(),
            flush_interval_ms: default_flush_interval_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            fsync: default_fsync(),
        }
    }
}

impl WriterConfig {
    pub fn builder() -> WriterConfigBuilder {
        WriterConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(WardenError::Config {
                reason: "writer buffer_size must be at least 1".to_string(),
            });
        }
        if self.flush_interval_ms == 0 {
            return Err(WardenError::Config {
                reason: "writer flush_interval_ms must be at least 1".to_string(),
            });
        }
        if self.path.as_os_str().is_empty() {
            return Err(WardenError::Config {
                reason: "writer path must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`WriterConfig`]
#[derive(Debug, Default)]
pub struct WriterConfigBuilder {
    path: Option<PathBuf>,
    mode: Option<WriterMode>,
    buffer_size: Option<usize>,
    flush_interval_ms: Option<u64>,
    close_timeout_ms: Option<u64>,
    fsync: Option<bool>,
}

impl WriterConfigBuilder {
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn mode(mut self, mode: WriterMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    pub fn flush_interval_ms(mut self, ms: u64) -> Self {
        self.flush_interval_ms = Some(ms);
        self
    }

    pub fn close_timeout_ms(mut self, ms: u64) -> Self {
        self.close_timeout_ms = Some(ms);
        self
    }

    pub fn fsync(mut self, enabled: bool) -> Self {
        self.fsync = Some(enabled);
        self
    }

    pub fn build(self) -> WriterConfig {
        WriterConfig {
            path: self.path.unwrap_or_else(default_path),
            mode: self.mode.unwrap_or_default(),
            buffer_size: self.buffer_size.unwrap_or_else(default_buffer_size),
            flush_interval_ms: self
                .flush_interval_ms
                .unwrap_or_else(default_flush_interval_ms),
            close_timeout_ms: self.close_timeout_ms.unwrap_or_else(default_close_timeout_ms),
            fsync: self.fsync.unwrap_or_else(default_fsync),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub writer: WriterConfig,

    #[serde(default)]
    pub dlp: DlpPolicy,

    /// Forward trace events to the installed exporter
    #[serde(default)]
    pub export_enabled: bool,
}

impl WardenConfig {
    /// Defaults overridden by `TOOLWARDEN_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_TRACE_PATH) {
            config.writer.path = PathBuf::from(path);
        }
        if let Some(mode) = lookup(ENV_WRITER_MODE) {
            config.writer.mode = mode.parse()?;
        }
        if let Some(size) = lookup(ENV_BUFFER_SIZE) {
            config.writer.buffer_size = parse_var(ENV_BUFFER_SIZE, &size)?;
        }
        if let Some(ms) = lookup(ENV_FLUSH_INTERVAL_MS) {
            config.writer.flush_interval_ms = parse_var(ENV_FLUSH_INTERVAL_MS, &ms)?;
        }
        if let Some(flag) = lookup(ENV_EXPORT) {
            config.export_enabled = parse_flag(ENV_EXPORT, &flag)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| WardenError::IoError {
            message: format!("failed to read config {}: {}", path.display(), e),
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.writer.validate()?;
        self.dlp.validate()
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| WardenError::Config {
        reason: format!("{} has an invalid value '{}'", key, raw),
    })
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(WardenError::Config {
            reason: format!("{} has an invalid value '{}'", key, raw),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_builder_defaults() {
        let config = WriterConfig::builder().path("/tmp/t.jsonl").build();
        assert_eq!(config.path, PathBuf::from("/tmp/t.jsonl"));
        assert_eq!(config.mode, WriterMode::Sync);
        assert_eq!(config.buffer_size, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let config = WriterConfig::builder().buffer_size(0).build();
        assert!(matches!(config.validate(), Err(WardenError::Config { .. })));
    }

    #[test]
    fn test_zero_flush_interval_rejected() {
        let config = WriterConfig::builder().flush_interval_ms(0).build();
        assert!(matches!(config.validate(), Err(WardenError::Config { .. })));

        let env = lookup(&[(ENV_FLUSH_INTERVAL_MS, "0")]);
        assert!(WardenConfig::from_lookup(env).is_err());
        assert!(WardenConfig::from_json_str(r#"{"writer": {"flush_interval_ms": 0}}"#).is_err());
    }

    #[test]
    fn test_fsync_on_by_default() {
        assert!(WriterConfig::default().fsync);
        assert!(WriterConfig::builder().build().fsync);
        assert!(!WriterConfig::builder().fsync(false).build().fsync);

        let config = WardenConfig::from_json_str(r#"{"writer": {"buffer_size": 2}}"#).unwrap();
        assert!(config.writer.fsync);
    }

    #[test]
    fn test_from_lookup() {
        let config = WardenConfig::from_lookup(lookup(&[
            (ENV_TRACE_PATH, "/var/log/trace.jsonl"),
            (ENV_WRITER_MODE, "ASYNC"),
            (ENV_BUFFER_SIZE, "3"),
            (ENV_FLUSH_INTERVAL_MS, "250"),
            (ENV_EXPORT, "1"),
        ]))
        .unwrap();

        assert_eq!(config.writer.path, PathBuf::from("/var/log/trace.jsonl"));
        assert_eq!(config.writer.mode, WriterMode::Async);
        assert_eq!(config.writer.buffer_size, 3);
        assert_eq!(config.writer.flush_interval_ms, 250);
        assert!(config.export_enabled);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        assert!(WardenConfig::from_lookup(lookup(&[(ENV_BUFFER_SIZE, "lots")])).is_err());
        assert!(WardenConfig::from_lookup(lookup(&[(ENV_WRITER_MODE, "turbo")])).is_err());
        assert!(WardenConfig::from_lookup(lookup(&[(ENV_EXPORT, "maybe")])).is_err());
    }

    #[test]
    fn test_export_disabled_by_default() {
        let config = WardenConfig::from_lookup(lookup(&[])).unwrap();
        assert!(!config.export_enabled);
        assert_eq!(config.writer, WriterConfig::default());
    }

    #[test]
    fn test_from_json_partial() {
        let config = WardenConfig::from_json_str(
            r#"{"writer": {"path": "trace.jsonl", "mode": "async", "buffer_size": 8}}"#,
        )
        .unwrap();
        assert_eq!(config.writer.mode, WriterMode::Async);
        assert_eq!(config.writer.buffer_size, 8);
        assert_eq!(config.writer.flush_interval_ms, 1_000);
        assert_eq!(config.dlp, DlpPolicy::default());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.json");
        std::fs::write(&path, r#"{"export_enabled": true}"#).unwrap();

        let config = WardenConfig::from_file(&path).unwrap();
        assert!(config.export_enabled);
        assert!(WardenConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
