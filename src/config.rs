//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILPIPE_CONFIG` (environment variable)
//! 2. `~/.config/mailpipe/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailpipe\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::reader::{DEFAULT_CACHE_CHUNKS, DEFAULT_CHUNK_SIZE};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Blob store settings.
    pub storage: StorageConfig,
    /// Composer stage settings.
    pub compose: ComposeConfig,
    /// Dispatcher stage settings.
    pub dispatch: DispatchConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override directory for log files.
    pub log_dir: Option<PathBuf>,
}

/// Blob store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the filesystem store. Each bucket is a sub-directory.
    pub root: PathBuf,
    /// URI scheme used when reporting object locations (e.g. `s3://b/k`).
    pub scheme: String,
    /// Ranged-read chunk size in bytes (default: 1048576 = 1 MB).
    pub read_chunk_size: usize,
    /// Number of chunks kept by the seekable reader's LRU cache.
    pub read_cache_chunks: usize,
}

/// Which template engine renders the body strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateEngine {
    /// No substitution.
    Identity,
    /// `{{ dotted.path }}` substitution.
    Placeholder,
}

/// Composer stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeConfig {
    /// Template engine for `body.text` / `body.html`.
    pub template: TemplateEngine,
    /// Reject input keys that do not end in `.queued.json`.
    pub require_queued_suffix: bool,
    /// Maximum in-flight attachment fetches (0 = one per attachment).
    pub max_concurrent_fetches: usize,
}

/// Which transport the dispatcher submits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Write messages into `outbox_dir`.
    File,
    /// Relay through an SMTP server.
    Smtp,
}

/// Dispatcher stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Safety margin subtracted from the remaining invocation time.
    pub deadline_margin_ms: u64,
    /// Transport used for submission.
    pub transport: TransportKind,
    /// Output directory of the file transport.
    pub outbox_dir: PathBuf,
    /// SMTP relay settings.
    pub smtp: SmtpConfig,
}

/// SMTP relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Upgrade the connection with STARTTLS.
    pub starttls: bool,
    /// Optional SMTP username.
    pub username: Option<String>,
    /// Optional SMTP password.
    pub password: Option<String>,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            log_dir: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("blobs"),
            scheme: "s3".to_string(),
            read_chunk_size: DEFAULT_CHUNK_SIZE,
            read_cache_chunks: DEFAULT_CACHE_CHUNKS,
        }
    }
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            template: TemplateEngine::Identity,
            require_queued_suffix: false,
            max_concurrent_fetches: 0,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            deadline_margin_ms: 100,
            transport: TransportKind::File,
            outbox_dir: PathBuf::from("outbox"),
            smtp: SmtpConfig::default(),
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            starttls: true,
            username: None,
            password: None,
        }
    }
}

impl DispatchConfig {
    /// The deadline margin as a [`Duration`].
    pub fn deadline_margin(&self) -> Duration {
        Duration::from_millis(self.deadline_margin_ms)
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    match config_file_path() {
        Some(path) if path.exists() => load_config_from(&path),
        _ => Config::default(),
    }
}

/// Load configuration from an explicit path, falling back to defaults.
pub fn load_config_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(cfg) => {
                tracing::info!(path = %path.display(), "Loaded config");
                cfg
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to parse config, using defaults"
                );
                Config::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to read config file, using defaults"
            );
            Config::default()
        }
    }
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILPIPE_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("mailpipe").join("config.toml"))
}

/// Return the directory for log files.
pub fn log_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.log_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailpipe")
}
