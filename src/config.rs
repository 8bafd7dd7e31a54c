//! Flat configuration record consumed by `Shared Resources.setup` (spec.md
//! §6). Loadable from a TOML file or from environment variables, matching
//! the teacher's two-path `Config::load` / `Config::from_env` split.

use std::env;
use std::path::PathBuf;

use serde::Deserialize;

/// Log verbosity, forwarded to the `tracing-subscriber` default directive
/// set up once in `main` (spec.md §6, `log_level`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Token-bucket parameters pacing remote listing calls (spec.md §4.3,
/// "Rate limiting").
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MetadataRate {
    pub count: u32,
    pub interval_ms: u64,
}

impl Default for MetadataRate {
    fn default() -> Self {
        Self {
            count: default_metadata_rate_count(),
            interval_ms: default_metadata_rate_interval_ms(),
        }
    }
}

fn default_metadata_rate_count() -> u32 {
    10
}

fn default_metadata_rate_interval_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_download_threads() -> usize {
    4
}

fn default_port() -> u16 {
    10_000
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

/// Recognized configuration options (spec.md §6 table).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub trust_token: Option<String>,
    #[serde(default)]
    pub refresh_token: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_download_threads")]
    pub download_threads: usize,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub enable_crash_reporting: bool,
    #[serde(default)]
    pub fail_on_mfa: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub remote_delete: bool,
    #[serde(default)]
    pub silent: bool,
    #[serde(default)]
    pub log_to_cli: bool,
    #[serde(default)]
    pub suppress_warnings: bool,
    #[serde(default)]
    pub export_metrics: bool,
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    #[serde(default)]
    pub metadata_rate: MetadataRate,
}

impl Config {
    /// Loads from a TOML file (teacher's `Config::load`).
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from environment variables (teacher's `Config::from_env`),
    /// required fields match spec.md §6's flat record; `trust_token`, when
    /// present, overrides whatever the resource file carries.
    pub fn from_env() -> anyhow::Result<Self> {
        let data_dir = env::var("MIRROR_DATA_DIR")
            .map_err(|_| anyhow::anyhow!("MIRROR_DATA_DIR environment variable is required"))?;
        let username = env::var("MIRROR_USERNAME")
            .map_err(|_| anyhow::anyhow!("MIRROR_USERNAME environment variable is required"))?;
        let password = env::var("MIRROR_PASSWORD")
            .map_err(|_| anyhow::anyhow!("MIRROR_PASSWORD environment variable is required"))?;

        let trust_token = env::var("MIRROR_TRUST_TOKEN").ok();
        let refresh_token = parse_bool_env("MIRROR_REFRESH_TOKEN", false);
        let port = parse_env("MIRROR_MFA_PORT", default_port());
        let max_retries = parse_env("MIRROR_MAX_RETRIES", default_max_retries());
        let download_threads = parse_env("MIRROR_DOWNLOAD_THREADS", default_download_threads());
        let schedule = env::var("MIRROR_SCHEDULE").ok();

        let config = Config {
            data_dir: PathBuf::from(data_dir),
            username,
            password,
            trust_token,
            refresh_token,
            port,
            max_retries,
            download_threads,
            schedule,
            enable_crash_reporting: parse_bool_env("MIRROR_ENABLE_CRASH_REPORTING", false),
            fail_on_mfa: parse_bool_env("MIRROR_FAIL_ON_MFA", false),
            force: parse_bool_env("MIRROR_FORCE", false),
            remote_delete: parse_bool_env("MIRROR_REMOTE_DELETE", false),
            silent: parse_bool_env("MIRROR_SILENT", false),
            log_to_cli: parse_bool_env("MIRROR_LOG_TO_CLI", false),
            suppress_warnings: parse_bool_env("MIRROR_SUPPRESS_WARNINGS", false),
            export_metrics: parse_bool_env("MIRROR_EXPORT_METRICS", false),
            log_level: default_log_level(),
            metadata_rate: MetadataRate::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Construction-time validation (spec.md §9, "Dynamic property-based
    /// configuration access" replaced by a fixed record validated up
    /// front).
    fn validate(&self) -> anyhow::Result<()> {
        if self.username.is_empty() {
            anyhow::bail!("username must not be empty");
        }
        if self.download_threads == 0 {
            anyhow::bail!("download_threads must be at least 1");
        }
        Ok(())
    }

    pub fn resource_file_path(&self) -> PathBuf {
        self.data_dir.join(crate::store::paths::RESOURCE_FILE_NAME)
    }
}

fn parse_bool_env(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
