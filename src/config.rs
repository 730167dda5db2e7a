//! Configuration file parser and runtime settings resolution.
//!
//! The config file (`<config dir>/rssm.toml` unless given with `--config`) is
//! optional. A missing or empty file yields `Config::default()`. Unknown keys
//! are accepted and collected in [`Config::unknown_keys`]; the caller logs
//! them once the subscriber is installed.
//!
//! [`Settings::resolve`] merges command-line overrides, the config file and
//! built-in defaults, in that order of precedence, into absolute paths and
//! validated tuning values.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::channel::MarkerStrategy;
use crate::feed::fetcher::{DEFAULT_TIMEOUT, MAX_FEED_SIZE};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid setting: {0}")]
    Invalid(String),

    #[error("Failed to resolve path {}: {source}", path.display())]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Contents of the TOML config file.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minutes between poll cycles.
    pub interval_minutes: u64,

    /// Upper bound on one fetch, connect through last body byte.
    pub fetch_timeout_seconds: u64,

    /// Largest feed document accepted, in bytes.
    pub max_feed_bytes: usize,

    /// Feeds fetched at once. 1 = strictly sequential.
    pub max_concurrent_fetches: usize,

    /// Item field used as the dedup marker.
    pub dedup_marker: MarkerStrategy,

    /// Namespace prefixes dropped while flattening.
    pub skip_namespaces: Vec<String>,

    pub feed_list: Option<PathBuf>,
    pub directory: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub lock_file: Option<PathBuf>,

    /// Top-level keys in the file that no setting matches.
    #[serde(skip)]
    pub unknown_keys: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_minutes: 10,
            fetch_timeout_seconds: DEFAULT_TIMEOUT.as_secs(),
            max_feed_bytes: MAX_FEED_SIZE,
            max_concurrent_fetches: 1,
            dedup_marker: MarkerStrategy::default(),
            skip_namespaces: vec!["media".to_string()],
            feed_list: None,
            directory: None,
            log_file: None,
            lock_file: None,
            unknown_keys: Vec::new(),
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "interval_minutes",
        "fetch_timeout_seconds",
        "max_feed_bytes",
        "max_concurrent_fetches",
        "dedup_marker",
        "skip_namespaces",
        "feed_list",
        "directory",
        "log_file",
        "lock_file",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, listed in `unknown_keys`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content)
    }

    /// Parses config file content. Blank content yields the defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut config: Self = toml::from_str(content)?;
        if let Ok(raw) = content.parse::<toml::Table>() {
            config.unknown_keys = raw
                .keys()
                .filter(|key| !Self::KNOWN_KEYS.contains(&key.as_str()))
                .cloned()
                .collect();
        }
        Ok(config)
    }
}

// ============================================================================
// Environment
// ============================================================================

/// The environment values path defaults are derived from.
#[derive(Debug, Clone, Default)]
pub struct PathEnv {
    pub home: Option<PathBuf>,
    pub xdg_config_home: Option<PathBuf>,
}

impl PathEnv {
    /// Reads `$HOME` (falling back to the passwd entry of the current uid)
    /// and `$XDG_CONFIG_HOME`. Empty variables count as unset.
    pub fn from_process() -> Self {
        let var = |name: &str| {
            std::env::var_os(name)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };

        let home = var("HOME").or_else(|| {
            nix::unistd::User::from_uid(nix::unistd::getuid())
                .ok()
                .flatten()
                .map(|user| user.dir)
                .filter(|dir| !dir.as_os_str().is_empty())
        });

        Self {
            home,
            xdg_config_home: var("XDG_CONFIG_HOME"),
        }
    }

    /// Home directory, or `/` when none can be determined.
    pub fn home_dir(&self) -> PathBuf {
        self.home.clone().unwrap_or_else(|| PathBuf::from("/"))
    }

    /// `$XDG_CONFIG_HOME`, else `<home>/.config`, else `/`.
    pub fn config_dir(&self) -> PathBuf {
        if let Some(dir) = &self.xdg_config_home {
            return dir.clone();
        }
        match &self.home {
            Some(home) => home.join(".config"),
            None => PathBuf::from("/"),
        }
    }

    pub fn default_config_file(&self) -> PathBuf {
        self.config_dir().join("rssm.toml")
    }

    pub fn default_feed_list(&self) -> PathBuf {
        self.config_dir().join("rssm.conf")
    }

    pub fn default_directory(&self) -> PathBuf {
        self.home_dir().join("rss")
    }

    /// Log file used when daemonizing without one, or when the requested
    /// one cannot be opened.
    pub fn fallback_log_file(&self) -> PathBuf {
        self.home_dir().join(".rssmlog")
    }

    pub fn default_lock_file() -> PathBuf {
        std::env::temp_dir().join("rssm.lock")
    }
}

// ============================================================================
// Resolved Settings
// ============================================================================

/// Values given on the command line. `None` defers to the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub verbose: bool,
    pub daemon: bool,
    pub force: bool,
    pub feed_list: Option<PathBuf>,
    pub directory: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub lock_file: Option<PathBuf>,
    pub interval_minutes: Option<u64>,
}

/// Fully resolved runtime settings. Every path is absolute.
#[derive(Debug, Clone)]
pub struct Settings {
    pub verbose: bool,
    pub daemon: bool,
    pub force: bool,
    pub feed_list: PathBuf,
    pub directory: PathBuf,
    pub log_file: Option<PathBuf>,
    pub fallback_log_file: PathBuf,
    pub lock_file: PathBuf,
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub max_feed_bytes: usize,
    pub max_concurrent_fetches: usize,
    pub dedup_marker: MarkerStrategy,
    pub skip_namespaces: Vec<String>,
}

impl Settings {
    /// Merges `overrides` over `config` over defaults derived from `env`.
    ///
    /// When daemonizing without a log file, the fallback log file is used so
    /// that the detached process still has somewhere to write.
    pub fn resolve(overrides: Overrides, config: Config, env: &PathEnv) -> Result<Self, ConfigError> {
        let interval_minutes = overrides.interval_minutes.unwrap_or(config.interval_minutes);
        if interval_minutes == 0 {
            return Err(ConfigError::Invalid("interval must be at least one minute".into()));
        }
        if config.fetch_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_seconds must be positive".into()));
        }
        if config.max_feed_bytes == 0 {
            return Err(ConfigError::Invalid("max_feed_bytes must be positive".into()));
        }
        if config.max_concurrent_fetches == 0 {
            return Err(ConfigError::Invalid("max_concurrent_fetches must be positive".into()));
        }

        let feed_list = overrides
            .feed_list
            .or(config.feed_list)
            .unwrap_or_else(|| env.default_feed_list());
        let directory = overrides
            .directory
            .or(config.directory)
            .unwrap_or_else(|| env.default_directory());
        let lock_file = overrides
            .lock_file
            .or(config.lock_file)
            .unwrap_or_else(PathEnv::default_lock_file);
        let fallback_log_file = env.fallback_log_file();
        let log_file = match overrides.log_file.or(config.log_file) {
            Some(path) => Some(path),
            None if overrides.daemon => Some(fallback_log_file.clone()),
            None => None,
        };

        Ok(Self {
            verbose: overrides.verbose,
            daemon: overrides.daemon,
            force: overrides.force,
            feed_list: absolute(feed_list)?,
            directory: absolute(directory)?,
            log_file: log_file.map(absolute).transpose()?,
            fallback_log_file: absolute(fallback_log_file)?,
            lock_file: absolute(lock_file)?,
            interval: Duration::from_secs(interval_minutes.saturating_mul(60)),
            fetch_timeout: Duration::from_secs(config.fetch_timeout_seconds),
            max_feed_bytes: config.max_feed_bytes,
            max_concurrent_fetches: config.max_concurrent_fetches,
            dedup_marker: config.dedup_marker,
            skip_namespaces: config.skip_namespaces,
        })
    }
}

/// Makes `path` absolute against the current directory. The daemon changes
/// to `/` after forking, so relative paths must not survive startup.
fn absolute(path: PathBuf) -> Result<PathBuf, ConfigError> {
    std::path::absolute(&path).map_err(|source| ConfigError::Path { path, source })
}

// ============================================================================
// Tests
// ============================================================================
