//! Configuration module for Mirrorleaf.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Mirrorleaf.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub history: HistoryConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

/// Remote store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// ID of the remote folder that holds the replica.
    pub root_folder_id: String,
}

/// Local content cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Path of the SQLite database.
    pub database: PathBuf,
    /// When false, every read goes to the remote store.
    pub enabled: bool,
}

/// Edit history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Milliseconds of inactivity after the last edit before a snapshot is committed.
    pub debounce_ms: u64,
    /// Local entries kept per file; older entries fold into the baseline.
    pub max_entries_per_file: usize,
}

/// Remote call retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Base delay of the exponential backoff, in milliseconds.
    pub retry_base_delay_ms: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl HistoryConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl RemoteConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/mirrorleaf/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("mirrorleaf")
            .join("config.yaml")
    }

    /// Serialize to YAML (used by `config show`).
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_folder_id: "root".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("mirrorleaf");
        Self {
            database: data_dir.join("cache.db"),
            enabled: true,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1500,
            max_entries_per_file: 200,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"history.debounce_ms"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for `remote.max_retries`.
const MAX_RETRIES_LIMIT: u32 = 10;

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- store ---
        if self.store.root_folder_id.trim().is_empty() {
            errors.push(ValidationError {
                field: "store.root_folder_id".into(),
                message: "must not be empty".into(),
            });
        }

        // --- cache ---
        if self.cache.enabled && self.cache.database.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "cache.database".into(),
                message: "must be set when the cache is enabled".into(),
            });
        }

        // --- history ---
        if self.history.debounce_ms == 0 {
            errors.push(ValidationError {
                field: "history.debounce_ms".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.history.max_entries_per_file == 0 {
            errors.push(ValidationError {
                field: "history.max_entries_per_file".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- remote ---
        if self.remote.max_retries > MAX_RETRIES_LIMIT {
            errors.push(ValidationError {
                field: "remote.max_retries".into(),
                message: format!("must not exceed {MAX_RETRIES_LIMIT}"),
            });
        }
        if self.remote.max_retries > 0 && self.remote.retry_base_delay_ms == 0 {
            errors.push(ValidationError {
                field: "remote.retry_base_delay_ms".into(),
                message: "must be greater than 0 when retries are enabled".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use mirrorleaf_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .root_folder_id("1AbCdEf")
///     .history_debounce_ms(500)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- store ---

    pub fn root_folder_id(mut self, id: impl Into<String>) -> Self {
        self.config.store.root_folder_id = id.into();
        self
    }

    // --- cache ---

    pub fn cache_database(mut self, path: PathBuf) -> Self {
        self.config.cache.database = path;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache.enabled = enabled;
        self
    }

    // --- history ---

    pub fn history_debounce_ms(mut self, ms: u64) -> Self {
        self.config.history.debounce_ms = ms;
        self
    }

    pub fn history_max_entries_per_file(mut self, n: usize) -> Self {
        self.config.history.max_entries_per_file = n;
        self
    }

    // --- remote ---

    pub fn remote_max_retries(mut self, n: u32) -> Self {
        self.config.remote.max_retries = n;
        self
    }

    pub fn remote_retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.remote.retry_base_delay_ms = ms;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    // -- Defaults --

    #[test]
    fn default_config_has_sensible_values() {
        let cfg = Config::default();
        assert_eq!(cfg.store.root_folder_id, "root");
        assert!(cfg.cache.enabled);
        assert!(cfg.cache.database.to_string_lossy().ends_with("cache.db"));
        assert_eq!(cfg.history.debounce_ms, 1500);
        assert_eq!(cfg.history.max_entries_per_file, 200);
        assert_eq!(cfg.remote.max_retries, 3);
        assert_eq!(cfg.remote.retry_base_delay_ms, 1000);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn default_config_passes_validation() {
        let errors = Config::default().validate();
        assert!(errors.is_empty(), "unexpected validation errors: {errors:?}");
    }

    #[test]
    fn duration_helpers() {
        let cfg = Config::default();
        assert_eq!(cfg.history.debounce(), Duration::from_millis(1500));
        assert_eq!(cfg.remote.retry_base_delay(), Duration::from_secs(1));
    }

    // -- Loading --

    #[test]
    fn load_from_yaml_file() {
        let yaml = r#"
store:
  root_folder_id: 1AbCdEf
cache:
  database: /tmp/mirrorleaf-test.db
  enabled: false
history:
  debounce_ms: 250
  max_entries_per_file: 20
remote:
  max_retries: 0
  retry_base_delay_ms: 10
logging:
  level: debug
"#;
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(yaml.as_bytes()).unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.store.root_folder_id, "1AbCdEf");
        assert_eq!(cfg.cache.database, PathBuf::from("/tmp/mirrorleaf-test.db"));
        assert!(!cfg.cache.enabled);
        assert_eq!(cfg.history.debounce_ms, 250);
        assert_eq!(cfg.history.max_entries_per_file, 20);
        assert_eq!(cfg.remote.max_retries, 0);
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn load_partial_yaml_keeps_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"store:\n  root_folder_id: abc\n").unwrap();
        tmp.flush().unwrap();

        let cfg = Config::load(tmp.path()).expect("load config");
        assert_eq!(cfg.store.root_folder_id, "abc");
        assert_eq!(cfg.history.debounce_ms, 1500);
    }

    #[test]
    fn load_or_default_returns_default_on_missing_file() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(cfg.history.max_entries_per_file, 200);
    }

    #[test]
    fn load_returns_error_on_invalid_yaml() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"not: [valid: yaml: {{{").unwrap();
        tmp.flush().unwrap();

        assert!(Config::load(tmp.path()).is_err());
    }

    // -- Validation --

    #[test]
    fn validate_catches_empty_root() {
        let mut cfg = Config::default();
        cfg.store.root_folder_id = "  ".to_string();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "store.root_folder_id"));
    }

    #[test]
    fn validate_catches_zero_history_values() {
        let mut cfg = Config::default();
        cfg.history.debounce_ms = 0;
        cfg.history.max_entries_per_file = 0;
        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"history.debounce_ms".to_string()));
        assert!(fields.contains(&"history.max_entries_per_file".to_string()));
    }

    #[test]
    fn validate_catches_retry_settings() {
        let mut cfg = Config::default();
        cfg.remote.max_retries = 50;
        assert!(cfg.validate().iter().any(|e| e.field == "remote.max_retries"));

        cfg.remote.max_retries = 2;
        cfg.remote.retry_base_delay_ms = 0;
        assert!(cfg
            .validate()
            .iter()
            .any(|e| e.field == "remote.retry_base_delay_ms"));
    }

    #[test]
    fn validate_catches_invalid_log_level() {
        let mut cfg = Config::default();
        cfg.logging.level = "verbose".to_string();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "logging.level"));
    }

    #[test]
    fn validation_error_display() {
        let err = ValidationError {
            field: "history.debounce_ms".into(),
            message: "must be greater than 0".into(),
        };
        assert_eq!(err.to_string(), "history.debounce_ms: must be greater than 0");
    }

    // -- Builder --

    #[test]
    fn builder_overrides() {
        let cfg = ConfigBuilder::new()
            .root_folder_id("folder-1")
            .cache_enabled(false)
            .history_debounce_ms(10)
            .remote_max_retries(0)
            .logging_level("trace")
            .build();
        assert_eq!(cfg.store.root_folder_id, "folder-1");
        assert!(!cfg.cache.enabled);
        assert_eq!(cfg.history.debounce_ms, 10);
        assert_eq!(cfg.remote.max_retries, 0);
        assert_eq!(cfg.logging.level, "trace");
    }

    #[test]
    fn build_validated_rejects_invalid() {
        let result = ConfigBuilder::new().history_max_entries_per_file(0).build_validated();
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "history.max_entries_per_file");
    }
}
