use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Prefix of environment overrides, e.g. `TODOSYNC__REMOTE__BASE_URL`.
pub const ENV_PREFIX: &str = "TODOSYNC";

/// Environment variable holding the bearer token.
pub const TOKEN_ENV: &str = "TODOSYNC_TOKEN";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote task list API
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Local task storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Backoff for remote mutations
    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the task list API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Sent as `last_updated_by` on every element
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Bearer token (optional, can be set via `TODOSYNC_TOKEN` or the keyring)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Keyring service name the token is stored under
    #[serde(default = "default_keyring_service")]
    pub keyring_service: String,
}

fn default_base_url() -> String {
    "http://localhost:8080/todo".to_string()
}

fn default_device_id() -> String {
    "todosync-cli".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_keyring_service() -> String {
    "todosync".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            device_id: default_device_id(),
            token: None,
            request_timeout_secs: default_request_timeout(),
            keyring_service: default_keyring_service(),
        }
    }
}

/// Which local store holds the tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Sqlite,
    Document,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageKind,

    /// Directory for task storage and preferences (defaults to the platform data dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured data directory, or `<data dir>/todosync`.
    pub fn effective_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("todosync")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
}

fn default_initial_delay() -> u64 {
    2
}

fn default_factor() -> f64 {
    1.5
}

fn default_jitter() -> f64 {
    0.05
}

fn default_max_delay() -> u64 {
    120
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            factor: default_factor(),
            jitter: default_jitter(),
            max_delay_secs: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl Config {
    /// Load configuration from `path` plus `TODOSYNC__*` environment overrides.
    ///
    /// A missing file is created with defaults first.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            Self::default().save_to(path)?;
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()).required(true))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read config file")?;

        let mut config: Config = settings
            .try_deserialize()
            .context("Failed to parse config file")?;

        if config.remote.token.is_none() {
            config.remote.token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty());
        }

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.remote.base_url, "remote.base_url", &mut result);

        if self.remote.device_id.trim().is_empty() {
            result.add_warning("remote.device_id", "Device id is empty");
        }

        if self.remote.request_timeout_secs == 0 {
            result.add_error("remote.request_timeout_secs", "Timeout must be greater than 0");
        }

        let retry = &self.retry;
        if retry.initial_delay_secs == 0 {
            result.add_error("retry.initial_delay_secs", "Initial delay must be greater than 0");
        }
        if retry.factor <= 1.0 {
            result.add_error("retry.factor", "Factor must be greater than 1");
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            result.add_error("retry.jitter", "Jitter must be between 0 and 1");
        }
        if retry.max_delay_secs < retry.initial_delay_secs {
            result.add_error(
                "retry.max_delay_secs",
                "Max delay must not be smaller than the initial delay",
            );
        } else if retry.max_delay_secs == retry.initial_delay_secs {
            result.add_warning(
                "retry.max_delay_secs",
                "Max delay equals the initial delay, failed requests are never retried",
            );
        }

        if let Some(dir) = &self.storage.data_dir {
            if dir.exists() && !dir.is_dir() {
                result.add_error(
                    "storage.data_dir",
                    format!("Path is not a directory: {}", dir.display()),
                );
            }
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                } else if url.scheme() == "http" {
                    result.add_warning(field_name, "Token will be sent over plain http");
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        tracing::debug!("Wrote config to {:?}", path);
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("todosync");

        Ok(config_dir.join("config.toml"))
    }
}
