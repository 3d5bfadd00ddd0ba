//! Configuration types for LessonForge.
//!
//! Settings live in `lessonforge.json` (camelCase). Every field has a default,
//! so a missing file or a partial file is valid.

use std::path::Path;
use std::time::Duration;

use lessonforge_remote::{Credential, GatewayConfig};
use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "lessonforge.json";

/// Environment variable that overrides `remote.token`.
pub const TOKEN_ENV_VAR: &str = "LESSONFORGE_REMOTE_TOKEN";

/// Default snapshot file path.
fn default_state_file() -> String {
    ".lessonforge/state.json".to_string()
}

/// Default remote platform root.
fn default_base_url() -> String {
    "https://stepik.org".to_string()
}

/// Default HTTP client timeout in seconds.
const fn default_timeout_secs() -> u64 {
    30
}

/// Default number of attempts per remote call.
const fn default_max_attempts() -> u32 {
    3
}

/// Default delay before the first retry, in milliseconds.
const fn default_initial_backoff_ms() -> u64 {
    200
}

/// Upper bound for the initial backoff.
const MAX_INITIAL_BACKOFF_MS: u64 = 60_000;

/// Main LessonForge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Path to the JSON snapshot of the local hierarchy.
    #[serde(default = "default_state_file")]
    pub state_file: String,

    /// Remote platform connection.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Retry and deadline policy for remote calls.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            remote: RemoteConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `lessonforge.json` in the current directory and applies the
    /// `LESSONFORGE_REMOTE_TOKEN` override.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is invalid.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            ForgeError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        let mut config = Self::load_from_dir(&current_dir)?;
        config.apply_token_override(std::env::var(TOKEN_ENV_VAR).ok());
        Ok(config)
    }

    /// Loads configuration from a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is invalid.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::ConfigParseError` if the file cannot be read or
    /// parsed, and `ForgeError::ConfigValidationError` if a value is invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(ForgeError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ForgeError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Replaces the configured token when an override is present and non-empty.
    pub fn apply_token_override(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.remote.token = Some(token);
        }
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.state_file.trim().is_empty() {
            return Err(ForgeError::config_validation(
                "stateFile must not be empty",
                "Provide a snapshot path in your lessonforge.json, e.g. \".lessonforge/state.json\"",
            ));
        }

        let base_url = self.remote.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ForgeError::config_validation(
                format!("remote.baseUrl '{base_url}' is not an http(s) URL"),
                "Set remote.baseUrl to the platform root, e.g. \"https://stepik.org\"",
            ));
        }

        if self.remote.timeout_secs == 0 {
            return Err(ForgeError::config_validation(
                "remote.timeoutSecs must be greater than 0",
                "Set remote.timeoutSecs to at least 1 second in your lessonforge.json",
            ));
        }

        if self.sync.max_attempts == 0 {
            return Err(ForgeError::config_validation(
                "sync.maxAttempts must be greater than 0",
                "Set sync.maxAttempts to at least 1 in your lessonforge.json",
            ));
        }

        if self.sync.initial_backoff_ms > MAX_INITIAL_BACKOFF_MS {
            return Err(ForgeError::config_validation(
                format!(
                    "sync.initialBackoffMs must not exceed {MAX_INITIAL_BACKOFF_MS}"
                ),
                "Use a smaller initial backoff; retries double it on each attempt",
            ));
        }

        if self.sync.call_timeout_secs == 0 {
            return Err(ForgeError::config_validation(
                "sync.callTimeoutSecs must be greater than 0",
                "Set sync.callTimeoutSecs to at least 1 second in your lessonforge.json",
            ));
        }

        Ok(())
    }

    /// Builds the HTTP gateway settings.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.remote.base_url.clone(),
            timeout: Duration::from_secs(self.remote.timeout_secs),
        }
    }
}

/// Remote platform connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    /// Platform root URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Fallback bearer token used when a request carries none.
    #[serde(default)]
    pub token: Option<String>,

    /// HTTP client timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RemoteConfig {
    /// Returns the configured fallback credential.
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        self.token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(Credential::new)
    }
}

/// Retry and deadline policy for remote calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Attempts per remote call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubled on each further retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Deadline for a single remote call in seconds.
    #[serde(default = "default_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            call_timeout_secs: default_timeout_secs(),
        }
    }
}
