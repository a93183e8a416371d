//! Configuration loading for oktabeat
//!
//! The configuration is a YAML document (default `oktabeat.yml`, or the path in
//! `OKTABEAT_CONFIG`). `${VAR}` references are expanded from the environment
//! before parsing, and `OKTABEAT_API_KEY` overrides `oktabeat.api_key`.

use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Placeholder used for credentials that were never configured
pub const FILLER: &str = "FILLER";

/// Config file used when `OKTABEAT_CONFIG` is not set
pub const DEFAULT_CONFIG_PATH: &str = "oktabeat.yml";

/// Page size requested from the System Log API
pub const DEFAULT_PAGE_LIMIT: u32 = 1000;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub oktabeat: BeatConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
    pub http: HttpConfig,
}

/// Settings for the Okta input and the polling loop
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BeatConfig {
    pub okta_domain: String,
    pub api_key: String,
    #[serde(deserialize_with = "deserialize_duration")]
    pub period: Duration,
    /// Overrides `https://{okta_domain}/api/v1`
    pub okta_base_url: Option<String>,
    pub max_pages: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
    pub queue_size: usize,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            okta_domain: FILLER.to_string(),
            api_key: FILLER.to_string(),
            period: Duration::from_secs(60),
            okta_base_url: None,
            max_pages: 10,
            request_timeout: Duration::from_secs(30),
            queue_size: 4096,
        }
    }
}

impl BeatConfig {
    /// Base URL of the Okta API, without a trailing slash
    pub fn base_url(&self) -> String {
        match &self.okta_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}/api/v1", self.okta_domain),
        }
    }
}

/// Output section. At most one of the outputs may be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub file: Option<FileOutputConfig>,
    pub console: Option<ConsoleOutputConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileOutputConfig {
    pub path: PathBuf,
    pub filename: String,
    pub rotate_every_kb: u64,
    pub number_of_files: u32,
}

impl Default for FileOutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data"),
            filename: "oktabeat".to_string(),
            rotate_every_kb: 10 * 1024,
            number_of_files: 7,
        }
    }
}

impl FileOutputConfig {
    /// Path of the file currently being written
    pub fn active_file(&self) -> PathBuf {
        self.path.join(format!("{}.ndjson", self.filename))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsoleOutputConfig {
    pub pretty: bool,
}

/// The output selected after validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    File(FileOutputConfig),
    Console(ConsoleOutputConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub to_stderr: bool,
    pub files: Option<LogFilesConfig>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            to_stderr: true,
            files: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogFilesConfig {
    /// Directory holding the log file
    pub path: PathBuf,
    pub name: String,
}

impl Default for LogFilesConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("logs"),
            name: "oktabeat".to_string(),
        }
    }
}

impl LogFilesConfig {
    pub fn file_path(&self) -> PathBuf {
        self.path.join(format!("{}.log", self.name))
    }
}

/// Monitoring endpoint (`/healthz`, `/readyz`, `/metrics`)
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 5066,
        }
    }
}

/// Resolve the config path from `OKTABEAT_CONFIG`
pub fn config_path_from_env() -> PathBuf {
    std::env::var("OKTABEAT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

impl Config {
    /// Read, expand, parse and validate the config at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_yaml(&raw)?;
        config.apply_api_key_override(std::env::var("OKTABEAT_API_KEY").ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document after `${VAR}` expansion
    ///
    /// An empty document yields the defaults.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(raw);
        if expanded.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&expanded)?)
    }

    pub fn apply_api_key_override(&mut self, api_key: Option<String>) {
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            self.oktabeat.api_key = key;
        }
    }

    /// Check constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let beat = &self.oktabeat;

        if beat.max_pages == 0 {
            return Err(ConfigError::Invalid(
                "oktabeat.max_pages must be >= 1".to_string(),
            ));
        }
        if beat.queue_size == 0 {
            return Err(ConfigError::Invalid(
                "oktabeat.queue_size must be >= 1".to_string(),
            ));
        }
        if beat.okta_domain.trim().is_empty() && beat.okta_base_url.is_none() {
            return Err(ConfigError::Invalid(
                "oktabeat.okta_domain cannot be empty".to_string(),
            ));
        }

        if let Some(file) = &self.output.file {
            if file.filename.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "output.file.filename cannot be empty".to_string(),
                ));
            }
            if !(1..=1024).contains(&file.number_of_files) {
                return Err(ConfigError::Invalid(format!(
                    "output.file.number_of_files must be 1-1024, got {}",
                    file.number_of_files
                )));
            }
            if file.rotate_every_kb == 0 {
                return Err(ConfigError::Invalid(
                    "output.file.rotate_every_kb must be >= 1".to_string(),
                ));
            }
        }
        self.output()?;

        if !VALID_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of {:?}, got {:?}",
                VALID_LEVELS, self.logging.level
            )));
        }
        if let Some(files) = &self.logging.files {
            if files.name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "logging.files.name cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// The single configured output; console when none is set
    pub fn output(&self) -> Result<Output, ConfigError> {
        match (&self.output.file, &self.output.console) {
            (Some(_), Some(_)) => Err(ConfigError::Invalid(
                "only one output can be configured, found both file and console".to_string(),
            )),
            (Some(file), None) => Ok(Output::File(file.clone())),
            (None, Some(console)) => Ok(Output::Console(console.clone())),
            (None, None) => Ok(Output::Console(ConsoleOutputConfig::default())),
        }
    }

    /// Non-fatal problems worth logging at startup
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.oktabeat.okta_domain == FILLER && self.oktabeat.okta_base_url.is_none() {
            warnings.push("oktabeat.okta_domain is not configured".to_string());
        }
        if self.oktabeat.api_key == FILLER {
            warnings.push("oktabeat.api_key is not configured".to_string());
        }
        warnings
    }
}

/// Replace `${VAR}` with the value of `VAR` (empty when unset)
///
/// An unterminated `${` is kept as-is.
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&std::env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    out
}

/// Parse a duration such as `30s`, `5m` or `1h`
///
/// Zero and unit-less values are rejected. Seconds and minutes are capped at
/// 24h; use hours above that (max one week).
pub fn parse_duration(duration_str: &str) -> Option<Duration> {
    let duration_str = duration_str.trim();
    let unit = duration_str.chars().last()?;
    let number: u64 = duration_str[..duration_str.len() - unit.len_utf8()]
        .parse()
        .ok()?;

    if number == 0 {
        return None;
    }

    let secs = match unit {
        's' if number <= 86_400 => number,
        'm' if number <= 1_440 => number.checked_mul(60)?,
        'h' if number <= 168 => number.checked_mul(3_600)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!(
            "invalid duration {:?}, expected a non-zero value like \"30s\", \"5m\" or \"1h\"",
            raw
        ))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "config_test.rs"]
mod tests;
