//! Configuration loading and management
//!
//! Configuration is layered, later layers winning:
//! 1. `~/.config/chatprobe/config.toml` (optional)
//! 2. An env file, `./.env` by default (`BASE=...`, `TOKEN=...`, `MODEL=...`)
//! 3. The process environment
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/chatprobe/` (~/.config/chatprobe/)
//! - Data: `$XDG_DATA_HOME/chatprobe/` (~/.local/share/chatprobe/)
//! - State/Logs: `$XDG_STATE_HOME/chatprobe/` (~/.local/state/chatprobe/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Environment keys read from the env file and the process environment
pub const ENV_KEYS: [&str; 6] = [
    "BASE",
    "TOKEN",
    "MODEL",
    "CHECK_CONTINUABLE",
    "PUBLISH_ARTIFACTS",
    "ARTIFACTS_DIR",
];

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Chat service connection
    #[serde(default)]
    pub server: ServerConfig,

    /// Readiness polling
    #[serde(default)]
    pub polling: PollingConfig,

    /// File upload and knowledge collection
    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    /// Workflow options
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Chat service connection settings
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Base URL of the service (e.g., `https://chat.example.com`)
    pub base_url: Option<String>,

    /// Bearer token
    pub token: Option<String>,

    /// Model identifier used for completions
    pub model: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_server_timeout")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            model: None,
            timeout_secs: default_server_timeout(),
        }
    }
}

impl ServerConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("BASE", &self.base_url),
            ("TOKEN", &self.token),
            ("MODEL", &self.model),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
        .map(|(key, _)| key)
        .collect();

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "server.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> Result<String> {
        self.base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| Error::Config("server.base_url is required".to_string()))
    }

    pub fn model(&self) -> Result<&str> {
        self.model
            .as_deref()
            .ok_or_else(|| Error::Config("server.model is required".to_string()))
    }
}

fn default_server_timeout() -> u64 {
    60
}

/// Readiness poll bounds
#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,

    /// Seconds between attempts
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_poll_attempts(),
            interval_secs: default_poll_interval(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_poll_attempts() -> u32 {
    30
}

fn default_poll_interval() -> u64 {
    2
}

/// Knowledge upload settings
#[derive(Debug, Deserialize, Clone)]
pub struct ArtifactsConfig {
    /// Publish generated files to a knowledge collection after the chat passes
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Where generated files and diagnostic snapshots are written
    pub dir: Option<PathBuf>,

    /// Seconds between processing status checks
    #[serde(default = "default_processing_interval")]
    pub processing_interval_secs: u64,

    /// Overall processing deadline in seconds
    #[serde(default = "default_processing_deadline")]
    pub processing_deadline_secs: u64,

    /// Attach attempts for transient statuses
    #[serde(default = "default_attach_attempts")]
    pub attach_max_attempts: u32,

    /// Upload endpoints, tried in order
    #[serde(default = "default_upload_endpoints")]
    pub upload_endpoints: Vec<String>,

    /// Collection creation endpoints, tried in order
    #[serde(default = "default_knowledge_endpoints")]
    pub knowledge_endpoints: Vec<String>,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            processing_interval_secs: default_processing_interval(),
            processing_deadline_secs: default_processing_deadline(),
            attach_max_attempts: default_attach_attempts(),
            upload_endpoints: default_upload_endpoints(),
            knowledge_endpoints: default_knowledge_endpoints(),
        }
    }
}

impl ArtifactsConfig {
    /// Artifact directory, `$XDG_DATA_HOME/chatprobe/artifacts` unless set
    pub fn dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("artifacts"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload_endpoints.is_empty() {
            return Err(Error::Config(
                "artifacts.upload_endpoints must not be empty".to_string(),
            ));
        }
        if self.knowledge_endpoints.is_empty() {
            return Err(Error::Config(
                "artifacts.knowledge_endpoints must not be empty".to_string(),
            ));
        }
        if self.attach_max_attempts == 0 {
            return Err(Error::Config(
                "artifacts.attach_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_processing_interval() -> u64 {
    1
}

fn default_processing_deadline() -> u64 {
    180
}

fn default_attach_attempts() -> u32 {
    5
}

fn default_upload_endpoints() -> Vec<String> {
    vec!["/api/v1/files/".to_string(), "/api/v1/files/upload".to_string()]
}

fn default_knowledge_endpoints() -> Vec<String> {
    vec![
        "/api/v1/knowledge/create".to_string(),
        "/api/v1/knowledge/".to_string(),
    ]
}

/// Workflow options
#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    /// Append a follow-up message after verification
    #[serde(default)]
    pub check_continuable: bool,

    /// Message sent when none is given on the command line
    #[serde(default = "default_message")]
    pub default_message: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            check_continuable: false,
            default_message: default_message(),
        }
    }
}

fn default_message() -> String {
    "Health check: say pong.".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Reads a boolean env value (`1`, `true`, `yes`, `on`)
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Builds the layered configuration
    ///
    /// `env_file` defaults to `./.env`; a missing default file is skipped,
    /// a missing explicit file is an error.
    pub fn resolve(config_path: Option<&Path>, env_file: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };

        match env_file {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "env file not found at {}",
                        path.display()
                    )));
                }
                config.apply_env_file(path)?;
            }
            None => {
                let default_env = PathBuf::from(".env");
                if default_env.exists() {
                    config.apply_env_file(&default_env)?;
                }
            }
        }

        config.apply_env();
        Ok(config)
    }

    /// Overlay `KEY=value` pairs from an env file
    pub fn apply_env_file(&mut self, path: &Path) -> Result<()> {
        let entries = dotenvy::from_path_iter(path)
            .map_err(|e| Error::Config(format!("failed to read env file {:?}: {}", path, e)))?;

        let mut pairs = Vec::new();
        for entry in entries {
            let (key, value) = entry
                .map_err(|e| Error::Config(format!("invalid env file {:?}: {}", path, e)))?;
            pairs.push((key, value));
        }

        tracing::debug!(path = %path.display(), entries = pairs.len(), "Loaded env file");
        self.apply_vars(pairs);
        Ok(())
    }

    /// Overlay recognized keys from the process environment
    pub fn apply_env(&mut self) {
        let pairs = ENV_KEYS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)));
        self.apply_vars(pairs);
    }

    /// Overlay recognized keys; unknown keys are ignored
    pub fn apply_vars<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let value = value.trim().to_string();
            match key.as_str() {
                "BASE" => self.server.base_url = Some(value.trim_end_matches('/').to_string()),
                "TOKEN" => self.server.token = Some(value),
                "MODEL" => self.server.model = Some(value),
                "CHECK_CONTINUABLE" => self.workflow.check_continuable = parse_flag(&value),
                "PUBLISH_ARTIFACTS" => self.artifacts.enabled = parse_flag(&value),
                "ARTIFACTS_DIR" => self.artifacts.dir = Some(PathBuf::from(value)),
                _ => {}
            }
        }
    }

    /// Validate every section used by a workflow run
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        if self.polling.max_attempts == 0 {
            return Err(Error::Config(
                "polling.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.artifacts.enabled {
            self.artifacts.validate()?;
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/chatprobe/config.toml` (~/.config/chatprobe/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("chatprobe").join("config.toml")
    }

    /// Returns the data directory path
    ///
    /// `$XDG_DATA_HOME/chatprobe/` (~/.local/share/chatprobe/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("chatprobe")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/chatprobe/` (~/.local/state/chatprobe/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("chatprobe")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/chatprobe/chatprobe.log` (~/.local/state/chatprobe/chatprobe.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("chatprobe.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.server.base_url.is_none());
        assert_eq!(config.server.timeout_secs, 60);
        assert_eq!(config.polling.max_attempts, 30);
        assert_eq!(config.polling.interval(), Duration::from_secs(2));
        assert!(config.artifacts.enabled);
        assert_eq!(config.artifacts.processing_deadline_secs, 180);
        assert_eq!(config.artifacts.attach_max_attempts, 5);
        assert!(!config.workflow.check_continuable);
        assert_eq!(config.workflow.default_message, "Health check: say pong.");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
base_url = "https://chat.example.com/"
model = "gemma3:4b"

[polling]
max_attempts = 10
interval_secs = 1

[artifacts]
enabled = false
upload_endpoints = ["/api/v1/files/"]

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(
            config.server.base_url().unwrap(),
            "https://chat.example.com"
        );
        assert_eq!(config.server.model.as_deref(), Some("gemma3:4b"));
        assert_eq!(config.polling.max_attempts, 10);
        assert!(!config.artifacts.enabled);
        assert_eq!(config.artifacts.upload_endpoints, vec!["/api/v1/files/"]);
        assert_eq!(config.artifacts.knowledge_endpoints.len(), 2);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_env_vars_overlay_config() {
        let mut config = Config::default();
        config.apply_vars(vars(&[
            ("BASE", "https://chat.example.com/"),
            ("TOKEN", "sk-test"),
            ("MODEL", "gemma3:4b"),
            ("CHECK_CONTINUABLE", "yes"),
            ("PUBLISH_ARTIFACTS", "0"),
            ("UNRELATED", "ignored"),
        ]));

        assert_eq!(
            config.server.base_url.as_deref(),
            Some("https://chat.example.com")
        );
        assert_eq!(config.server.token.as_deref(), Some("sk-test"));
        assert!(config.workflow.check_continuable);
        assert!(!config.artifacts.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_names_missing_keys() {
        let mut config = Config::default();
        config.apply_vars(vars(&[("BASE", "https://chat.example.com")]));

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("TOKEN"));
        assert!(err.contains("MODEL"));
        assert!(!err.contains("BASE"));
    }

    #[test]
    fn test_artifacts_validation() {
        let config = ArtifactsConfig {
            upload_endpoints: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(ArtifactsConfig::default().validate().is_ok());
    }

    #[test]
    fn test_env_file_overlay() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# probe settings").unwrap();
        writeln!(file, "BASE=\"https://chat.example.com\"").unwrap();
        writeln!(file, "TOKEN='sk-file'").unwrap();
        writeln!(file, "MODEL=gemma3:4b").unwrap();

        let mut config = Config::default();
        config.apply_env_file(file.path()).unwrap();

        assert_eq!(
            config.server.base_url.as_deref(),
            Some("https://chat.example.com")
        );
        assert_eq!(config.server.token.as_deref(), Some("sk-file"));
        assert_eq!(config.server.model.as_deref(), Some("gemma3:4b"));
    }

    #[test]
    fn test_resolve_rejects_missing_explicit_env_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "").unwrap();

        let result = Config::resolve(Some(&config_path), Some(&dir.path().join("nope.env")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
