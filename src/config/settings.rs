//! TOML-based configuration for drover.
//!
//! Supports a config file (drover.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [tools.javac]
//! path = "./javac-worker"
//! args = ["--persist"]
//!
//! [tools.javac.env]
//! JAVA_HOME = "${JAVA_HOME}"
//!
//! [defaults]
//! startup_timeout = "10s"
//! shutdown_grace = "5s"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Worker tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid duration format: {0}")]
    InvalidDuration(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Named worker tool definitions.
    #[serde(default)]
    pub tools: HashMap<String, ToolSettings>,

    /// Lifecycle defaults shared by all tools.
    #[serde(default)]
    pub defaults: RuntimeDefaults,
}

/// One worker tool definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolSettings {
    /// Path to the worker binary (supports ${ENV_VAR} expansion).
    pub path: String,

    /// Arguments passed at spawn.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the worker process (values support
    /// ${ENV_VAR} expansion).
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ToolSettings {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Get the binary path with environment variables expanded.
    pub fn resolved_path(&self) -> Result<PathBuf, SettingsError> {
        Ok(PathBuf::from(expand_env_vars(&self.path)?))
    }

    /// Get the spawn arguments with environment variables expanded.
    pub fn resolved_args(&self) -> Result<Vec<String>, SettingsError> {
        self.args.iter().map(|arg| expand_env_vars(arg)).collect()
    }

    /// Get the worker environment with variable values expanded.
    pub fn resolved_env(&self) -> Result<HashMap<String, String>, SettingsError> {
        self.env
            .iter()
            .map(|(key, value)| Ok((key.clone(), expand_env_vars(value)?)))
            .collect()
    }
}

/// Lifecycle timing defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeDefaults {
    /// How long to wait for the worker's hello frame (e.g. "10s").
    pub startup_timeout: String,

    /// How long a worker gets to exit after a shutdown request before it
    /// is killed (e.g. "5s").
    pub shutdown_grace: String,
}

impl Default for RuntimeDefaults {
    fn default() -> Self {
        Self {
            startup_timeout: "10s".to_string(),
            shutdown_grace: "5s".to_string(),
        }
    }
}

impl RuntimeDefaults {
    pub fn startup_timeout(&self) -> Result<Duration, SettingsError> {
        parse_duration(&self.startup_timeout)
    }

    pub fn shutdown_grace(&self) -> Result<Duration, SettingsError> {
        parse_duration(&self.shutdown_grace)
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `DROVER_CONFIG`
    /// 2. `./drover.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("DROVER_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("drover.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        // Return defaults if no config file found
        Ok(Settings::default())
    }

    /// Get a tool definition by name.
    pub fn tool(&self, name: &str) -> Result<&ToolSettings, SettingsError> {
        self.tools
            .get(name)
            .ok_or_else(|| SettingsError::ToolNotFound(name.to_string()))
    }

    /// Register a tool definition (builder-style, used heavily in tests).
    pub fn with_tool(mut self, name: impl Into<String>, tool: ToolSettings) -> Self {
        self.tools.insert(name.into(), tool);
        self
    }
}

/// Parse a humane duration string: "500ms", "10s", "2m", "1h".
pub fn parse_duration(s: &str) -> Result<Duration, SettingsError> {
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| SettingsError::InvalidDuration(s.to_string()))?;
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| SettingsError::InvalidDuration(s.to_string()))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(SettingsError::InvalidDuration(s.to_string())),
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            // Check for ${VAR} or $VAR
            if chars.peek() == Some(&'{') {
                chars.next(); // consume '{'
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        chars.next(); // consume '}'
                        break;
                    }
                    var_name.push(ch);
                    chars.next();
                }
                let value = env::var(&var_name)
                    .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            } else {
                // $VAR (ends at non-alphanumeric/underscore)
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        var_name.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if var_name.is_empty() {
                    // Just a lone $, keep it
                    result.push('$');
                } else {
                    let value = env::var(&var_name)
                        .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                    result.push_str(&value);
                }
            }
        } else {
            result.push(c);
        }
    }

    Ok(result)
}
