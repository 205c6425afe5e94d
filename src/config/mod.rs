//! Configuration module for drover.
//!
//! Handles worker tool definitions, environment variables, and settings.

mod settings;

pub use settings::{
    expand_env_vars, parse_duration, RuntimeDefaults, Settings, SettingsError, ToolSettings,
};
