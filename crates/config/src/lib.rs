//! Configuration loading, validation, and management for Concierge.
//!
//! Loads configuration from `~/.concierge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.concierge/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generation capability settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Context store and compaction settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Behavioral scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Background enrichment subprocesses
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Visitor profile persistence
    #[serde(default)]
    pub profile: ProfileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Upper bound on any single generation call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Request fragment streams instead of whole replies
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    400
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_true() -> bool {
    true
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Entry count above which the store is compacted
    #[serde(default = "default_ceiling")]
    pub ceiling: usize,

    /// Upper bound on entries after compaction
    #[serde(default = "default_target")]
    pub target: usize,

    /// Recent exchanges kept verbatim through compaction
    #[serde(default = "default_preserve_recent")]
    pub preserve_recent: usize,

    /// New exchanges after which the summary is refreshed without trimming
    #[serde(default = "default_refresh_after")]
    pub refresh_after_exchanges: usize,

    /// Label the agent speaks under
    #[serde(default = "default_speaker_label")]
    pub speaker_label: String,
}

fn default_ceiling() -> usize {
    50
}
fn default_target() -> usize {
    25
}
fn default_preserve_recent() -> usize {
    10
}
fn default_refresh_after() -> usize {
    20
}
fn default_speaker_label() -> String {
    "Concierge".into()
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            ceiling: default_ceiling(),
            target: default_target(),
            preserve_recent: default_preserve_recent(),
            refresh_after_exchanges: default_refresh_after(),
            speaker_label: default_speaker_label(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Development mode: illegal transitions fail loudly instead of staying
    #[serde(default)]
    pub strict_transitions: bool,

    /// Delay before the dormant state nudges the visitor once
    #[serde(default = "default_dormant_nudge_secs")]
    pub dormant_nudge_secs: u64,
}

fn default_dormant_nudge_secs() -> u64 {
    45
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strict_transitions: false,
            dormant_nudge_secs: default_dormant_nudge_secs(),
        }
    }
}

/// Gating policy for one enrichment subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubprocessConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fire every `interval` observed turns
    pub interval: u64,

    /// Maximum fires per session
    pub max_per_session: u64,

    /// Minimum seconds between fires (0 = no cooldown)
    #[serde(default)]
    pub cooldown_secs: u64,

    /// Ask the generator whether running adds value first
    #[serde(default)]
    pub value_check: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_profile_refresh")]
    pub profile_refresh: SubprocessConfig,

    #[serde(default = "default_inner_voice")]
    pub inner_voice: SubprocessConfig,
}

fn default_profile_refresh() -> SubprocessConfig {
    SubprocessConfig {
        enabled: true,
        interval: 5,
        max_per_session: 3,
        cooldown_secs: 0,
        value_check: false,
    }
}

fn default_inner_voice() -> SubprocessConfig {
    SubprocessConfig {
        enabled: true,
        interval: 8,
        max_per_session: 2,
        cooldown_secs: 120,
        value_check: true,
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            profile_refresh: default_profile_refresh(),
            inner_voice: default_inner_voice(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Directory for file-backed profiles (None = `~/.concierge/profiles`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    #[serde(default = "default_max_profile_chars")]
    pub max_profile_chars: usize,

    #[serde(default = "default_max_inner_voice_chars")]
    pub max_inner_voice_chars: usize,
}

fn default_max_profile_chars() -> usize {
    2000
}
fn default_max_inner_voice_chars() -> usize {
    1000
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_profile_chars: default_max_profile_chars(),
            max_inner_voice_chars: default_max_inner_voice_chars(),
        }
    }
}

impl ProfileConfig {
    /// The effective profile directory.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("profiles"))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.concierge/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `CONCIERGE_STRICT_TRANSITIONS`
    /// - `CONCIERGE_GENERATION_TIMEOUT_SECS`
    /// - `CONCIERGE_PROFILE_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var("CONCIERGE_STRICT_TRANSITIONS") {
            self.scheduler.strict_transitions = matches!(value.as_str(), "1" | "true" | "yes");
        }

        if let Ok(value) = std::env::var("CONCIERGE_GENERATION_TIMEOUT_SECS") {
            self.generation.timeout_secs = value.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "CONCIERGE_GENERATION_TIMEOUT_SECS is not a number: {value}"
                ))
            })?;
        }

        if let Ok(dir) = std::env::var("CONCIERGE_PROFILE_DIR") {
            self.profile.dir = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".concierge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.temperature < 0.0 || self.generation.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "generation.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.generation.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "generation.timeout_secs must be > 0".into(),
            ));
        }

        if self.context.target > self.context.ceiling {
            return Err(ConfigError::ValidationError(format!(
                "context.target ({}) must not exceed context.ceiling ({})",
                self.context.target, self.context.ceiling
            )));
        }

        for (name, sub) in [
            ("profile_refresh", &self.enrichment.profile_refresh),
            ("inner_voice", &self.enrichment.inner_voice),
        ] {
            if sub.interval == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "enrichment.{name}.interval must be > 0"
                )));
            }
        }

        if self.profile.max_profile_chars == 0 || self.profile.max_inner_voice_chars == 0 {
            return Err(ConfigError::ValidationError(
                "profile ceilings must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Render the configuration as TOML (for `concierge config`).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.context.ceiling, 50);
        assert_eq!(config.context.preserve_recent, 10);
        assert_eq!(config.profile.max_profile_chars, 2000);
        assert!(!config.scheduler.strict_transitions);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = config.to_toml();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.context.target, config.context.target);
        assert_eq!(
            parsed.enrichment.inner_voice.interval,
            config.enrichment.inner_voice.interval
        );
    }

    #[test]
    fn target_above_ceiling_rejected() {
        let mut config = AppConfig::default();
        config.context.target = 80;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_interval_rejected() {
        let mut config = AppConfig::default();
        config.enrichment.profile_refresh.interval = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("profile_refresh"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.generation.timeout_secs, 20);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[scheduler]
strict_transitions = true

[enrichment.inner_voice]
interval = 4
max_per_session = 1
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert!(config.scheduler.strict_transitions);
        assert_eq!(config.enrichment.inner_voice.interval, 4);
        assert_eq!(config.enrichment.inner_voice.cooldown_secs, 0);
        assert!(config.enrichment.inner_voice.enabled);
        assert_eq!(config.enrichment.profile_refresh.interval, 5);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[context\nceiling = ").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }
}
