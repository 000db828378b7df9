//! Configuration for the squat coach.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the coaching server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long insole samples are retained per side
    #[serde(with = "duration_serde")]
    pub window_duration: Duration,

    /// Minimum gap before the same voice text may be resent to a user
    #[serde(with = "duration_serde")]
    pub feedback_cooldown: Duration,

    /// Voice and classifier text is cut to this many characters
    pub max_feedback_chars: usize,

    /// Cadence of the telemetry push
    #[serde(with = "duration_serde")]
    pub telemetry_interval: Duration,

    /// Cadence of the voice feedback push
    #[serde(with = "duration_serde")]
    pub feedback_interval: Duration,

    /// Delay before the first voice feedback tick
    #[serde(with = "duration_serde")]
    pub feedback_initial_delay: Duration,

    /// Lifetime of an inference session
    #[serde(with = "duration_serde")]
    pub session_ttl: Duration,

    /// Address to bind to
    pub host: IpAddr,

    /// Port to bind to (0 for random)
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_duration: Duration::from_secs(10),
            feedback_cooldown: Duration::from_secs(30),
            max_feedback_chars: 25,
            telemetry_interval: Duration::from_secs(1),
            feedback_interval: Duration::from_secs(10),
            feedback_initial_delay: Duration::from_secs(5),
            session_ttl: Duration::from_secs(30 * 60),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it is missing.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("squat-coach")
            .join("config.json")
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telemetry_interval.is_zero() {
            return Err(ConfigError::Invalid("telemetry_interval must be positive".into()));
        }
        if self.feedback_interval.is_zero() {
            return Err(ConfigError::Invalid("feedback_interval must be positive".into()));
        }
        if self.max_feedback_chars == 0 {
            return Err(ConfigError::Invalid("max_feedback_chars must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid config: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
