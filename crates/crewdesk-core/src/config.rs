use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CrewError, Result};

/// Where a configuration returned by [`CrewConfig::load_or_default`] came from.
#[derive(Debug)]
pub enum ConfigSource {
    /// Read and validated from the file.
    File,
    /// No file at the path; defaults in use.
    Missing,
    /// The file exists but could not be read, parsed or validated; defaults
    /// in use.
    Rejected(CrewError),
}

/// Top-level configuration for the Crewdesk engine.
///
/// Loaded from `~/.crewdesk/config.toml` by default. Each section corresponds
/// to one engine or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrewConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

impl CrewConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CrewConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file is missing or rejected.
    ///
    /// Nothing is logged here; callers usually load config before tracing is
    /// up, so the returned [`ConfigSource`] carries the reason instead.
    pub fn load_or_default(path: &Path) -> (Self, ConfigSource) {
        match Self::load(path) {
            Ok(config) => (config, ConfigSource::File),
            Err(CrewError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                (Self::default(), ConfigSource::Missing)
            }
            Err(e) => (Self::default(), ConfigSource::Rejected(e)),
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the engines cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduling.sweep_interval_secs == 0 {
            return Err(CrewError::Config(
                "scheduling.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.chat.max_active_per_staff == Some(0) {
            return Err(CrewError::Config(
                "chat.max_active_per_staff must be greater than zero when set".to_string(),
            ));
        }
        if self.chat.event_buffer == 0 {
            return Err(CrewError::Config(
                "chat.event_buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.crewdesk/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file name inside `general.data_dir`.
    pub db_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_file: "crewdesk.db".to_string(),
        }
    }
}

/// Shift scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Seconds between lifecycle sweep passes.
    pub sweep_interval_secs: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
        }
    }
}

/// Chat assignment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum active chats per staff member for automatic assignment.
    /// Unset means no ceiling.
    pub max_active_per_staff: Option<usize>,
    /// Capacity of the domain event broadcast buffer.
    pub event_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_active_per_staff: None,
            event_buffer: 256,
        }
    }
}
