//! Configuration file support for patchcord
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/patchcord/config.toml`
//! - macOS: `~/Library/Application Support/patchcord/config.toml`
//! - Windows: `%APPDATA%\patchcord\config.toml`

use crate::error::{Error, Result};
use crate::timing::{DEFAULT_TEMPO, DEFAULT_TICKS_PER_SECOND, SEQ_LAG};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Player timing
    pub sequencer: SequencerConfig,
    /// Rule dispatch
    pub router: RouterConfig,
}

/// Player timing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Engine clock rate; ticks are milliseconds at 1000
    pub ticks_per_second: f64,
    /// How many ticks ahead of a step its callback fires
    pub seq_lag: u64,
    /// Tempo for players that do not set one
    pub default_tempo: f64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            seq_lag: SEQ_LAG,
            default_tempo: DEFAULT_TEMPO,
        }
    }
}

/// Rule dispatch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Hand eligible rules to the engine's own router
    pub native_routing: bool,
    /// Two tap intervals must be at least this similar to change tempo
    pub tap_ratio: f64,
    /// Taps further apart than this start a new estimate
    pub tap_timeout_ticks: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            native_routing: true,
            tap_ratio: 0.5,
            tap_timeout_ticks: 3000,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!("Config file not found at {:?}", path)));
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::config_path()
            .and_then(|path| Self::load(&path))
            .unwrap_or_else(|err| {
                log::debug!("using default configuration: {}", err);
                Self::default()
            })
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "patchcord") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }

    fn validate(&self) -> Result<()> {
        let seq = &self.sequencer;
        if !(seq.ticks_per_second.is_finite() && seq.ticks_per_second > 0.0) {
            return Err(Error::Config("ticks_per_second must be positive".to_string()));
        }
        if !(seq.default_tempo.is_finite() && seq.default_tempo > 0.0) {
            return Err(Error::Config("default_tempo must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.router.tap_ratio) {
            return Err(Error::Config("tap_ratio must be between 0 and 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sequencer.ticks_per_second, 1000.0);
        assert_eq!(config.sequencer.seq_lag, 10);
        assert_eq!(config.sequencer.default_tempo, 120.0);
        assert!(config.router.native_routing);
        assert_eq!(config.router.tap_ratio, 0.5);
        assert_eq!(config.router.tap_timeout_ticks, 3000);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str("[router]\nnative_routing = false\n").unwrap();
        assert!(!config.router.native_routing);
        assert_eq!(config.router.tap_ratio, 0.5);
        assert_eq!(config.sequencer, SequencerConfig::default());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_toml_str("[sequencer]\nticks_per_second = 0\n").is_err());
        assert!(Config::from_toml_str("[router]\ntap_ratio = 2.0\n").is_err());
        assert!(matches!(
            Config::from_toml_str("[router\n"),
            Err(Error::TomlParse(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.sequencer.default_tempo = 96.0;
        config.router.tap_timeout_ticks = 2000;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
