//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tk_core::{GlucoseUnit, TimeGrid, ValidationError};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// Unit glucose values are entered and shown in.
    pub glucose_unit: GlucoseUnit,

    /// Length of one schedule slot in minutes.
    pub slot_minutes: u32,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("glucose_unit", &self.glucose_unit.as_str())
            .field("slot_minutes", &self.slot_minutes)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("tk.db"),
            glucose_unit: GlucoseUnit::default(),
            slot_minutes: TimeGrid::DEFAULT.slot_minutes(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // TK_DATABASE_PATH, TK_GLUCOSE_UNIT, TK_SLOT_MINUTES
        figment = figment.merge(Env::prefixed("TK_"));

        figment.extract()
    }

    /// The schedule grid described by `slot_minutes`.
    pub fn grid(&self) -> Result<TimeGrid, ValidationError> {
        TimeGrid::with_slot_minutes(self.slot_minutes)
    }
}

/// Returns the platform-specific config directory for tk.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("tk"))
}

/// Returns the platform-specific data directory for tk.
///
/// On Linux: `~/.local/share/tk`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("tk"))
}
