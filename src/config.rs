//! Configuration loading and management
//!
//! Handles parsing of `.crmboard.toml`, looked up in the data directory.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pipeline::{SortDirection, SortKey};
use crate::taxonomy::{CanonicalStatus, Locale, Taxonomy};

pub const CONFIG_FILE: &str = ".crmboard.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Actor configuration
    #[serde(default)]
    pub actor: ActorConfig,

    /// Board layout and defaults
    #[serde(default)]
    pub board: BoardConfig,

    /// Extra status/urgency aliases
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,

    /// Local JSON store settings
    #[serde(default)]
    pub store: StoreConfig,
}

/// Actor-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Actor id used when none is given on the command line or environment
    #[serde(default = "default_actor")]
    pub default: String,
}

fn default_actor() -> String {
    "unknown".to_string()
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            default: default_actor(),
        }
    }
}

/// Board configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Display language for labels
    #[serde(default)]
    pub locale: Locale,

    /// Column receiving tasks whose status is not recognized
    #[serde(default = "default_column")]
    pub default_column: CanonicalStatus,

    /// Initial sort key
    #[serde(default = "default_sort_key")]
    pub sort_key: SortKey,

    /// Initial sort direction
    #[serde(default)]
    pub sort_direction: SortDirection,

    /// Settled mutations kept for inspection
    #[serde(default = "default_mutation_history")]
    pub mutation_history: usize,
}

fn default_column() -> CanonicalStatus {
    CanonicalStatus::Todo
}

fn default_sort_key() -> SortKey {
    SortKey::DueDate
}

fn default_mutation_history() -> usize {
    200
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            locale: Locale::default(),
            default_column: default_column(),
            sort_key: default_sort_key(),
            sort_direction: SortDirection::default(),
            mutation_history: default_mutation_history(),
        }
    }
}

/// Label aliases on top of the built-in table, label -> canonical code
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    #[serde(default)]
    pub status_aliases: HashMap<String, String>,

    #[serde(default)]
    pub urgency_aliases: HashMap<String, String>,
}

/// JSON directory store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long a write waits for the directory lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Quiet period before a change is re-read
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    crate::lock::DEFAULT_LOCK_TIMEOUT_MS
}

fn default_watch_debounce_ms() -> u64 {
    150
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            watch_debounce_ms: default_watch_debounce_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a `.crmboard.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a data directory, or return defaults
    pub fn load_from_dir(dir: &Path) -> Self {
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %config_path.display(), %err, "ignoring invalid config");
                Self::default()
            }
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Built-in taxonomy extended with the configured aliases.
    pub fn taxonomy(&self) -> Result<Taxonomy> {
        Taxonomy::with_aliases(
            &self.taxonomy.status_aliases,
            &self.taxonomy.urgency_aliases,
        )
    }

    fn validate(&self) -> Result<()> {
        if self.actor.default.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "actor.default cannot be empty".to_string(),
            ));
        }
        if self.board.mutation_history == 0 {
            return Err(Error::InvalidConfig(
                "board.mutation_history must be > 0".to_string(),
            ));
        }
        if self.store.lock_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "store.lock_timeout_ms must be > 0".to_string(),
            ));
        }
        self.taxonomy()?;
        Ok(())
    }
}
