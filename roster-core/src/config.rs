//! Runtime configuration for the roster pipeline.
//!
//! Loaded from a TOML file like:
//! ```toml
//! app_id = "guild-main"
//! user_id = "officer-1"
//! database = "./roster.sqlite"
//! duplicate_ids = "reject"
//! strict_numbers = false
//!
//! [aliases]
//! player_id = ["Player ID"]
//! discord = ["Discord Tag"]
//!
//! [vision]
//! model = "gemini-2.0-flash"
//! api_key_env = "GEMINI_API_KEY"
//! ```
//!
//! Every field is optional; missing values fall back to [`RosterConfig::default`].

use crate::error::{Result, RosterError};
use crate::store::Scope;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_APP_ID: &str = "default-app-id";
pub const DEFAULT_USER_ID: &str = "local-admin";
pub const DEFAULT_DATABASE: &str = "./roster.sqlite";
pub const DEFAULT_VISION_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_VISION_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// How an upload treats a player identifier that appears on more than one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Every row is reconciled against the state stored before the upload;
    /// queued merges for the same player apply in row order at commit.
    #[default]
    Sequential,
    /// Refuse the whole upload before anything is read or written.
    Reject,
}

/// Extra header aliases, appended to the built-in lists.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AliasOverrides {
    pub player_id: Vec<String>,
    pub name: Vec<String>,
    pub might: Vec<String>,
    pub kills: Vec<String>,
    pub notes: Vec<String>,
    pub rank: Vec<String>,
    pub tier: Vec<String>,
    pub sigils: Vec<String>,
    pub mana: Vec<String>,
    pub discord: Vec<String>,
    pub hunting_player_id: Vec<String>,
}

/// Settings for the screenshot extraction endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            model: DEFAULT_VISION_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RosterConfig {
    pub app_id: String,
    pub user_id: String,
    pub database: PathBuf,
    pub duplicate_ids: DuplicatePolicy,
    /// Skip kill rows whose might/kills cell is malformed instead of reading it as zero.
    pub strict_numbers: bool,
    pub aliases: AliasOverrides,
    pub vision: VisionConfig,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            user_id: DEFAULT_USER_ID.to_string(),
            database: PathBuf::from(DEFAULT_DATABASE),
            duplicate_ids: DuplicatePolicy::default(),
            strict_numbers: false,
            aliases: AliasOverrides::default(),
            vision: VisionConfig::default(),
        }
    }
}

impl RosterConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RosterError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config from {:?}: {}", path, e),
            ))
        })?;

        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RosterError::Config(format!("Failed to parse config TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Identifiers become document path segments, so they must be non-empty and slash-free.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("app_id", &self.app_id), ("user_id", &self.user_id)] {
            if value.trim().is_empty() {
                return Err(RosterError::Config(format!("{} must not be empty", field)));
            }
            if value.contains('/') {
                return Err(RosterError::Config(format!(
                    "{} must not contain '/': {:?}",
                    field, value
                )));
            }
        }
        Ok(())
    }

    pub fn scope(&self) -> Scope {
        Scope::new(&self.app_id, &self.user_id)
    }
}
