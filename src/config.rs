use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub forms: FormsConfig,
    pub sheet: SheetConfig,
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            forms: FormsConfig::default(),
            sheet: SheetConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

/// Form API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormsConfig {
    /// API key (bearer token)
    pub api_key: String,
    /// Form whose entries are synced
    pub form_id: String,
    /// API base URL
    pub base_url: String,
}

impl Default for FormsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            form_id: String::new(),
            base_url: "https://www.cognitoforms.com/api".to_string(),
        }
    }
}

/// Spreadsheet mirror settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetConfig {
    /// Path to the mirror CSV file (empty = not configured)
    pub path: String,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
        }
    }
}

/// Sync behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Ask for confirmation before pushing mirror changes to the remote
    pub confirm_push: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { confirm_push: true }
    }
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("formsheet");

        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .context("Failed to read config file")?;

            let config: Config = toml::from_str(&contents)
                .context("Failed to parse config file")?;

            Ok(config)
        } else {
            // Create default config and save it
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(&path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Generate example config content for documentation
    pub fn example_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}
