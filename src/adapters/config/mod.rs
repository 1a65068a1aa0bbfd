use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::adapters::responder::{DEFAULT_SYSTEM_PROMPT, OPENROUTER_CHAT_URL};
use crate::core::layout::LayoutConfig;
use crate::core::model::UserId;

/// Bump this when adding new fields with non-trivial defaults.
/// When a loaded config has a lower version, it is re-saved to disk
/// so that users see the new keys in their `config.toml`.
const CURRENT_CONFIG_VERSION: u32 = 1;

const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
const HOME_ENV: &str = "FORKCHAT_HOME";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub config_version: u32,
    pub db_path: Option<String>,
    pub user_id: Option<UserId>,
    pub model: String,
    pub language: String,
    pub system_prompt: String,
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub title_max_chars: usize,
    pub layout: LayoutConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_version: 0,
            db_path: None,
            user_id: None,
            model: "openai/gpt-4o".to_string(),
            language: "ja".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            api_base_url: OPENROUTER_CHAT_URL.to_string(),
            api_key: None,
            title_max_chars: 50,
            layout: LayoutConfig::default(),
        }
    }
}

impl Settings {
    /// `$FORKCHAT_HOME` when set, `~/.forkchat` otherwise.
    pub fn global_config_dir() -> PathBuf {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
            return PathBuf::from(home);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".forkchat")
    }

    fn global_config_path() -> PathBuf {
        Self::global_config_dir().join("config.toml")
    }

    pub fn load_global() -> Self {
        Self::load_from(&Self::global_config_path())
    }

    /// Never fails: unreadable or malformed files fall back to defaults.
    /// A missing `user_id` is generated and persisted on first load.
    pub fn load_from(path: &Path) -> Self {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path).unwrap_or_default();
            match toml::from_str::<Self>(&content) {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("failed to parse {}: {e}. Using defaults.", path.display());
                    Self::default()
                }
            }
        } else {
            Self::default()
        };

        let mut dirty = false;
        if settings.config_version < CURRENT_CONFIG_VERSION {
            settings.config_version = CURRENT_CONFIG_VERSION;
            dirty = true;
        }
        if settings.user_id.is_none() {
            settings.user_id = Some(UserId::new());
            dirty = true;
        }

        // Re-save so new fields (with their defaults) appear in the file on disk.
        if dirty {
            if let Err(e) = settings.save_to(path) {
                log::warn!(
                    "failed to write config v{CURRENT_CONFIG_VERSION} to {}: {e}",
                    path.display()
                );
            }
        }

        settings
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.save_to(&Self::global_config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, &content)?;
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::global_config_dir().join("forkchat.db"))
    }

    pub fn user_id(&self) -> UserId {
        self.user_id.unwrap_or_default()
    }

    /// The configured key, else `OPENROUTER_API_KEY` from the environment.
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
            .or_else(|| {
                std::env::var(API_KEY_ENV)
                    .ok()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
    }

    pub fn set_model(&mut self, model: &str) -> Result<(), String> {
        let normalized = model.trim();
        if normalized.is_empty() {
            return Err("Model id cannot be empty".to_string());
        }
        self.model = normalized.to_string();
        Ok(())
    }

    pub fn set_language(&mut self, language: &str) {
        let normalized = language.trim();
        self.language = if normalized.is_empty() {
            Settings::default().language
        } else {
            normalized.to_string()
        };
    }
}
