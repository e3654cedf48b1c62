//! Configuration management for cardiochat.
//!
//! Loads configuration from ${CARDIOCHAT_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::turn::{DEFAULT_MAX_QUESTIONS, TurnSettings};
use crate::prompts::SYSTEM_INSTRUCTION;
use crate::providers::gemini::{GenerationConfig, SafetySetting};

/// Returns the default config template with comments.
///
/// This is embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

/// Merges user config values into the default template.
///
/// This ensures new comments/sections from the template are always present,
/// while preserving user's customized values.
fn merge_with_template(user_config: &str) -> Result<String> {
    use toml_edit::DocumentMut;

    let mut doc: DocumentMut = default_config_template()
        .parse()
        .context("Failed to parse default config template")?;

    let user_doc: DocumentMut = user_config.parse().context("Failed to parse user config")?;

    merge_items(doc.as_table_mut(), user_doc.as_table());

    Ok(doc.to_string())
}

/// Recursively merges items from source table into target table.
fn merge_items(target: &mut toml_edit::Table, source: &toml_edit::Table) {
    use toml_edit::Item;

    for (key, value) in source {
        match value {
            Item::Value(v) => {
                target[key] = Item::Value(v.clone());
            }
            Item::Table(src_table) => {
                if let Some(Item::Table(target_table)) = target.get_mut(key) {
                    merge_items(target_table, src_table);
                } else {
                    target[key] = Item::Table(src_table.clone());
                }
            }
            Item::ArrayOfTables(src_arr) => {
                // Array of tables: replace entirely with user's version
                target[key] = Item::ArrayOfTables(src_arr.clone());
            }
            Item::None => {}
        }
    }
}

pub mod paths {
    //! Path resolution for cardiochat configuration and data directories.
    //!
    //! CARDIOCHAT_HOME resolution order:
    //! 1. CARDIOCHAT_HOME environment variable (if set)
    //! 2. ~/.config/cardiochat (default)
    //! 3. ./.cardiochat when no home directory can be determined

    use std::path::PathBuf;

    /// Returns the cardiochat home directory.
    pub fn cardiochat_home() -> PathBuf {
        if let Ok(home) = std::env::var("CARDIOCHAT_HOME") {
            let trimmed = home.trim();
            if !trimmed.is_empty() {
                return PathBuf::from(trimmed);
            }
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".cardiochat"),
            |h| h.join(".config").join("cardiochat"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        cardiochat_home().join("config.toml")
    }

    /// Returns the directory backing the persistent conversation store.
    pub fn store_dir() -> PathBuf {
        cardiochat_home().join("store")
    }

    /// Returns the directory receiving log files.
    pub fn logs_dir() -> PathBuf {
        cardiochat_home().join("logs")
    }
}

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub top_p: f64,
    pub top_k: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 800,
            top_p: 0.8,
            top_k: 10,
        }
    }
}

impl From<GenerationSettings> for GenerationConfig {
    fn from(settings: GenerationSettings) -> Self {
        Self {
            temperature: settings.temperature,
            max_output_tokens: settings.max_output_tokens,
            top_p: settings.top_p,
            top_k: settings.top_k,
        }
    }
}

fn default_safety_settings() -> Vec<SafetySetting> {
    vec![SafetySetting::new(
        "HARM_CATEGORY_DANGEROUS_CONTENT",
        "BLOCK_ONLY_HIGH",
    )]
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The Gemini model to use
    pub model: String,

    /// Optional models endpoint (for test rigs or proxies)
    pub base_url: Option<String>,

    /// Optional API key (falls back to `GEMINI_API_KEY`)
    pub api_key: Option<String>,

    /// Optional inline system instruction
    pub system_prompt: Option<String>,

    /// Optional path to a file containing the system instruction
    pub system_prompt_file: Option<String>,

    /// Timeout for a completion request in seconds (0 disables)
    pub request_timeout_secs: u32,

    /// Upper bound of the follow-up question counter
    pub max_questions: u8,

    /// Sampling parameters
    pub generation: GenerationSettings,

    /// Content-safety thresholds
    #[serde(default = "default_safety_settings")]
    pub safety_settings: Vec<SafetySetting>,
}

impl Config {
    pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
    const DEFAULT_REQUEST_TIMEOUT_SECS: u32 = 60;

    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Saves only the model field to the config file.
    ///
    /// # Errors
    /// Returns an error if the config cannot be read, parsed or written.
    pub fn save_model(model: &str) -> Result<()> {
        Self::save_model_to(&paths::config_path(), model)
    }

    /// Saves only the model field to a specific config file path.
    ///
    /// Creates the file with default template if it doesn't exist.
    /// If file exists, merges user values into the latest template.
    ///
    /// # Errors
    /// Returns an error if the config cannot be read, parsed or written.
    pub fn save_model_to(path: &Path, model: &str) -> Result<()> {
        use toml_edit::{DocumentMut, value};

        let contents = if path.exists() {
            let user_config = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            merge_with_template(&user_config)?
        } else {
            default_config_template().to_string()
        };

        let mut doc: DocumentMut = contents
            .parse()
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        doc["model"] = value(model);

        Self::write_config(path, &doc.to_string())
    }

    /// Creates a default config file at the given path.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Returns the effective system instruction.
    ///
    /// Precedence: `system_prompt_file` > `system_prompt` > bundled instruction.
    ///
    /// # Errors
    /// Returns an error if `system_prompt_file` is set but unreadable.
    pub fn effective_system_prompt(&self) -> Result<String> {
        if let Some(path_str) = self.system_prompt_file.as_deref().map(str::trim)
            && !path_str.is_empty()
        {
            let content = fs::read_to_string(path_str)
                .with_context(|| format!("Failed to read system prompt file: {path_str}"))?;
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }

        match self.system_prompt.as_deref().map(str::trim) {
            Some(prompt) if !prompt.is_empty() => Ok(prompt.to_string()),
            _ => Ok(SYSTEM_INSTRUCTION.trim().to_string()),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(u64::from(self.request_timeout_secs)))
        }
    }

    /// Returns the effective base URL from config, if set.
    /// Empty strings are treated as unset.
    pub fn effective_base_url(&self) -> Option<&str> {
        self.base_url.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Builds the constant inputs of the turn pipeline.
    ///
    /// # Errors
    /// Returns an error if the system instruction cannot be resolved.
    pub fn turn_settings(&self) -> Result<TurnSettings> {
        Ok(TurnSettings {
            system_instruction: self.effective_system_prompt()?,
            generation: self.generation.into(),
            safety_settings: self.safety_settings.clone(),
            max_questions: self.max_questions,
        })
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: Self::DEFAULT_MODEL.to_string(),
            base_url: None,
            api_key: None,
            system_prompt: None,
            system_prompt_file: None,
            request_timeout_secs: Self::DEFAULT_REQUEST_TIMEOUT_SECS,
            max_questions: DEFAULT_MAX_QUESTIONS,
            generation: GenerationSettings::default(),
            safety_settings: default_safety_settings(),
        }
    }
}
