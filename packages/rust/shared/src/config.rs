//! Application configuration for doctrans.
//!
//! User config lives at `~/.doctrans/doctrans.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DocTransError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "doctrans.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".doctrans";

/// Default database file name inside the config directory.
const DATABASE_FILE_NAME: &str = "doctrans.db";

// ---------------------------------------------------------------------------
// Config structs (matching doctrans.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Database file path; empty means `~/.doctrans/doctrans.db`.
    #[serde(default)]
    pub database_path: String,

    /// Target chunk size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Template id used when `--template` is omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_template: Option<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database_path: String::new(),
            chunk_size: default_chunk_size(),
            default_template: None,
        }
    }
}

fn default_chunk_size() -> usize {
    2000
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for translation.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sampling temperature; provider default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            temperature: None,
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "google/gemini-2.5-flash".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_timeout_secs() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// LLM settings (runtime, merged from config + env)
// ---------------------------------------------------------------------------

/// Runtime LLM client settings: config file values plus the resolved API key.
#[derive(Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub base_url: Url,
    pub model: String,
    pub timeout: Duration,
    pub temperature: Option<f64>,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url.as_str())
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl LlmSettings {
    /// Build settings from the config, reading the API key from the configured env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = resolve_api_key(config)?;
        Self::with_api_key(config, api_key)
    }

    /// Build settings from the config with an explicit API key.
    pub fn with_api_key(config: &AppConfig, api_key: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(&config.openrouter.base_url).map_err(|e| {
            DocTransError::config(format!(
                "invalid openrouter.base_url '{}': {e}",
                config.openrouter.base_url
            ))
        })?;
        Ok(Self {
            api_key: api_key.into(),
            base_url,
            model: config.openrouter.default_model.clone(),
            timeout: Duration::from_secs(config.openrouter.timeout_secs),
            temperature: config.openrouter.temperature,
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.doctrans/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocTransError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.doctrans/doctrans.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the database path, falling back to `~/.doctrans/doctrans.db`.
pub fn database_path(config: &AppConfig) -> Result<PathBuf> {
    if config.defaults.database_path.is_empty() {
        Ok(config_dir()?.join(DATABASE_FILE_NAME))
    } else {
        Ok(PathBuf::from(&config.defaults.database_path))
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DocTransError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DocTransError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DocTransError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocTransError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocTransError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the OpenRouter API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    resolve_api_key(config).map(|_| ())
}

fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(DocTransError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("chunk_size"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.chunk_size, 2000);
        assert_eq!(parsed.openrouter.api_key_env, "OPENROUTER_API_KEY");
        assert_eq!(parsed.openrouter.timeout_secs, 300);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
chunk_size = 1200
default_template = "tpl-1"

[openrouter]
default_model = "anthropic/claude-sonnet-4"
temperature = 0.3
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.chunk_size, 1200);
        assert_eq!(config.defaults.default_template.as_deref(), Some("tpl-1"));
        assert_eq!(config.openrouter.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(config.openrouter.temperature, Some(0.3));
    }

    #[test]
    fn llm_settings_from_config() {
        let config = AppConfig::default();
        let settings = LlmSettings::with_api_key(&config, "sk-test").expect("settings");
        assert_eq!(settings.model, config.openrouter.default_model);
        assert_eq!(settings.timeout, Duration::from_secs(300));
        assert!(!format!("{settings:?}").contains("sk-test"));
    }

    #[test]
    fn llm_settings_rejects_bad_url() {
        let mut config = AppConfig::default();
        config.openrouter.base_url = "not a url".into();
        let err = LlmSettings::with_api_key(&config, "k").unwrap_err();
        assert!(err.to_string().contains("invalid openrouter.base_url"));
    }

    #[test]
    fn explicit_database_path() {
        let mut config = AppConfig::default();
        config.defaults.database_path = "/tmp/x.db".into();
        assert_eq!(database_path(&config).unwrap(), PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.openrouter.api_key_env = "DT_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
