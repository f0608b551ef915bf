use quill_core::{ChatError, Model, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

pub mod env_substitution;
pub mod kv;
pub mod settings;

pub use kv::KeyValueDir;
pub use settings::{Settings, SettingsStore};

pub const DEFAULT_COMPLETION_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub completion: CompletionSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default = "default_models")]
    pub models: Vec<Model>,
    #[serde(default)]
    pub paths: PathSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Model selected when the user has not picked one yet.
    #[serde(default = "default_model")]
    pub default_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageSettings {
    Local {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
    Remote(RemoteSettings),
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Base URL of the record store; REST calls go to `{url}/rest/v1/...`.
    pub url: String,
    pub api_key: String,
    /// Scopes conversations to one user.
    pub user_id: String,
}

impl fmt::Debug for RemoteSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSettings")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    #[serde(default = "default_home_dir")]
    pub home_dir: PathBuf,
}

impl AppConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ChatError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut raw: serde_yaml::Value = serde_yaml::from_str(yaml)
            .map_err(|e| ChatError::Config(format!("Failed to parse YAML: {}", e)))?;
        if raw.is_null() {
            raw = serde_yaml::Value::Mapping(Default::default());
        }
        env_substitution::substitute_env_vars(&mut raw)?;

        let mut config: AppConfig = serde_yaml::from_value(raw)
            .map_err(|e| ChatError::Config(format!("Invalid configuration: {}", e)))?;

        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    fn expand_env_vars(&mut self) {
        if let Ok(home_dir) = env::var("HOME_DIR") {
            self.paths.home_dir = PathBuf::from(home_dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.app.default_model.is_empty() {
            return Err(ChatError::Config("Default model cannot be empty".into()));
        }
        if !is_http_url(&self.completion.endpoint) {
            return Err(ChatError::Config(
                "Completion endpoint must start with http:// or https://".into(),
            ));
        }
        if self.completion.max_tokens == 0 {
            return Err(ChatError::Config("max_tokens must be positive".into()));
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(ChatError::Config(
                "Temperature must be between 0.0 and 2.0".into(),
            ));
        }
        for model in &self.models {
            if model.id.is_empty() {
                return Err(ChatError::Config("Model id cannot be empty".into()));
            }
            if model.context_window == 0 {
                return Err(ChatError::Config(format!(
                    "Model '{}' must have a positive context window",
                    model.id
                )));
            }
            if model.cost_per_1k < 0.0 {
                return Err(ChatError::Config(format!(
                    "Model '{}' cannot have a negative cost",
                    model.id
                )));
            }
        }
        if let StorageSettings::Remote(remote) = &self.storage {
            if !is_http_url(&remote.url) {
                return Err(ChatError::Config(
                    "Remote storage URL must start with http:// or https://".into(),
                ));
            }
            if remote.api_key.is_empty() {
                return Err(ChatError::Config("Remote storage api_key cannot be empty".into()));
            }
            if remote.user_id.is_empty() {
                return Err(ChatError::Config("Remote storage user_id cannot be empty".into()));
            }
        }
        Ok(())
    }

    /// Directory holding the device-local key-value records.
    pub fn storage_dir(&self) -> PathBuf {
        self.paths.home_dir.join("storage")
    }

    pub fn settings_store(&self) -> SettingsStore {
        SettingsStore::new(KeyValueDir::new(self.storage_dir()))
    }

    pub fn default_config_path() -> PathBuf {
        default_home_dir().join("config.yaml")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSettings::default(),
            completion: CompletionSettings::default(),
            storage: StorageSettings::default(),
            models: default_models(),
            paths: PathSettings::default(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_model: default_model(),
        }
    }
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings::Local { path: None }
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
        }
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn default_model() -> String { "gpt-4o-mini".to_string() }
fn default_endpoint() -> String { DEFAULT_COMPLETION_ENDPOINT.to_string() }
fn default_max_tokens() -> u32 { 1000 }
fn default_temperature() -> f32 { 0.7 }

fn default_home_dir() -> PathBuf {
    env::var("HOME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|p| p.join(".quill"))
                .unwrap_or_else(|| PathBuf::from("./.quill"))
        })
}

fn model(id: &str, name: &str, context_window: usize, cost_per_1k: f64) -> Model {
    Model {
        id: id.to_string(),
        name: name.to_string(),
        context_window,
        cost_per_1k,
    }
}

pub fn default_models() -> Vec<Model> {
    vec![
        model("gpt-3.5-turbo", "GPT-3.5 Turbo", 16_385, 0.0005),
        model("gpt-4", "GPT-4", 8_192, 0.03),
        model("gpt-4o", "GPT-4o", 128_000, 0.005),
        model("gpt-4o-mini", "GPT-4o Mini", 128_000, 0.00015),
    ]
}
