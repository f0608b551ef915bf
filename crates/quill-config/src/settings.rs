//! Process-wide user settings: the API credential and the selected model.
//!
//! Loaded once at startup, written back whenever the user changes them.

use crate::kv::KeyValueDir;
use quill_core::Result;
use std::fmt;
use tracing::info;

pub const API_KEY_KEY: &str = "openai-api-key";
pub const SELECTED_MODEL_KEY: &str = "selected-model";

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub api_key: String,
    pub selected_model: Option<String>,
}

impl Settings {
    pub fn has_credential(&self) -> bool {
        !self.api_key.is_empty()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let api_key = if self.api_key.is_empty() { "<unset>" } else { "<redacted>" };
        f.debug_struct("Settings")
            .field("api_key", &api_key)
            .field("selected_model", &self.selected_model)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    kv: KeyValueDir,
}

impl SettingsStore {
    pub fn new(kv: KeyValueDir) -> Self {
        Self { kv }
    }

    pub fn load(&self) -> Result<Settings> {
        let api_key = self.kv.get::<String>(API_KEY_KEY)?.unwrap_or_default();
        let selected_model = self
            .kv
            .get::<String>(SELECTED_MODEL_KEY)?
            .filter(|m| !m.is_empty());

        Ok(Settings {
            api_key,
            selected_model,
        })
    }

    pub fn set_api_key(&self, api_key: &str) -> Result<()> {
        self.kv.set(API_KEY_KEY, api_key)?;
        info!("Updated API key");
        Ok(())
    }

    pub fn set_selected_model(&self, model_id: &str) -> Result<()> {
        self.kv.set(SELECTED_MODEL_KEY, model_id)?;
        info!("Selected model {}", model_id);
        Ok(())
    }
}
