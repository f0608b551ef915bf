pub mod catalog;
pub mod local;
pub mod remote;

pub use catalog::{find_model, ConfiguredCatalog};
pub use local::{LocalStore, CONVERSATIONS_KEY};
pub use remote::RemoteStore;

use quill_config::{AppConfig, KeyValueDir, StorageSettings};
use quill_core::{ConversationStore, ModelCatalog, Result};
use std::sync::Arc;
use tracing::info;

/// The persistence pair chosen at startup.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn ConversationStore>,
    pub catalog: Arc<dyn ModelCatalog>,
}

/// Builds the configured backend. This is the only place that knows which
/// implementation is active.
pub fn open_backend(config: &AppConfig) -> Result<Backend> {
    match &config.storage {
        StorageSettings::Local { path } => {
            let dir = path.clone().unwrap_or_else(|| config.storage_dir());
            info!("Using local conversation store at {:?}", dir);
            Ok(Backend {
                store: Arc::new(LocalStore::new(KeyValueDir::new(dir))),
                catalog: Arc::new(ConfiguredCatalog::new(config.models.clone())),
            })
        }
        StorageSettings::Remote(remote) => {
            let store = Arc::new(RemoteStore::new(remote)?);
            Ok(Backend {
                store: store.clone(),
                catalog: store,
            })
        }
    }
}
