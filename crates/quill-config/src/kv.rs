//! Device-local key-value storage.
//!
//! Each key maps to one JSON document in a directory. Writes go through a
//! temporary file in the same directory and are renamed into place, so readers
//! never observe a half-written record.

use quill_core::{ChatError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct KeyValueDir {
    dir: PathBuf,
}

impl KeyValueDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe_key = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect::<String>();
        self.dir.join(format!("{safe_key}.json"))
    }

    /// Reads the record under `key`; a missing record is `Ok(None)`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ChatError::StoreRead(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let value = serde_json::from_str(&json).map_err(|e| {
            ChatError::StoreRead(format!("Corrupt record {}: {}", path.display(), e))
        })?;
        Ok(Some(value))
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let write_err =
            |e: std::io::Error| ChatError::StoreWrite(format!("Failed to write {key}: {e}"));

        fs::create_dir_all(&self.dir).map_err(write_err)?;
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| ChatError::StoreWrite(format!("Failed to encode {key}: {e}")))?;

        let mut temp_file = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        temp_file.write_all(json.as_bytes()).map_err(write_err)?;
        temp_file.as_file_mut().sync_all().map_err(write_err)?;
        temp_file
            .persist(self.path_for(key))
            .map_err(|e| write_err(e.error))?;

        debug!("Wrote key-value record {}", key);
        Ok(())
    }
}
