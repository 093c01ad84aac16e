//! JSON file standing in for the extension's local storage.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value};

use cg_background::{HostError, StorageArea};

pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_all(&self) -> Result<Map<String, Value>, HostError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(HostError::Storage(format!(
                    "Failed to read '{}': {}",
                    self.path.display(),
                    e
                )))
            }
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&text)? {
            Value::Object(map) => Ok(map),
            other => Err(HostError::Decode(format!(
                "'{}' is not a JSON object: {}",
                self.path.display(),
                other
            ))),
        }
    }
}

#[async_trait(?Send)]
impl StorageArea for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, HostError> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), HostError> {
        let mut items = self.read_all().await?;
        items.insert(key.to_string(), value);
        let text = serde_json::to_string_pretty(&Value::Object(items))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HostError::Storage(format!("Failed to create '{}': {}", parent.display(), e)))?;
        }
        tokio::fs::write(&self.path, text)
            .await
            .map_err(|e| HostError::Storage(format!("Failed to write '{}': {}", self.path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_background::store::{load_whitelist, persist_whitelist};
    use cg_core::whitelist::Whitelist;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cg-cli-{}-{}.json", name, std::process::id()))
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let storage = FileStorage::new(temp_path("missing"));
        assert_eq!(storage.get("whitelisted_domains").await, Ok(None));
    }

    #[tokio::test]
    async fn whitelist_survives_round_trip() {
        let path = temp_path("roundtrip");
        let storage = FileStorage::new(&path);
        storage.set("other", Value::Bool(true)).await.unwrap();

        let whitelist = Whitelist::from_domains(["a.com", "b.org"]);
        persist_whitelist(&storage, "whitelisted_domains", &whitelist)
            .await
            .unwrap();
        let loaded = load_whitelist(&storage, "whitelisted_domains").await.unwrap();
        assert_eq!(loaded, Some(whitelist));
        assert_eq!(storage.get("other").await, Ok(Some(Value::Bool(true))));

        let _ = std::fs::remove_file(path);
    }
}
