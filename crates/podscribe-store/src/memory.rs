use crate::ObjectStore;
use async_trait::async_trait;
use podscribe_core::StoreError;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// In-memory object store for tests, mirroring the teacher's
/// `InMemoryEventBus`/in-memory-SQLite test-double convention. Every
/// integration test in this workspace uses this instead of a real bucket.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, as if it had been uploaded out-of-band.
    pub fn seed(&self, key: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .expect("object store mutex poisoned")
            .insert(key.into(), contents.into());
    }

    pub fn contents(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().expect("object store mutex poisoned").get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<String>, StoreError> {
        let objects = self.objects.lock().expect("object store mutex poisoned");
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| prefix.map(|p| k.starts_with(p)).unwrap_or(true))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn head(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.objects.lock().expect("object store mutex poisoned").contains_key(key))
    }

    async fn get(&self, key: &str, local_path: &Path) -> Result<(), StoreError> {
        let data = self
            .objects
            .lock()
            .expect("object store mutex poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::Failed {
                key: key.to_string(),
                kind: "not found".to_string(),
            })?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| StoreError::Failed {
                key: key.to_string(),
                kind: e.to_string(),
            })?;
        }
        let part_path = std::path::PathBuf::from(format!("{}.part", local_path.display()));
        tokio::fs::write(&part_path, &data).await.map_err(|e| StoreError::Failed {
            key: key.to_string(),
            kind: e.to_string(),
        })?;
        tokio::fs::rename(&part_path, local_path).await.map_err(|e| StoreError::Failed {
            key: key.to_string(),
            kind: e.to_string(),
        })?;
        Ok(())
    }

    async fn put(&self, key: &str, local_path: &Path) -> Result<(), StoreError> {
        let data = tokio::fs::read(local_path).await.map_err(|e| StoreError::Failed {
            key: key.to_string(),
            kind: e.to_string(),
        })?;
        self.objects.lock().expect("object store mutex poisoned").insert(key.to_string(), data);
        Ok(())
    }
}
