// # File Resource Store
//
// File-based implementation of ResourceStore with crash recovery.
//
// ## Purpose
//
// Keeps objects across daemon restarts. Status records what this reconciler
// registered remotely, so losing it would orphan endpoints on delete.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "last_resource_version": 7,
//   "objects": [
//     {
//       "kind": "keystoneendpoint",
//       "metadata": { "name": "nova", "namespace": "openstack", ... },
//       "spec": { "serviceName": "nova", "endpoints": { ... } },
//       "status": { "serviceID": "...", "endpointIDs": { ... } }
//     }
//   ]
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{RwLock, broadcast};

use super::memory::{WATCH_CHANNEL_CAPACITY, watch_stream};
use super::table::ObjectTable;
use crate::Error;
use crate::resource::{ObjectKey, RawObject, ResourceKind};
use crate::traits::resource_store::{ResourceStore, WatchStream};

/// Store file format version
/// Used for future migration if format changes
const STORE_FILE_VERSION: &str = "1.0";

/// File-based resource store with crash recovery
///
/// Every successful write is persisted before the call returns. Writes are
/// serialized by the table lock, so the file always reflects a prefix of
/// the acknowledged writes. A write that fails to persist leaves both the
/// file and the in-memory table untouched.
///
/// # Example
///
/// ```rust,no_run
/// use keystone_endpoint_core::resource::{KeystoneApi, Resource};
/// use keystone_endpoint_core::store::FileResourceStore;
/// use keystone_endpoint_core::traits::ResourceStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileResourceStore::new("/var/lib/keystone-endpoint/store.json").await?;
///
///     // Created and atomically written to disk
///     let api = KeystoneApi::new("openstack", "keystone");
///     store.create(api.to_raw()?).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileResourceStore {
    path: PathBuf,
    table: Arc<RwLock<ObjectTable>>,
    events: broadcast::Sender<ObjectKey>,
}

/// Store file format, as read
#[derive(Debug, Deserialize)]
struct StoreFileFormat {
    version: String,
    #[serde(flatten)]
    table: ObjectTable,
}

/// Store file format, as written
#[derive(Debug, Serialize)]
struct StoreFileRef<'a> {
    version: &'a str,
    #[serde(flatten)]
    table: &'a ObjectTable,
}

impl FileResourceStore {
    /// Create or load a file resource store
    ///
    /// This will:
    /// 1. Try to load existing store file
    /// 2. If corruption detected, try to load from backup
    /// 3. If both fail, start with an empty store
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let table = Self::load_with_recovery(&path).await?;
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);

        Ok(Self {
            path,
            table: Arc::new(RwLock::new(table)),
            events,
        })
    }

    /// Load the table with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load main store file
    /// 2. If JSON parse error, try loading backup
    /// 3. If backup also fails, start with an empty store
    async fn load_with_recovery(path: &Path) -> Result<ObjectTable, Error> {
        match Self::load(path).await {
            Ok(table) => {
                tracing::debug!("Loaded store from file: {} objects", table.len());
                Ok(table)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Store file {} appears corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty store.");
                    return Ok(ObjectTable::default());
                }

                match Self::load(&backup_path).await {
                    Ok(table) => {
                        tracing::info!("Recovered store from backup: {} objects", table.len());

                        if let Err(restore_err) =
                            Self::restore_from_backup(path, &backup_path).await
                        {
                            tracing::error!(
                                "Failed to restore store file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(table)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unreadable: {}. Starting with empty store.",
                            backup_err
                        );
                        Ok(ObjectTable::default())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Load the table from file; parse failures surface as `Error::Json`
    async fn load(path: &Path) -> Result<ObjectTable, Error> {
        if !path.exists() {
            tracing::debug!("Store file does not exist: {}", path.display());
            return Ok(ObjectTable::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::store(format!(
                "Failed to read store file {}: {}",
                path.display(),
                e
            ))
        })?;

        let file: StoreFileFormat = serde_json::from_str(&content)?;

        if file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Store file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STORE_FILE_VERSION,
                file.version
            );
        }

        Ok(file.table)
    }

    /// Write the table to file atomically
    ///
    /// Called with the table lock held so concurrent writers cannot reorder
    /// file contents.
    async fn write(&self, table: &ObjectTable) -> Result<(), Error> {
        let file = StoreFileRef {
            version: STORE_FILE_VERSION,
            table,
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::store(format!("Failed to serialize store: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            temp.write_all(json.as_bytes()).await.map_err(|e| {
                Error::store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            temp.sync_all().await.map_err(|e| {
                Error::store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Store written to file: {}", self.path.display());
        Ok(())
    }

    /// Apply a mutation, persist it, and notify watchers
    ///
    /// The mutation runs on a copy; the copy replaces the live table only
    /// once it is on disk.
    async fn mutate<T>(
        &self,
        key: ObjectKey,
        op: impl FnOnce(&mut ObjectTable) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut table = self.table.write().await;
        let mut next = table.clone();
        let result = op(&mut next)?;
        self.write(&next).await?;
        *table = next;
        drop(table);

        let _ = self.events.send(key);
        Ok(result)
    }

    async fn restore_from_backup(path: &Path, backup_path: &Path) -> Result<(), Error> {
        fs::copy(backup_path, path).await.map_err(|e| {
            Error::store(format!(
                "Failed to restore from backup {} to {}: {}",
                backup_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!("Restored store file from backup");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl ResourceStore for FileResourceStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<RawObject>, Error> {
        Ok(self.table.read().await.get(key))
    }

    async fn create(&self, object: RawObject) -> Result<RawObject, Error> {
        self.mutate(object.key(), |table| table.create(object)).await
    }

    async fn update(&self, object: RawObject) -> Result<Option<RawObject>, Error> {
        self.mutate(object.key(), |table| table.update(object)).await
    }

    async fn patch_status(&self, object: RawObject) -> Result<RawObject, Error> {
        self.mutate(object.key(), |table| table.patch_status(object))
            .await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), Error> {
        self.mutate(key.clone(), |table| table.delete(key)).await
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<ObjectKey>, Error> {
        Ok(self.table.read().await.list(kind))
    }

    fn watch(&self) -> WatchStream {
        watch_stream(&self.events)
    }

    /// Every acknowledged write is already on disk
    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{
        KeystoneEndpoint, KeystoneEndpointSpec, Resource,
    };
    use tempfile::tempdir;

    fn endpoint() -> KeystoneEndpoint {
        KeystoneEndpoint::new(
            "openstack",
            "nova",
            KeystoneEndpointSpec::new("nova").with_endpoint("public", "http://nova"),
        )
    }

    #[tokio::test]
    async fn test_file_store_basic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileResourceStore::new(&path).await.unwrap();
        assert!(store.list(ResourceKind::KeystoneEndpoint).await.unwrap().is_empty());

        let created = store.create(endpoint().to_raw().unwrap()).await.unwrap();
        assert!(path.exists());

        // Load new instance and verify persistence
        let store2 = FileResourceStore::new(&path).await.unwrap();
        let loaded = store2.get(&created.key()).await.unwrap();
        assert_eq!(loaded, Some(created));
    }

    #[tokio::test]
    async fn test_file_store_failed_write_has_no_effect() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileResourceStore::new(&path).await.unwrap();

        // A directory in place of the temp file makes every write fail
        let blocker = store.temp_path();
        fs::create_dir(&blocker).await.unwrap();

        let raw = endpoint().to_raw().unwrap();
        assert!(store.create(raw.clone()).await.is_err());
        assert!(store.get(&raw.key()).await.unwrap().is_none());
        assert!(store.list(ResourceKind::KeystoneEndpoint).await.unwrap().is_empty());

        fs::remove_dir(&blocker).await.unwrap();
        let created = store.create(raw).await.unwrap();

        fs::create_dir(&blocker).await.unwrap();
        let mut status_change = created.clone();
        status_change.status = serde_json::json!({"serviceID": "svc"});
        assert!(store.patch_status(status_change).await.is_err());
        assert!(store.delete(&created.key()).await.is_err());

        let current = store.get(&created.key()).await.unwrap().unwrap();
        assert_eq!(current, created);

        fs::remove_dir(&blocker).await.unwrap();
        let reloaded = FileResourceStore::new(&path).await.unwrap();
        assert_eq!(reloaded.get(&created.key()).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn test_file_store_reload_keeps_foreign_finalizers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileResourceStore::new(&path).await.unwrap();
        let created = store.create(endpoint().to_raw().unwrap()).await.unwrap();
        drop(store);

        let content = fs::read_to_string(&path).await.unwrap();
        let mut file: serde_json::Value = serde_json::from_str(&content).unwrap();
        file["objects"][0]["metadata"]["finalizers"] = serde_json::json!(["kubernetes"]);
        fs::write(&path, serde_json::to_vec(&file).unwrap()).await.unwrap();

        let reloaded = FileResourceStore::new(&path).await.unwrap();
        let object = reloaded.get(&created.key()).await.unwrap().unwrap();
        assert_eq!(
            serde_json::to_value(&object.metadata.finalizers).unwrap(),
            serde_json::json!(["kubernetes"])
        );
    }

    #[tokio::test]
    async fn test_file_store_keeps_resource_versions_monotonic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileResourceStore::new(&path).await.unwrap();
        let created = store.create(endpoint().to_raw().unwrap()).await.unwrap();
        drop(store);

        let store2 = FileResourceStore::new(&path).await.unwrap();
        let patched = store2.patch_status(created.clone()).await.unwrap();
        assert!(patched.metadata.resource_version > created.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_file_store_corruption_recovery() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileResourceStore::new(&path).await.unwrap();
        let created = store.create(endpoint().to_raw().unwrap()).await.unwrap();

        // Write again to ensure backup holds the first state
        let mut status_change = created.clone();
        status_change.status = serde_json::json!({"serviceID": "svc"});
        store.patch_status(status_change).await.unwrap();

        let backup_path = FileResourceStore::backup_path(&path);
        assert!(backup_path.exists(), "Backup file should exist after write");

        fs::write(&path, b"corrupted json data").await.unwrap();

        let store2 = FileResourceStore::new(&path).await.unwrap();
        let recovered = store2.get(&created.key()).await.unwrap().unwrap();
        // Backup holds the state before the last write
        assert_eq!(recovered.status, created.status);
    }

    #[tokio::test]
    async fn test_file_store_unreadable_without_backup_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, b"{not json").await.unwrap();

        let store = FileResourceStore::new(&path).await.unwrap();
        assert!(store.list(ResourceKind::KeystoneEndpoint).await.unwrap().is_empty());
    }
}
