//! Core registry implementation
//!
//! One mutex guards both the in-memory map and the file; every mutation
//! rewrites the whole document through a temp file and an atomic rename,
//! so readers never observe a half-written registry.

use crate::models::{RegistryEntry, ServiceStatus};
use crate::{Error, Result};
use futures::io::AsyncWriteExt;
use futures::lock::Mutex;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const REGISTRY_FILE: &str = "registry.json";

/// Crash-safe service registry backed by a single JSON document
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    inner: Mutex<HashMap<String, RegistryEntry>>,
}

impl Registry {
    /// Open (or create) the registry under a project-scoped directory.
    ///
    /// An unreadable or unparsable existing file fails the open; the
    /// caller decides what to do with a corrupt registry.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        async_fs::create_dir_all(dir).await?;
        async_fs::set_permissions(dir, std::fs::Permissions::from_mode(0o750)).await?;

        let path = dir.join(REGISTRY_FILE);
        let entries = match async_fs::read_to_string(&path).await {
            Ok(contents) => {
                serde_json::from_str::<HashMap<String, RegistryEntry>>(&contents).map_err(
                    |e| Error::Corrupt {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    },
                )?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(path = %path.display(), services = entries.len(), "registry opened");
        Ok(Self {
            path,
            inner: Mutex::new(entries),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a new service; fails if the name is already present
    pub async fn register(&self, entry: RegistryEntry) -> Result<()> {
        let mut entries = self.inner.lock().await;
        if entries.contains_key(&entry.name) {
            return Err(Error::Exists(entry.name));
        }
        debug!(service = %entry.name, status = ?entry.status, "registering service");
        entries.insert(entry.name.clone(), entry);
        self.persist(&entries).await
    }

    /// Insert or replace the entry for a service
    pub async fn upsert(&self, entry: RegistryEntry) -> Result<()> {
        let mut entries = self.inner.lock().await;
        debug!(service = %entry.name, status = ?entry.status, "upserting service");
        entries.insert(entry.name.clone(), entry);
        self.persist(&entries).await
    }

    /// Update only the status of a registered service
    pub async fn update_status(&self, name: &str, status: ServiceStatus) -> Result<()> {
        let mut entries = self.inner.lock().await;
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        debug!(service = name, from = ?entry.status, to = ?status, "status change");
        entry.status = status;
        self.persist(&entries).await
    }

    /// Fetch one entry
    pub async fn get(&self, name: &str) -> Result<RegistryEntry> {
        let entries = self.inner.lock().await;
        entries
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// All entries, sorted by name
    pub async fn list_all(&self) -> Vec<RegistryEntry> {
        let entries = self.inner.lock().await;
        let mut all: Vec<_> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Remove an entry
    pub async fn remove(&self, name: &str) -> Result<()> {
        let mut entries = self.inner.lock().await;
        if entries.remove(name).is_none() {
            return Err(Error::NotFound(name.to_string()));
        }
        self.persist(&entries).await
    }

    /// Write the whole document via temp file + atomic rename.
    ///
    /// Callers hold the map lock, which also serializes file access.
    async fn persist(&self, entries: &HashMap<String, RegistryEntry>) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)
            .expect("registry entries always serialize");
        let tmp = self.path.with_extension("json.tmp");

        let mut file = async_fs::File::create(&tmp).await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        async_fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).await?;
        async_fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
