//! Tile persistence.
//!
//! The tile list lives under a single string key as a JSON array of
//! `{"title": ..., "gurl": ...}` records.

use crate::{Error, Result, Tile};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Minimal string key-value backend
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory backend, mostly for tests and the CLI's dry runs
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self.map.lock().unwrap_or_else(|p| p.into_inner());
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.map.lock().unwrap_or_else(|p| p.into_inner());
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.map.lock().unwrap_or_else(|p| p.into_inner());
        map.remove(key);
        Ok(())
    }
}

/// A JSON object file on disk. Writes go through a temp file and a rename.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) if s.trim().is_empty() => Ok(HashMap::new()),
            Ok(s) => serde_json::from_str(&s)
                .map_err(|e| Error::Storage(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, map: &HashMap<String, String>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        let data = serde_json::to_string_pretty(map)
            .map_err(|e| Error::Storage(e.to_string()))?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _g = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self.load()?.remove(key))
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let _g = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut map = self.load()?;
        map.insert(key.to_string(), value.to_string());
        self.save(&map)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _g = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut map = self.load()?;
        if map.remove(key).is_some() {
            self.save(&map)?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TileRecord {
    title: String,
    gurl: String,
}

/// Invoked after every successful write
pub type ChangeHandler = Arc<dyn Fn() + Send + Sync>;

/// Ordered tile list persisted as one JSON string.
///
/// Clones share the backend and the change listener.
#[derive(Clone)]
pub struct TileStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
    on_change: Arc<Mutex<Option<ChangeHandler>>>,
}

impl TileStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, key: &str) -> Self {
        Self {
            kv,
            key: key.to_string(),
            on_change: Arc::new(Mutex::new(None)),
        }
    }

    /// Register the render-refresh signal fired after writes.
    pub fn set_on_change<F>(&self, cb: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_change.lock().unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(cb));
    }

    pub fn clear_on_change(&self) {
        *self.on_change.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    /// Persist `tiles` as given (duplicates included) and signal a refresh.
    pub fn write(&self, tiles: &[Tile]) -> Result<()> {
        let records: Vec<TileRecord> = tiles
            .iter()
            .map(|t| TileRecord {
                title: t.title.clone(),
                gurl: t.url.clone(),
            })
            .collect();
        let json = serde_json::to_string(&records).map_err(|e| Error::Storage(e.to_string()))?;
        self.kv.put(&self.key, &json)?;
        log::debug!("stored {} tiles under '{}'", tiles.len(), self.key);
        self.notify();
        Ok(())
    }

    /// Remove the stored list and signal a refresh.
    pub fn clear(&self) -> Result<()> {
        self.kv.remove(&self.key)?;
        self.notify();
        Ok(())
    }

    /// Load the tile list. Never fails: unreadable data yields an empty list.
    pub fn read(&self) -> Vec<Tile> {
        match self.try_read() {
            Ok(tiles) => tiles,
            Err(e) => {
                log::warn!("discarding stored tiles under '{}': {}", self.key, e);
                Vec::new()
            }
        }
    }

    /// Load the tile list, reporting backend and document-level failures.
    ///
    /// Individual malformed records are skipped; the rest are kept.
    pub fn try_read(&self) -> Result<Vec<Tile>> {
        let raw = match self.kv.get(&self.key)? {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => return Ok(Vec::new()),
        };

        let values: Vec<serde_json::Value> = serde_json::from_str(&raw)?;
        let mut tiles = Vec::with_capacity(values.len());
        for (idx, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<TileRecord>(value) {
                Ok(rec) => tiles.push(Tile::new(rec.title, rec.gurl)),
                Err(e) => log::warn!("skipping malformed tile record {}: {}", idx, e),
            }
        }
        Ok(tiles)
    }

    fn notify(&self) {
        // Clone out so the listener may touch the store itself
        let cb = self.on_change.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(cb) = cb {
            cb();
        }
    }
}
