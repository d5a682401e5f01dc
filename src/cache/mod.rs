// Certificate metadata cache
//
// Path-keyed table of {fingerprint, modification time, size} with JSON persistence.
// Lets the scanner skip files whose stat metadata did not change since the last pass.
// Content changes that keep both modification time and size are not detected.

use crate::error::{CertWatchError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Cached metadata for one certificate file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheEntry {
    pub fingerprint: [u8; 32],
    pub mod_time: DateTime<Utc>,
    pub size: u64,
}

impl CacheEntry {
    /// True when the file's current stat matches what was cached
    pub fn is_unchanged(&self, stat: &FileStat) -> bool {
        self.mod_time == stat.mod_time && self.size == stat.size
    }
}

/// Stat information captured alongside a cache lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub mod_time: DateTime<Utc>,
    pub size: u64,
}

impl FileStat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path).map_err(|e| CertWatchError::io(path, e))?;
        let modified = meta.modified().map_err(|e| CertWatchError::io(path, e))?;
        Ok(Self {
            mod_time: DateTime::<Utc>::from(modified),
            size: meta.len(),
        })
    }
}

/// Shared certificate cache, guarded by one table-wide reader/writer lock
#[derive(Debug, Default)]
pub struct CertCache {
    file_path: Option<PathBuf>,
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
}

impl CertCache {
    /// Create an empty cache persisted at `file_path` (`None` disables persistence)
    pub fn new(file_path: Option<PathBuf>) -> Self {
        Self {
            file_path,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PathBuf, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PathBuf, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the table from disk.
    ///
    /// A missing or unreadable file keeps the current table. A file that cannot
    /// be parsed resets the table to empty.
    pub fn load(&self) {
        let Some(path) = self.file_path.as_deref() else {
            tracing::debug!("No cache file configured, skipping cache load");
            return;
        };

        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                tracing::info!(path = %path.display(), "No existing cache file or read error: {}", e);
                return;
            }
        };

        let mut entries = self.write();
        match serde_json::from_slice::<HashMap<PathBuf, CacheEntry>>(&data) {
            Ok(loaded) => {
                *entries = loaded;
                tracing::info!(entries = entries.len(), "Loaded certificate cache from file");
            }
            Err(e) => {
                entries.clear();
                tracing::warn!(path = %path.display(), "Failed to parse cache file, starting empty: {}", e);
            }
        }
    }

    /// Persist the table, logging failures
    pub fn save(&self) {
        if let Err(e) = self.try_save() {
            tracing::warn!("Failed to save certificate cache: {}", e);
        }
    }

    /// Persist the table as pretty-printed JSON, creating parent directories.
    ///
    /// The snapshot is taken under the read lock; I/O happens after it is released.
    pub fn try_save(&self) -> Result<()> {
        let Some(path) = self.file_path.as_deref() else {
            tracing::debug!("No cache file configured, skipping cache save");
            return Ok(());
        };

        let snapshot: BTreeMap<PathBuf, CacheEntry> = self
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let data = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).map_err(|e| CertWatchError::io(dir, e))?;
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &data).map_err(|e| CertWatchError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| CertWatchError::io(path, e))?;

        tracing::debug!(path = %path.display(), entries = snapshot.len(), "Saved certificate cache");
        Ok(())
    }

    /// Stat `path` and look up its cached entry.
    ///
    /// Fails only when the stat fails.
    pub fn get_entry_atomic(&self, path: &Path) -> Result<(Option<CacheEntry>, FileStat)> {
        let stat = FileStat::from_path(path)?;
        let cached = self.read().get(path).cloned();
        Ok((cached, stat))
    }

    /// Insert or replace the entry for `path`
    pub fn set_entry_atomic(&self, path: &Path, fingerprint: [u8; 32], stat: FileStat) {
        self.write().insert(
            path.to_path_buf(),
            CacheEntry {
                fingerprint,
                mod_time: stat.mod_time,
                size: stat.size,
            },
        );
    }

    pub fn get(&self, path: &Path) -> Option<CacheEntry> {
        self.read().get(path).cloned()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Drop entries whose file can no longer be stat'ed. Returns how many were removed.
    pub fn prune_non_existing(&self) -> usize {
        let start = Instant::now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|path, _| fs::metadata(path).is_ok());
        let pruned = before - entries.len();

        if pruned > 0 {
            tracing::info!(
                removed = pruned,
                duration_ms = start.elapsed().as_millis() as u64,
                "Pruned stale cache entries"
            );
        } else {
            tracing::debug!("No stale cache entries to prune");
        }

        pruned
    }

    /// Snapshot of every cached path
    pub fn get_paths(&self) -> Vec<PathBuf> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stat_of(path: &Path) -> FileStat {
        FileStat::from_path(path).unwrap()
    }

    #[test]
    fn test_get_entry_atomic_missing_file() {
        let cache = CertCache::new(None);
        let err = cache
            .get_entry_atomic(Path::new("/nonexistent/cert.pem"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_set_then_get() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.pem");
        fs::write(&file, b"certificate bytes").unwrap();

        let cache = CertCache::new(None);
        let (cached, stat) = cache.get_entry_atomic(&file).unwrap();
        assert!(cached.is_none());
        assert_eq!(stat.size, 17);

        cache.set_entry_atomic(&file, [7u8; 32], stat);
        let (cached, stat) = cache.get_entry_atomic(&file).unwrap();
        let cached = cached.unwrap();
        assert!(cached.is_unchanged(&stat));
        assert_eq!(cached.fingerprint, [7u8; 32]);
    }

    #[test]
    fn test_size_change_invalidates() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.pem");
        fs::write(&file, b"one").unwrap();

        let cache = CertCache::new(None);
        cache.set_entry_atomic(&file, [1u8; 32], stat_of(&file));

        fs::write(&file, b"three").unwrap();
        let (cached, stat) = cache.get_entry_atomic(&file).unwrap();
        assert!(!cached.unwrap().is_unchanged(&stat));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache_file = dir.path().join("nested/state/cache.json");

        let cache = CertCache::new(Some(cache_file.clone()));
        for i in 0..5u8 {
            let file = dir.path().join(format!("cert{}.pem", i));
            fs::write(&file, vec![i; 10 + i as usize]).unwrap();
            let mut fingerprint = [0u8; 32];
            fingerprint[0] = i;
            fingerprint[31] = 255 - i;
            cache.set_entry_atomic(&file, fingerprint, stat_of(&file));
        }
        cache.try_save().unwrap();
        assert!(cache_file.exists());

        let restored = CertCache::new(Some(cache_file));
        restored.load();
        assert_eq!(restored.len(), 5);
        for path in cache.get_paths() {
            assert_eq!(restored.get(&path), cache.get(&path));
        }
    }

    #[test]
    fn test_persisted_shape() {
        let dir = TempDir::new().unwrap();
        let cache_file = dir.path().join("cache.json");
        let file = dir.path().join("a.pem");
        fs::write(&file, b"x").unwrap();

        let cache = CertCache::new(Some(cache_file.clone()));
        cache.set_entry_atomic(&file, [3u8; 32], stat_of(&file));
        cache.try_save().unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&cache_file).unwrap()).unwrap();
        let entry = &value[file.to_str().unwrap()];
        assert_eq!(entry["Fingerprint"].as_array().unwrap().len(), 32);
        assert!(entry["ModTime"].is_string());
        assert_eq!(entry["Size"], 1);
    }

    #[test]
    fn test_corrupt_cache_resets() {
        let dir = TempDir::new().unwrap();
        let cache_file = dir.path().join("cache.json");
        let file = dir.path().join("a.pem");
        fs::write(&file, b"x").unwrap();

        let cache = CertCache::new(Some(cache_file.clone()));
        cache.set_entry_atomic(&file, [3u8; 32], stat_of(&file));

        fs::write(&cache_file, b"{ not json").unwrap();
        cache.load();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_cache_file_keeps_table() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.pem");
        fs::write(&file, b"x").unwrap();

        let cache = CertCache::new(Some(dir.path().join("absent.json")));
        cache.set_entry_atomic(&file, [3u8; 32], stat_of(&file));
        cache.load();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_prune_and_clear() {
        let dir = TempDir::new().unwrap();
        let keep = dir.path().join("keep.pem");
        let gone = dir.path().join("gone.pem");
        fs::write(&keep, b"k").unwrap();
        fs::write(&gone, b"g").unwrap();

        let cache = CertCache::new(None);
        cache.set_entry_atomic(&keep, [1u8; 32], stat_of(&keep));
        cache.set_entry_atomic(&gone, [2u8; 32], stat_of(&gone));

        fs::remove_file(&gone).unwrap();
        assert_eq!(cache.prune_non_existing(), 1);
        assert_eq!(cache.get_paths(), vec![keep.clone()]);
        assert_eq!(cache.prune_non_existing(), 0);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_save_without_path_is_noop() {
        let cache = CertCache::new(None);
        assert!(cache.try_save().is_ok());
        cache.load();
        assert!(cache.is_empty());
    }
}
