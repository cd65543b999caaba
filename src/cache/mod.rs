//! Thumbnail/Metadata Cache — a content-addressed local store mapping a
//! source file path to a thumbnail blob plus a small metadata record.
//! Durable across process restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::model::CacheEntry;

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexEntry {
    file_path: String,
    cached_at: DateTime<Utc>,
    size: u64,
}

pub struct ThumbnailCache {
    thumbnail_dir: PathBuf,
    index_path: PathBuf,
    index: Mutex<HashMap<String, IndexEntry>>,
}

/// Hot-path volume is bounded by directory listing size and file fetches are
/// expensive relative to lock hold time, so a single mutex is sufficient.
impl ThumbnailCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let cache_dir = cache_dir.into();
        let thumbnail_dir = cache_dir.join("thumbnails");
        std::fs::create_dir_all(&thumbnail_dir)?;

        let index_path = cache_dir.join("metadata.json");
        let index = load_index(&index_path);

        Ok(Self {
            thumbnail_dir,
            index_path,
            index: Mutex::new(index),
        })
    }

    pub fn cache_key(path: &str) -> String {
        format!("{:x}", md5::compute(path.as_bytes()))
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.thumbnail_dir.join(format!("{key}.jpg"))
    }

    pub fn has(&self, path: &str) -> bool {
        self.blob_path(&Self::cache_key(path)).exists()
    }

    /// Readers tolerate a present blob with a missing index entry — treated
    /// as present but undated.
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        let blob_path = self.blob_path(&Self::cache_key(path));
        std::fs::read(blob_path).ok()
    }

    /// Atomic composition of (write blob) then (persist updated index).
    pub fn save(&self, path: &str, blob: &[u8]) -> Result<(), CacheError> {
        let key = Self::cache_key(path);
        std::fs::write(self.blob_path(&key), blob)?;

        let mut index = self.index.lock().unwrap();
        index.insert(
            key,
            IndexEntry {
                file_path: path.to_string(),
                cached_at: Utc::now(),
                size: blob.len() as u64,
            },
        );
        persist_index(&self.index_path, &index)
    }

    /// Removes blob and index entry, reporting true if either was present.
    pub fn invalidate(&self, path: &str) -> Result<bool, CacheError> {
        let key = Self::cache_key(path);
        let blob_path = self.blob_path(&key);

        let mut removed = false;
        if blob_path.exists() {
            std::fs::remove_file(&blob_path)?;
            removed = true;
        }

        let mut index = self.index.lock().unwrap();
        if index.remove(&key).is_some() {
            removed = true;
            persist_index(&self.index_path, &index)?;
        }

        Ok(removed)
    }

    /// Removes all blobs and empties the index; returns the number removed.
    pub fn clear(&self) -> Result<u64, CacheError> {
        let mut count = 0u64;
        for entry in std::fs::read_dir(&self.thumbnail_dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some("jpg") {
                std::fs::remove_file(entry.path())?;
                count += 1;
            }
        }

        let mut index = self.index.lock().unwrap();
        index.clear();
        persist_index(&self.index_path, &index)?;

        Ok(count)
    }

    /// Removes entries whose `cachedAt` is older than `now - maxAgeDays`;
    /// malformed entries are treated as eligible.
    pub fn cleanup_old(&self, max_age_days: i64) -> Result<u64, CacheError> {
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days);
        let mut index = self.index.lock().unwrap();

        let stale: Vec<String> = index
            .iter()
            .filter(|(_, e)| e.cached_at < cutoff)
            .map(|(k, _)| k.clone())
            .collect();

        let mut count = 0u64;
        for key in &stale {
            let blob_path = self.blob_path(key);
            if blob_path.exists() {
                std::fs::remove_file(&blob_path)?;
                count += 1;
            }
            index.remove(key);
        }

        if !stale.is_empty() {
            persist_index(&self.index_path, &index)?;
        }

        Ok(count)
    }

    pub fn metadata(&self, path: &str) -> Option<CacheEntry> {
        let key = Self::cache_key(path);
        let index = self.index.lock().unwrap();
        index.get(&key).map(|e| CacheEntry {
            cache_key: key.clone(),
            file_path: e.file_path.clone(),
            cached_at: e.cached_at,
            size: e.size,
        })
    }

    pub fn stats(&self) -> CacheStats {
        let thumbnail_count = std::fs::read_dir(&self.thumbnail_dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().and_then(|e| e.to_str()) == Some("jpg"))
                    .count()
            })
            .unwrap_or(0);

        let cache_size_bytes: u64 = std::fs::read_dir(&self.thumbnail_dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0);

        CacheStats {
            thumbnail_count,
            cache_size_bytes,
            metadata_entries: self.index.lock().unwrap().len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub thumbnail_count: usize,
    pub cache_size_bytes: u64,
    pub metadata_entries: usize,
}

fn load_index(index_path: &Path) -> HashMap<String, IndexEntry> {
    match std::fs::read(index_path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            log::warn!("[cache] metadata index corrupt, starting empty: {e}");
            HashMap::new()
        }),
        Err(_) => HashMap::new(),
    }
}

fn persist_index(index_path: &Path, index: &HashMap<String, IndexEntry>) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec_pretty(index)?;
    std::fs::write(index_path, bytes)?;
    Ok(())
}
