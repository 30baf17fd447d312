use tricmp_common::{Blake3Hash, CacheKey, TricmpError};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

const CACHE_FILE: &str = "fingerprints.bin";

/// Full-content BLAKE3 fingerprints keyed by (path, size, mtime).
///
/// Shared between evaluation workers; a stale key (size or mtime changed)
/// simply misses. Disk persistence is optional.
#[derive(Clone)]
pub struct HashCache {
    cache_dir: Option<PathBuf>,
    memory_cache: Arc<RwLock<HashMap<CacheKey, Blake3Hash>>>,
}

impl HashCache {
    /// Cache that lives only as long as the process
    pub fn in_memory() -> Self {
        Self {
            cache_dir: None,
            memory_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Cache backed by `cache_dir`, loading previously persisted entries
    pub fn new(cache_dir: PathBuf) -> Result<Self, TricmpError> {
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }

        let mut memory_cache = HashMap::new();

        let cache_file = cache_dir.join(CACHE_FILE);
        if cache_file.exists() {
            match fs::read(&cache_file) {
                Ok(data) => match bincode::deserialize::<HashMap<CacheKey, Blake3Hash>>(&data) {
                    Ok(cached) => {
                        memory_cache = cached;
                        debug!("Loaded {} fingerprints from cache", memory_cache.len());
                    }
                    Err(e) => warn!("Discarding unreadable fingerprint cache: {}", e),
                },
                Err(e) => {
                    warn!("Failed to load cache file: {}", e);
                }
            }
        }

        Ok(Self {
            cache_dir: Some(cache_dir),
            memory_cache: Arc::new(RwLock::new(memory_cache)),
        })
    }

    pub fn get(&self, key: &CacheKey) -> Option<Blake3Hash> {
        self.memory_cache.read().ok()?.get(key).copied()
    }

    pub fn put(&self, key: CacheKey, hash: Blake3Hash) {
        if let Ok(mut cache) = self.memory_cache.write() {
            cache.insert(key, hash);
        }
    }

    /// Return the cached fingerprint or compute and remember it.
    /// The lock is not held while `compute` runs.
    pub fn get_or_compute<F>(&self, key: CacheKey, compute: F) -> Result<Blake3Hash, TricmpError>
    where
        F: FnOnce() -> Result<Blake3Hash, TricmpError>,
    {
        if let Some(hash) = self.get(&key) {
            debug!("Fingerprint cache hit for {:?}", key.path);
            return Ok(hash);
        }
        let hash = compute()?;
        self.put(key, hash);
        Ok(hash)
    }

    /// Persist cache to disk atomically. No-op for in-memory caches.
    pub fn persist(&self) -> Result<(), TricmpError> {
        let Some(cache_dir) = &self.cache_dir else {
            return Ok(());
        };
        let cache_file = cache_dir.join(CACHE_FILE);
        let temp_file = cache_dir.join(format!("{}.tmp", CACHE_FILE));

        let cache = self
            .memory_cache
            .read()
            .map_err(|e| TricmpError::Cache(format!("Lock error: {}", e)))?;

        let data = bincode::serialize(&*cache)
            .map_err(|e| TricmpError::Serialization(e.to_string()))?;

        fs::write(&temp_file, data)?;
        fs::rename(&temp_file, &cache_file)?;

        debug!("Persisted {} fingerprints to disk", cache.len());
        Ok(())
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.memory_cache.write() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.memory_cache.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
