//! Persistent expansion cache.
//!
//! Maps a hash of a macro invocation to the text its expansion printed as.
//! The whole cache is one JSON object keyed by hash, loaded once when a
//! transformer starts and written once when it finishes. A missing, unreadable
//! or corrupt file is treated as an empty cache, and write failures only log:
//! the cache never fails a build.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Bumped whenever generated code changes shape; older entries are evicted.
pub const CACHE_VERSION: u32 = 1;

pub const DEFAULT_CACHE_DIR: &str = ".macroweave";
pub const CACHE_FILE_NAME: &str = "expansion-cache.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub input_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expanded_texts: Option<Vec<String>>,
    pub timestamp: u64,
    pub version: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evicted: u64,
}

#[derive(Debug, Clone)]
pub struct ExpansionCache {
    path: Option<PathBuf>,
    version: u32,
    entries: BTreeMap<String, CacheEntry>,
    stats: CacheStats,
    dirty: bool,
}

impl ExpansionCache {
    /// A cache that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            version: CACHE_VERSION,
            entries: BTreeMap::new(),
            stats: CacheStats::default(),
            dirty: false,
        }
    }

    /// Loads the cache file under `dir`.
    pub fn load(dir: &Path) -> Self {
        Self::load_with_version(dir, CACHE_VERSION)
    }

    pub fn load_with_version(dir: &Path, version: u32) -> Self {
        let path = dir.join(CACHE_FILE_NAME);
        let mut cache = Self {
            path: Some(path.clone()),
            version,
            ..Self::in_memory()
        };
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no expansion cache loaded");
                return cache;
            }
        };
        let entries: BTreeMap<String, CacheEntry> = match serde_json::from_str(&data) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt expansion cache");
                return cache;
            }
        };
        let before = entries.len();
        cache.entries = entries
            .into_iter()
            .filter(|(_, entry)| entry.version == version)
            .collect();
        let evicted = before - cache.entries.len();
        if evicted > 0 {
            cache.stats.evicted += evicted as u64;
            cache.dirty = true;
        }
        debug!(path = %path.display(), entries = cache.entries.len(), evicted, "expansion cache loaded");
        cache
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn lookup(&mut self, key: &str) -> Option<&CacheEntry> {
        let stale = match self.entries.get(key) {
            None => {
                self.stats.misses += 1;
                return None;
            }
            Some(entry) => entry.version != self.version,
        };
        if stale {
            self.entries.remove(key);
            self.stats.evicted += 1;
            self.stats.misses += 1;
            self.dirty = true;
            return None;
        }
        self.stats.hits += 1;
        self.entries.get(key)
    }

    /// Cached single expansion text.
    pub fn get(&mut self, key: &str) -> Option<String> {
        self.lookup(key).and_then(|e| e.expanded_text.clone())
    }

    /// Cached multi-statement expansion texts.
    pub fn get_many(&mut self, key: &str) -> Option<Vec<String>> {
        self.lookup(key).and_then(|e| e.expanded_texts.clone())
    }

    pub fn set(&mut self, key: &str, text: impl Into<String>) {
        self.insert(key, Some(text.into()), None);
    }

    pub fn set_many(&mut self, key: &str, texts: Vec<String>) {
        self.insert(key, None, Some(texts));
    }

    fn insert(&mut self, key: &str, text: Option<String>, texts: Option<Vec<String>>) {
        let entry = CacheEntry {
            input_hash: key.to_string(),
            expanded_text: text,
            expanded_texts: texts,
            timestamp: now_secs(),
            version: self.version,
        };
        self.entries.insert(key.to_string(), entry);
        self.dirty = true;
    }

    /// Drops every entry and deletes the cache file.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty = false;
        if let Some(path) = &self.path {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to delete expansion cache");
                }
            }
        }
    }

    /// Writes the cache if anything changed. Returns whether a file was
    /// written; failures are logged and reported as `false`.
    pub fn flush(&mut self) -> bool {
        let Some(path) = self.path.clone() else {
            return false;
        };
        if !self.dirty {
            return false;
        }
        match write_atomic(&path, &self.entries) {
            Ok(()) => {
                self.dirty = false;
                debug!(path = %path.display(), entries = self.entries.len(), "expansion cache written");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to write expansion cache");
                false
            }
        }
    }
}

fn write_atomic(path: &Path, entries: &BTreeMap<String, CacheEntry>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(entries).map_err(std::io::Error::other)?;
    let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
    fs::write(&tmp, json)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn hex_digest(hasher: Sha256) -> String {
    format!("{:x}", hasher.finalize())
}

/// Key for an expression macro call: its name, the full call text and the
/// text of each argument.
pub fn compute_key(name: &str, source_text: &str, arg_texts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"\0");
    hasher.update(source_text.as_bytes());
    for arg in arg_texts {
        hasher.update(b"\0");
        hasher.update(arg.as_bytes());
    }
    hex_digest(hasher)
}

/// Key for a derive: its name and a serialisable description of the target
/// that excludes source positions.
pub fn compute_structural_key<T: Serialize>(derive_name: &str, descriptor: &T) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"derive\0");
    hasher.update(derive_name.as_bytes());
    hasher.update(b"\0");
    // Descriptors are plain data; serialisation cannot fail for them.
    let json = serde_json::to_string(descriptor).unwrap_or_default();
    hasher.update(json.as_bytes());
    hex_digest(hasher)
}

/// Cache directory for a project rooted at `root`.
pub fn cache_dir_for(root: &Path, dir: Option<&Path>) -> PathBuf {
    match dir {
        Some(d) if d.is_absolute() => d.to_path_buf(),
        Some(d) => root.join(d),
        None => root.join(DEFAULT_CACHE_DIR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_depend_on_every_input() {
        let k = compute_key("m", "m(a, b)", &["a", "b"]);
        assert_eq!(k.len(), 64);
        assert_eq!(k, compute_key("m", "m(a, b)", &["a", "b"]));
        assert_ne!(k, compute_key("n", "m(a, b)", &["a", "b"]));
        assert_ne!(k, compute_key("m", "m(a, b)", &["ab"]));
    }

    #[test]
    fn test_structural_key_depends_on_name_and_shape() {
        #[derive(Serialize)]
        struct Shape<'a> {
            fields: Vec<&'a str>,
        }
        let a = compute_structural_key("Eq", &Shape { fields: vec!["x", "y"] });
        let b = compute_structural_key("Eq", &Shape { fields: vec!["x", "y"] });
        let c = compute_structural_key("Show", &Shape { fields: vec!["x", "y"] });
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_stale_entry_is_evicted_on_read() {
        let mut cache = ExpansionCache::in_memory();
        cache.set("k", "1 + 1");
        cache.version += 1;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evicted, 1);
    }

    #[test]
    fn test_hits_and_misses_are_counted() {
        let mut cache = ExpansionCache::in_memory();
        assert!(cache.get("missing").is_none());
        cache.set_many("k", vec!["a;".into(), "b;".into()]);
        assert_eq!(cache.get_many("k").unwrap().len(), 2);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, evicted: 0 });
        assert!(!cache.flush(), "in-memory caches never write");
    }
}
