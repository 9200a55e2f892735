//! The on-disk expansion cache.

use std::fs;

use macroweave::cache::{compute_key, ExpansionCache, CACHE_FILE_NAME};

#[test]
fn test_entries_survive_a_flush_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let key = compute_key("dedent", "dedent`a`", &[]);

    let mut cache = ExpansionCache::load(dir.path());
    assert!(cache.is_empty());
    cache.set(&key, "`a`");
    cache.set_many("stmts", vec!["const a = 1;".into(), "const b = 2;".into()]);
    assert!(cache.flush());
    assert!(!cache.flush(), "nothing changed since the last write");
    assert!(dir.path().join(CACHE_FILE_NAME).exists());

    let mut reloaded = ExpansionCache::load(dir.path());
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded.get(&key).as_deref(), Some("`a`"));
    assert_eq!(reloaded.get_many("stmts").map(|t| t.len()), Some(2));
    assert_eq!(reloaded.stats().hits, 2);
}

#[test]
fn test_version_bump_evicts_old_entries() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = ExpansionCache::load_with_version(dir.path(), 1);
    cache.set("k", "1");
    assert!(cache.flush());

    let mut newer = ExpansionCache::load_with_version(dir.path(), 2);
    assert!(newer.is_empty());
    assert_eq!(newer.stats().evicted, 1);
    assert_eq!(newer.get("k"), None);
    // The eviction is written back on the next flush.
    assert!(newer.flush());
    assert!(ExpansionCache::load_with_version(dir.path(), 1).is_empty());
}

#[test]
fn test_corrupt_file_is_a_cold_cache() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(CACHE_FILE_NAME), "{ not json").unwrap();
    let mut cache = ExpansionCache::load(dir.path());
    assert!(cache.is_empty());
    assert_eq!(cache.get("anything"), None);
    cache.set("anything", "1");
    assert!(cache.flush());
    assert_eq!(ExpansionCache::load(dir.path()).len(), 1);
}

#[test]
fn test_clear_removes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = ExpansionCache::load(dir.path());
    cache.set("k", "v");
    cache.flush();
    cache.clear();
    assert!(cache.is_empty());
    assert!(!dir.path().join(CACHE_FILE_NAME).exists());
}

#[test]
fn test_in_memory_cache_never_writes() {
    let mut cache = ExpansionCache::in_memory();
    cache.set("k", "v");
    assert!(!cache.flush());
    assert!(cache.path().is_none());
    assert_eq!(cache.get("k").as_deref(), Some("v"));
}
