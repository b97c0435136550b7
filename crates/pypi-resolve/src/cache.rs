//! A lazily-loaded, write-through, single-file-per-kind persistent cache.
//!
//! Grounded on `examples/original_source/pypi2nix/caching.py`'s
//! `PersistentCache` (lazy load, `__format__` sentinel, full-snapshot
//! write-through) for semantics, and on
//! `rattler_installs_packages/src/index/file_store.rs`'s `fs4`-based locking
//! and temp-file-then-rename discipline for the on-disk mechanics.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs4::FileExt;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

const FORMAT_VERSION: u64 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("i/o error accessing cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A `{key -> value}` map persisted as a single JSON file, loaded lazily on
/// first access and rewritten in full on every mutation.
pub struct PersistentCache {
    path: PathBuf,
    state: Mutex<Option<BTreeMap<String, Value>>>,
}

impl PersistentCache {
    pub fn new(path: impl Into<PathBuf>) -> PersistentCache {
        PersistentCache {
            path: path.into(),
            state: Mutex::new(None),
        }
    }

    fn ensure_loaded(&self) -> Result<(), CacheError> {
        let mut guard = self.state.lock();
        if guard.is_some() {
            return Ok(());
        }
        let loaded = match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let mut doc: BTreeMap<String, Value> =
                    serde_json::from_str(&contents).map_err(|source| CacheError::Corrupt {
                        path: self.path.clone(),
                        source,
                    })?;
                // A file without (or with a stale) `__format__` sentinel is
                // treated as absent rather than causing a hard failure.
                match doc.get("__format__").and_then(Value::as_u64) {
                    Some(v) if v == FORMAT_VERSION => {
                        doc.remove("__format__");
                        doc
                    }
                    _ => BTreeMap::new(),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        *guard = Some(loaded);
        Ok(())
    }

    /// Look up `key`, deserializing the stored JSON value.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        self.ensure_loaded()?;
        let guard = self.state.lock();
        let map = guard.as_ref().expect("just loaded");
        map.get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|source| CacheError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    /// Insert `key -> value`, persisting the full snapshot (write-through).
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        self.ensure_loaded()?;
        let mut guard = self.state.lock();
        let map = guard.as_mut().expect("just loaded");
        let encoded = serde_json::to_value(value).map_err(|source| CacheError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        map.insert(key.to_string(), encoded);
        self.persist(map)
    }

    fn persist(&self, map: &BTreeMap<String, Value>) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut with_sentinel = map.clone();
        with_sentinel.insert("__format__".to_string(), Value::from(FORMAT_VERSION));

        let tmp_path = self.tmp_path();
        let lock_path = self.lock_path();
        let lock_file = File::create(&lock_path).map_err(|source| CacheError::Io {
            path: lock_path.clone(),
            source,
        })?;
        lock_file.lock_exclusive().map_err(|source| CacheError::Io {
            path: lock_path.clone(),
            source,
        })?;

        let write_result = (|| -> Result<(), CacheError> {
            let mut tmp = File::create(&tmp_path).map_err(|source| CacheError::Io {
                path: tmp_path.clone(),
                source,
            })?;
            let body = serde_json::to_vec_pretty(&with_sentinel).map_err(|source| {
                CacheError::Corrupt {
                    path: self.path.clone(),
                    source,
                }
            })?;
            tmp.write_all(&body).map_err(|source| CacheError::Io {
                path: tmp_path.clone(),
                source,
            })?;
            tmp.sync_data().map_err(|source| CacheError::Io {
                path: tmp_path.clone(),
                source,
            })?;
            std::fs::rename(&tmp_path, &self.path).map_err(|source| CacheError::Io {
                path: self.path.clone(),
                source,
            })?;
            Ok(())
        })();

        let _ = lock_file.unlock();
        write_result
    }

    fn tmp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!("{file_name}.{}.tmp", std::process::id()))
    }

    fn lock_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!("{file_name}.lock"))
    }

    /// Remove the backing file and clear the in-memory map.
    pub fn empty(&self) -> Result<(), CacheError> {
        let mut guard = self.state.lock();
        *guard = Some(BTreeMap::new());
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Canonicalize a compound (e.g. override-dict) cache key component into a
/// stable string, so two structurally-equal maps always produce the same
/// key regardless of construction order. Grounded on SPEC_FULL.md §9's
/// "hashable compound keys" note.
pub fn canonical_key(parts: &[&str]) -> String {
    parts.join("\u{1f}")
}

/// Turn a JSON object into a canonical `key=value` form (sorted by key),
/// the "hashable map" helper SPEC_FULL.md §4.3 calls for.
pub fn hashable_map(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, String)> = map
                .iter()
                .map(|(k, v)| (k.clone(), hashable_map(v)))
                .collect();
            entries.sort();
            let joined = entries
                .into_iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            format!("{{{joined}}}")
        }
        Value::Array(items) => {
            let joined = items.iter().map(hashable_map).collect::<Vec<_>>().join(",");
            format!("[{joined}]")
        }
        other => other.to_string(),
    }
}

/// The set of per-environment caches a [`crate::manager::PackageManager`]
/// needs, grouped so the orchestrator can open/empty them together.
pub struct CacheSet {
    pub links: PersistentCache,
    pub deps: PersistentCache,
    pub pkg_info: PersistentCache,
    pub versions: PersistentCache,
}

impl CacheSet {
    pub fn open(root: &Path, env: &str) -> CacheSet {
        CacheSet {
            links: PersistentCache::new(root.join("link_cache.json")),
            deps: PersistentCache::new(root.join(format!("{env}-deps.json"))),
            pkg_info: PersistentCache::new(root.join(format!("{env}-pkginfo.json"))),
            versions: PersistentCache::new(root.join(format!("{env}-versions.json"))),
        }
    }

    pub fn invalidate_links(&self) -> Result<(), CacheError> {
        self.links.empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::new(dir.path().join("c.json"));
        cache.set("foo", &vec!["a".to_string(), "b".to_string()]).unwrap();
        drop(cache);

        let reopened = PersistentCache::new(dir.path().join("c.json"));
        let value: Vec<String> = reopened.get("foo").unwrap().unwrap();
        assert_eq!(value, vec!["a", "b"]);
    }

    #[test]
    fn missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::new(dir.path().join("c.json"));
        assert!(cache.get::<String>("nope").unwrap().is_none());
    }

    #[test]
    fn empty_removes_backing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        let cache = PersistentCache::new(path.clone());
        cache.set("foo", &1u64).unwrap();
        assert!(path.exists());
        cache.empty().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn hashable_map_is_order_independent() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(hashable_map(&a), hashable_map(&b));
    }
}
