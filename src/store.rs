//! # Config Store
//! Key-value persistence behind the detectors' runtime configuration.
//!
//! Configs are whole JSON documents: reads return the full object, writes
//! replace it (last-writer-wins). Missing keys are served from built-in
//! defaults and written back on first read, so a fresh deployment is fully
//! configured without any admin action.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

pub trait KeyValueStore: Send + Sync {
    fn get_raw(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn put_raw(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// In-memory store. Default for tests and single-process dev runs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_raw(&self, key: &str) -> anyhow::Result<Option<String>> {
        let g = self.inner.lock().expect("memory store mutex poisoned");
        Ok(g.get(key).cloned())
    }

    fn put_raw(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut g = self.inner.lock().expect("memory store mutex poisoned");
        g.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut g = self.inner.lock().expect("memory store mutex poisoned");
        g.remove(key);
        Ok(())
    }
}

/// One JSON file per key under a base directory, written atomically
/// (tmp + rename) so a crashed write never leaves a truncated config.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let _ = fs::create_dir_all(&dir); // best-effort
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are internal identifiers; strip anything path-hostile.
        let safe: String = key
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get_raw(&self, key: &str) -> anyhow::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put_raw(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp)?;
        f.write_all(value.as_bytes())?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Typed facade over a [`KeyValueStore`]: JSON in, JSON out.
pub struct ConfigStore {
    store: Box<dyn KeyValueStore>,
}

impl ConfigStore {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()))
    }

    /// Load `key`, falling back to (and persisting) the supplied default when
    /// the key is missing. A corrupt stored document also falls back to the
    /// default rather than failing the request.
    pub fn get_or_default<T>(&self, key: &str, default: impl FnOnce() -> T) -> T
    where
        T: Serialize + DeserializeOwned,
    {
        match self.store.get_raw(key) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(v) => v,
                Err(e) => {
                    warn!(key, error = %e, "stored config failed to parse, serving defaults");
                    default()
                }
            },
            Ok(None) => {
                let value = default();
                if let Ok(json) = serde_json::to_string(&value) {
                    if let Err(e) = self.store.put_raw(key, &json) {
                        warn!(key, error = %e, "failed to seed default config");
                    }
                }
                value
            }
            Err(e) => {
                warn!(key, error = %e, "config read failed, serving defaults");
                default()
            }
        }
    }

    /// Whole-object replace.
    pub fn replace<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let json = serde_json::to_string(value)?;
        self.store.put_raw(key, &json)
    }

    pub fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.store.delete(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Cfg {
        enabled: bool,
        limit: u32,
    }

    fn default_cfg() -> Cfg {
        Cfg {
            enabled: true,
            limit: 20,
        }
    }

    #[test]
    fn missing_key_seeds_default() {
        let store = ConfigStore::in_memory();
        let got: Cfg = store.get_or_default("cfg", default_cfg);
        assert_eq!(got, default_cfg());
        // Second read comes from storage, not the default closure.
        let again: Cfg = store.get_or_default("cfg", || Cfg {
            enabled: false,
            limit: 0,
        });
        assert_eq!(again, default_cfg());
    }

    #[test]
    fn replace_round_trips() {
        let store = ConfigStore::in_memory();
        let updated = Cfg {
            enabled: false,
            limit: 5,
        };
        store.replace("cfg", &updated).unwrap();
        let got: Cfg = store.get_or_default("cfg", default_cfg);
        assert_eq!(got, updated);
    }

    #[test]
    fn corrupt_document_serves_defaults() {
        let mem = MemoryStore::new();
        mem.put_raw("cfg", "{not json").unwrap();
        let store = ConfigStore::new(Box::new(mem));
        let got: Cfg = store.get_or_default("cfg", default_cfg);
        assert_eq!(got, default_cfg());
    }
}
