//! Value persistence collaborator
//!
//! Objects configured with `init="persist"` read their initial value from,
//! and write every changed value to, a [`ValueStore`] keyed by object id.
//! The store is deliberately dumb: canonical value text in, canonical value
//! text out. Write failures are logged and swallowed so a full disk never
//! stalls the daemon.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::warn;

/// Pluggable persistence backend keyed by object id.
pub trait ValueStore {
    /// Returns the last value written for `id`, if any.
    fn read(&self, id: &str) -> Option<String>;

    /// Records the current value of `id`.
    fn write(&self, id: &str, value: &str);
}

/// Flat-file store: one file per object id under a base directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }
}

impl ValueStore for FileStore {
    fn read(&self, id: &str) -> Option<String> {
        fs::read_to_string(self.path_for(id))
            .ok()
            .map(|text| text.trim_end_matches('\n').to_string())
    }

    fn write(&self, id: &str, value: &str) {
        if let Err(err) = fs::create_dir_all(&self.dir)
            .and_then(|_| fs::write(self.path_for(id), format!("{value}\n")))
        {
            warn!("failed to persist value of '{id}': {err}");
        }
    }
}

/// In-memory store backing tests and `--no-persist` runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RefCell<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ValueStore for MemoryStore {
    fn read(&self, id: &str) -> Option<String> {
        self.values.borrow().get(id).cloned()
    }

    fn write(&self, id: &str, value: &str) {
        self.values
            .borrow_mut()
            .insert(id.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.read("lamp"), None);
        store.write("lamp", "on");
        assert_eq!(store.read("lamp").as_deref(), Some("on"));
        store.write("lamp", "off");
        assert_eq!(store.read("lamp").as_deref(), Some("off"));
    }

    #[test]
    fn file_store_round_trip() {
        let dir = std::env::temp_dir().join(format!(
            "homelink-store-{}",
            std::process::id()
        ));
        let store = FileStore::new(&dir);
        assert_eq!(store.read("sensor"), None);
        store.write("sensor", "21.5");
        assert_eq!(store.read("sensor").as_deref(), Some("21.5"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
