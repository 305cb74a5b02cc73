use crate::infra::{
    MappingStore, ProjectsScan, RegistryPaths, TerminalSettings, load_mapping_store,
    load_terminal_settings, scan_projects_dir,
};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CacheKey {
    SessionIndexes,
    MappingStore,
    TerminalSettings,
}

impl CacheKey {
    pub fn label(self) -> &'static str {
        match self {
            Self::SessionIndexes => "session indexes",
            Self::MappingStore => "mapping store",
            Self::TerminalSettings => "terminal settings",
        }
    }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{} unavailable: {message}", .key.label())]
pub struct CachedLoadError {
    pub key: CacheKey,
    pub message: String,
}

#[derive(Debug)]
enum Slot<T> {
    Empty,
    Loaded(Rc<T>),
    Failed(String),
}

impl<T> Slot<T> {
    #[cfg(test)]
    fn is_filled(&self) -> bool {
        !matches!(self, Self::Empty)
    }
}

/// Parsed documents for one render cycle. Each document is read at most once
/// between `clear_all` calls, failures included, so every row of a cycle
/// sees the same snapshot.
#[derive(Debug)]
pub struct DocumentCache {
    paths: RegistryPaths,
    indexes: Slot<ProjectsScan>,
    mapping: Slot<MappingStore>,
    settings: Slot<TerminalSettings>,
    loads: [usize; 3],
}

impl DocumentCache {
    pub fn new(paths: RegistryPaths) -> Self {
        Self {
            paths,
            indexes: Slot::Empty,
            mapping: Slot::Empty,
            settings: Slot::Empty,
            loads: [0; 3],
        }
    }

    pub fn paths(&self) -> &RegistryPaths {
        &self.paths
    }

    pub fn clear_all(&mut self) {
        debug!(loads = ?self.loads, "document cache cleared");
        self.indexes = Slot::Empty;
        self.mapping = Slot::Empty;
        self.settings = Slot::Empty;
    }

    #[cfg(test)]
    pub fn is_cached(&self, key: CacheKey) -> bool {
        match key {
            CacheKey::SessionIndexes => self.indexes.is_filled(),
            CacheKey::MappingStore => self.mapping.is_filled(),
            CacheKey::TerminalSettings => self.settings.is_filled(),
        }
    }

    /// Times the document behind `key` was read from disk since creation.
    #[cfg(test)]
    pub fn load_count(&self, key: CacheKey) -> usize {
        self.loads[slot_index(key)]
    }

    pub fn session_indexes(&mut self) -> Rc<ProjectsScan> {
        if let Slot::Loaded(scan) = &self.indexes {
            return Rc::clone(scan);
        }
        self.note_load(CacheKey::SessionIndexes);
        let scan = Rc::new(scan_projects_dir(&self.paths.projects_dir));
        self.indexes = Slot::Loaded(Rc::clone(&scan));
        scan
    }

    pub fn mapping_store(&mut self) -> Result<Rc<MappingStore>, CachedLoadError> {
        let key = CacheKey::MappingStore;
        match &self.mapping {
            Slot::Loaded(store) => return Ok(Rc::clone(store)),
            Slot::Failed(message) => return Err(failed(key, message)),
            Slot::Empty => {}
        }
        self.note_load(key);
        match load_mapping_store(&self.paths.mapping_store()) {
            Ok(store) => {
                let store = Rc::new(store);
                self.mapping = Slot::Loaded(Rc::clone(&store));
                Ok(store)
            }
            Err(error) => {
                warn!(%error, "mapping store unreadable this cycle");
                self.mapping = Slot::Failed(error.to_string());
                Err(failed(key, &error.to_string()))
            }
        }
    }

    pub fn terminal_settings(&mut self) -> Result<Rc<TerminalSettings>, CachedLoadError> {
        let key = CacheKey::TerminalSettings;
        match &self.settings {
            Slot::Loaded(settings) => return Ok(Rc::clone(settings)),
            Slot::Failed(message) => return Err(failed(key, message)),
            Slot::Empty => {}
        }
        self.note_load(key);
        match load_terminal_settings(&self.paths.terminal_settings) {
            Ok(settings) => {
                let settings = Rc::new(settings);
                self.settings = Slot::Loaded(Rc::clone(&settings));
                Ok(settings)
            }
            Err(error) => {
                warn!(%error, "terminal settings unreadable this cycle");
                self.settings = Slot::Failed(error.to_string());
                Err(failed(key, &error.to_string()))
            }
        }
    }

    fn note_load(&mut self, key: CacheKey) {
        debug!(document = key.label(), "loading document");
        self.loads[slot_index(key)] += 1;
    }
}

fn slot_index(key: CacheKey) -> usize {
    match key {
        CacheKey::SessionIndexes => 0,
        CacheKey::MappingStore => 1,
        CacheKey::TerminalSettings => 2,
    }
}

fn failed(key: CacheKey, message: &str) -> CachedLoadError {
    CachedLoadError {
        key,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MappingPatch;
    use crate::infra::{save_mapping_store, test_paths};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn documents_load_once_per_cycle() {
        let dir = tempdir().expect("tempdir");
        let mut cache = DocumentCache::new(test_paths(dir.path()));

        let first = cache.mapping_store().expect("load");
        let second = cache.mapping_store().expect("load");
        assert!(Rc::ptr_eq(&first, &second));
        cache.session_indexes();
        cache.session_indexes();

        assert_eq!(cache.load_count(CacheKey::MappingStore), 1);
        assert_eq!(cache.load_count(CacheKey::SessionIndexes), 1);
        assert!(!cache.is_cached(CacheKey::TerminalSettings));
    }

    #[test]
    fn mid_cycle_writes_show_up_after_clear_all() {
        let dir = tempdir().expect("tempdir");
        let paths = test_paths(dir.path());
        let mut cache = DocumentCache::new(paths.clone());
        assert!(cache.mapping_store().expect("load").is_empty());

        let mut store = MappingStore::default();
        store.upsert("abc", &MappingPatch::default());
        save_mapping_store(&paths.mapping_store(), &store).expect("save");

        assert!(cache.mapping_store().expect("stale").is_empty());
        cache.clear_all();
        assert_eq!(cache.mapping_store().expect("fresh").len(), 1);
        assert_eq!(cache.load_count(CacheKey::MappingStore), 2);
    }

    #[test]
    fn failures_are_cached_for_the_cycle() {
        let dir = tempdir().expect("tempdir");
        let paths = test_paths(dir.path());
        let mut cache = DocumentCache::new(paths.clone());

        assert!(cache.terminal_settings().is_err());
        fs::create_dir_all(paths.terminal_settings.parent().expect("parent")).expect("mkdir");
        fs::write(&paths.terminal_settings, r#"{"profiles":{"list":[]}}"#).expect("write");
        let error = cache.terminal_settings().expect_err("cached failure");
        assert_eq!(error.key, CacheKey::TerminalSettings);
        assert_eq!(cache.load_count(CacheKey::TerminalSettings), 1);

        cache.clear_all();
        assert!(cache.terminal_settings().is_ok());
    }
}
