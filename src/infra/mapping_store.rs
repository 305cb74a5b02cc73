use crate::domain::{MappingEntry, MappingPatch};
use crate::infra::{ReadDocumentError, WriteDocumentError, read_json_file, write_json_atomic};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;

const MAPPING_STORE_VERSION: u32 = 1;

/// The tool's own record of the sessions it created or observed. At most one
/// entry per session id. Entries that cannot be read are kept as raw JSON and
/// written back unchanged.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MappingStore {
    entries: Vec<MappingEntry>,
    unreadable: Vec<Value>,
    extra: Map<String, Value>,
    skipped: usize,
}

impl MappingStore {
    pub fn get(&self, session_id: &str) -> Option<&MappingEntry> {
        self.entries
            .iter()
            .find(|entry| entry.session_id == session_id)
    }

    pub fn list_all(&self) -> &[MappingEntry] {
        &self.entries
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries left out of the typed list on load: unreadable ones (still
    /// preserved on disk) and duplicate ids.
    pub fn skipped_on_load(&self) -> usize {
        self.skipped
    }

    pub fn unreadable(&self) -> &[Value] {
        &self.unreadable
    }

    pub fn upsert(&mut self, session_id: &str, patch: &MappingPatch) -> &MappingEntry {
        self.upsert_at(session_id, patch, OffsetDateTime::now_utc())
    }

    /// Builds the replacement record from the existing one (or a fresh entry
    /// with `created == now`) and swaps it into the collection whole.
    pub fn upsert_at(
        &mut self,
        session_id: &str,
        patch: &MappingPatch,
        now: OffsetDateTime,
    ) -> &MappingEntry {
        self.drop_unreadable(session_id);
        let position = self
            .entries
            .iter()
            .position(|entry| entry.session_id == session_id);

        match position {
            Some(index) => {
                let next = patch.merged_onto(&self.entries[index], now);
                self.entries[index] = next;
                &self.entries[index]
            }
            None => {
                let next = patch.merged_onto(&MappingEntry::new(session_id, now), now);
                self.entries.push(next);
                let last = self.entries.len() - 1;
                &self.entries[last]
            }
        }
    }

    pub fn remove(&mut self, session_id: &str) -> Option<MappingEntry> {
        self.drop_unreadable(session_id);
        let index = self
            .entries
            .iter()
            .position(|entry| entry.session_id == session_id)?;
        Some(self.entries.remove(index))
    }

    /// A typed write for an id supersedes any unreadable copy of it.
    fn drop_unreadable(&mut self, session_id: &str) {
        let before = self.unreadable.len();
        self.unreadable
            .retain(|raw| raw_session_id(raw) != Some(session_id));
        if self.unreadable.len() != before {
            warn!(session_id = %session_id, "replacing unreadable mapping entry");
        }
    }
}

fn raw_session_id(raw: &Value) -> Option<&str> {
    raw.get("sessionId").and_then(Value::as_str)
}

#[derive(Debug, Error)]
pub enum LoadMappingStoreError {
    #[error(transparent)]
    Read(#[from] ReadDocumentError),

    #[error("mapping store {path} has no sessions list")]
    Shape { path: String },
}

#[derive(Debug, Error)]
pub enum SaveMappingStoreError {
    #[error(transparent)]
    Write(#[from] WriteDocumentError),
}

#[derive(Debug, Error)]
pub enum UpdateMappingStoreError {
    #[error(transparent)]
    Load(#[from] LoadMappingStoreError),

    #[error(transparent)]
    Save(#[from] SaveMappingStoreError),
}

#[derive(Debug, Deserialize)]
struct MappingStoreFileIn {
    #[serde(default)]
    sessions: Option<Vec<Value>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum StoredSession<'a> {
    Typed(&'a MappingEntry),
    Unreadable(&'a Value),
}

#[derive(Debug, Serialize)]
struct MappingStoreFileOut<'a> {
    version: u32,
    sessions: Vec<StoredSession<'a>>,
    #[serde(flatten)]
    extra: &'a Map<String, Value>,
}

pub fn load_mapping_store(path: &Path) -> Result<MappingStore, LoadMappingStoreError> {
    let Some(file) = read_json_file::<MappingStoreFileIn>(path)? else {
        return Ok(MappingStore::default());
    };
    let Some(raw_entries) = file.sessions else {
        return Err(LoadMappingStoreError::Shape {
            path: path.display().to_string(),
        });
    };

    let mut extra = file.extra;
    extra.remove("version");

    let mut seen: HashSet<String> = HashSet::new();
    let mut entries = Vec::with_capacity(raw_entries.len());
    let mut unreadable = Vec::new();
    let mut skipped = 0usize;
    for raw in raw_entries {
        match MappingEntry::deserialize(&raw) {
            Ok(entry) if seen.insert(entry.session_id.clone()) => entries.push(entry),
            Ok(entry) => {
                warn!(session_id = %entry.session_id, "dropping duplicate mapping entry");
                skipped += 1;
            }
            Err(error) => {
                warn!(%error, "keeping unreadable mapping entry as is");
                unreadable.push(raw);
                skipped += 1;
            }
        }
    }

    Ok(MappingStore {
        entries,
        unreadable,
        extra,
        skipped,
    })
}

pub fn save_mapping_store(path: &Path, store: &MappingStore) -> Result<(), SaveMappingStoreError> {
    let sessions = store
        .entries
        .iter()
        .map(StoredSession::Typed)
        .chain(store.unreadable.iter().map(StoredSession::Unreadable))
        .collect();
    let file = MappingStoreFileOut {
        version: MAPPING_STORE_VERSION,
        sessions,
        extra: &store.extra,
    };
    write_json_atomic(path, &file)?;
    Ok(())
}

/// Load, apply `change`, write the whole document back.
pub fn update_mapping_store<T>(
    path: &Path,
    change: impl FnOnce(&mut MappingStore) -> T,
) -> Result<T, UpdateMappingStoreError> {
    let mut store = load_mapping_store(path)?;
    let result = change(&mut store);
    save_mapping_store(path, &store)?;
    Ok(result)
}
