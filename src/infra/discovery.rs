use crate::domain::{LocalSessionFile, MappingEntry, ReconcileInput, SessionRecord, reconcile_sessions};
use crate::infra::{DocumentCache, ScanWarningCount, file_modified};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DiscoveryOptions {
    pub include_archived: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiscoveryOutput {
    pub sessions: Vec<SessionRecord>,
    pub warnings: ScanWarningCount,
    pub notice: Option<String>,
}

/// One discovery pass over the documents cached for the current cycle.
/// Problems with individual documents lower the result; they never fail it.
pub fn discover_sessions(
    cache: &mut DocumentCache,
    profile_prefix: &str,
    options: DiscoveryOptions,
) -> DiscoveryOutput {
    let scan = cache.session_indexes();
    let mut warnings = scan.warnings.get();
    let mut notices: Vec<String> = scan.notice.iter().cloned().collect();

    let mapping = match cache.mapping_store() {
        Ok(store) => {
            warnings += store.skipped_on_load();
            store.list_all().to_vec()
        }
        Err(error) => {
            warnings += 1;
            notices.push(error.to_string());
            Vec::new()
        }
    };

    let indexed = scan.indexed_sessions();
    let unindexed = scan.unindexed_sessions();
    let input = ReconcileInput {
        indexed: &indexed,
        unindexed: &unindexed,
        mapping: &mapping,
        profile_prefix,
    };

    let paths = cache.paths().clone();
    let locate = |entry: &MappingEntry| -> Option<LocalSessionFile> {
        if entry.project_path.trim().is_empty() {
            return None;
        }
        let path = paths.session_file(&entry.project_path, &entry.session_id);
        if !path.is_file() {
            debug!(session_id = %entry.session_id, "no session file yet");
            return None;
        }
        Some(LocalSessionFile {
            modified: file_modified(&path),
            path,
        })
    };

    let mut sessions = reconcile_sessions(&input, locate);
    if !options.include_archived {
        sessions.retain(|session| !session.archived);
    }

    if warnings > 0 {
        warn!(warnings, "discovery skipped unreadable entries");
    }

    DiscoveryOutput {
        sessions,
        warnings: ScanWarningCount::from(warnings),
        notice: (!notices.is_empty()).then(|| notices.join("; ")),
    }
}
