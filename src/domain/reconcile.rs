use crate::domain::{
    IndexedSession, MappingEntry, SessionOrigin, SessionRecord, strip_profile_prefix,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use time::OffsetDateTime;

const FIRST_PROMPT_TITLE_CHARS: usize = 50;

/// Frozen inputs of one reconciliation pass.
#[derive(Clone, Debug)]
pub struct ReconcileInput<'a> {
    pub indexed: &'a [IndexedSession],
    pub unindexed: &'a [IndexedSession],
    pub mapping: &'a [MappingEntry],
    pub profile_prefix: &'a str,
}

/// A mapping-only entry whose session file was found on disk.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalSessionFile {
    pub path: PathBuf,
    pub modified: Option<OffsetDateTime>,
}

/// Merges the agent's index with the mapping store. `locate` is asked only
/// about mapping entries the index does not know; returning `None` drops
/// the entry from the result.
pub fn reconcile_sessions(
    input: &ReconcileInput<'_>,
    locate: impl Fn(&MappingEntry) -> Option<LocalSessionFile>,
) -> Vec<SessionRecord> {
    let mapping: BTreeMap<&str, &MappingEntry> = input
        .mapping
        .iter()
        .map(|entry| (entry.session_id.as_str(), entry))
        .collect();

    let mut seen: HashSet<String> = HashSet::new();
    let mut records: Vec<SessionRecord> = Vec::new();

    for session in newest_per_id(input.indexed) {
        seen.insert(session.id.clone());
        let local = mapping.get(session.id.as_str()).copied();
        records.push(record_from_indexed(
            session,
            local,
            SessionOrigin::Authoritative,
            input.profile_prefix,
        ));
    }

    for session in newest_per_id(input.unindexed) {
        if !seen.insert(session.id.clone()) {
            continue;
        }
        let local = mapping.get(session.id.as_str()).copied();
        records.push(record_from_indexed(
            session,
            local,
            SessionOrigin::Unindexed,
            input.profile_prefix,
        ));
    }

    for entry in input.mapping {
        if seen.contains(&entry.session_id) {
            continue;
        }
        let Some(file) = locate(entry) else {
            continue;
        };
        seen.insert(entry.session_id.clone());
        records.push(record_from_local(entry, file, input.profile_prefix));
    }

    sort_sessions(&mut records);
    records
}

/// Newest first; identity breaks ties so repeated passes never reorder rows.
pub fn sort_sessions(records: &mut [SessionRecord]) {
    records.sort_by(|a, b| match b.modified.cmp(&a.modified) {
        Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });
}

pub fn tracked_name(entry: &MappingEntry, profile_prefix: &str) -> Option<String> {
    let profile = entry.profile_name.as_deref()?;
    let name = strip_profile_prefix(profile_prefix, profile).unwrap_or(profile);
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

pub fn title_from_first_prompt(prompt: &str) -> Option<String> {
    let flattened = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.is_empty() {
        return None;
    }
    if flattened.chars().count() <= FIRST_PROMPT_TITLE_CHARS {
        return Some(flattened);
    }
    let head: String = flattened.chars().take(FIRST_PROMPT_TITLE_CHARS).collect();
    Some(format!("{head}..."))
}

fn newest_per_id(sessions: &[IndexedSession]) -> Vec<&IndexedSession> {
    let mut by_id: BTreeMap<&str, &IndexedSession> = BTreeMap::new();
    for session in sessions {
        match by_id.get(session.id.as_str()) {
            Some(existing) if existing.modified >= session.modified => {}
            _ => {
                by_id.insert(session.id.as_str(), session);
            }
        }
    }
    by_id.into_values().collect()
}

fn record_from_indexed(
    session: &IndexedSession,
    local: Option<&MappingEntry>,
    origin: SessionOrigin,
    profile_prefix: &str,
) -> SessionRecord {
    let display_name = session
        .custom_title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_string)
        .or_else(|| local.and_then(|entry| tracked_name(entry, profile_prefix)))
        .or_else(|| {
            session
                .first_prompt
                .as_deref()
                .and_then(title_from_first_prompt)
        });

    SessionRecord {
        id: session.id.clone(),
        display_name,
        project_path: session.project_path.clone(),
        created: session.created,
        modified: session.modified,
        message_count: session.message_count,
        forked_from: local.and_then(|entry| entry.forked_from.clone()),
        origin,
        profile_name: local.and_then(|entry| entry.profile_name.clone()),
        model: local.and_then(|entry| entry.model.clone()),
        git_branch: session
            .git_branch
            .clone()
            .filter(|branch| !branch.is_empty())
            .or_else(|| local.and_then(|entry| entry.git_branch.clone())),
        notes: local.map(|entry| entry.notes.clone()).unwrap_or_default(),
        archived: local.is_some_and(|entry| entry.archived),
        data_file: session.data_file.clone(),
    }
}

fn record_from_local(
    entry: &MappingEntry,
    file: LocalSessionFile,
    profile_prefix: &str,
) -> SessionRecord {
    SessionRecord {
        id: entry.session_id.clone(),
        display_name: tracked_name(entry, profile_prefix),
        project_path: entry.project_path.clone(),
        created: entry.created,
        modified: file.modified.unwrap_or(entry.updated),
        message_count: 0,
        forked_from: entry.forked_from.clone(),
        origin: SessionOrigin::LocalOnly,
        profile_name: entry.profile_name.clone(),
        model: entry.model.clone(),
        git_branch: entry.git_branch.clone(),
        notes: entry.notes.clone(),
        archived: entry.archived,
        data_file: file.path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn indexed(id: &str, modified: OffsetDateTime) -> IndexedSession {
        IndexedSession {
            id: id.to_string(),
            custom_title: None,
            first_prompt: None,
            project_path: r"C:\work\app".to_string(),
            created: modified,
            modified,
            message_count: 3,
            git_branch: None,
            data_file: PathBuf::from(format!("{id}.jsonl")),
        }
    }

    fn entry(id: &str, profile: Option<&str>) -> MappingEntry {
        let mut entry = MappingEntry::new(id, datetime!(2026-01-19 08:00:00 UTC));
        entry.profile_name = profile.map(str::to_string);
        entry.project_path = r"C:\work\app".to_string();
        entry
    }

    fn found(_entry: &MappingEntry) -> Option<LocalSessionFile> {
        Some(LocalSessionFile {
            path: PathBuf::from("local.jsonl"),
            modified: Some(datetime!(2026-01-22 12:00:00 UTC)),
        })
    }

    #[test]
    fn session_in_index_and_mapping_appears_once_as_authoritative() {
        let indexed = vec![indexed("abc", datetime!(2026-01-20 10:00:00 UTC))];
        let mapping = vec![entry("abc", Some("Claude-Foo"))];
        let input = ReconcileInput {
            indexed: &indexed,
            unindexed: &[],
            mapping: &mapping,
            profile_prefix: "Claude-",
        };

        let records = reconcile_sessions(&input, found);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].origin, SessionOrigin::Authoritative);
        assert_eq!(records[0].display_name.as_deref(), Some("Foo"));
        assert_eq!(records[0].profile_name.as_deref(), Some("Claude-Foo"));
    }

    #[test]
    fn custom_title_wins_over_tracked_name() {
        let mut session = indexed("abc", datetime!(2026-01-20 10:00:00 UTC));
        session.custom_title = Some("Index title".to_string());
        let mapping = vec![entry("abc", Some("Claude-Foo"))];
        let sessions = [session];
        let input = ReconcileInput {
            indexed: &sessions,
            unindexed: &[],
            mapping: &mapping,
            profile_prefix: "Claude-",
        };

        let records = reconcile_sessions(&input, found);
        assert_eq!(records[0].title(), "Index title");
    }

    #[test]
    fn tracked_name_wins_over_first_prompt() {
        let mut session = indexed("abc", datetime!(2026-01-20 10:00:00 UTC));
        session.first_prompt = Some("fix the build".to_string());
        let mapping = vec![entry("abc", Some("Claude-Foo"))];
        let sessions = [session];
        let input = ReconcileInput {
            indexed: &sessions,
            unindexed: &[],
            mapping: &mapping,
            profile_prefix: "Claude-",
        };

        let records = reconcile_sessions(&input, found);
        assert_eq!(records[0].title(), "Foo");

        let unbound = ReconcileInput {
            mapping: &[],
            ..input
        };
        assert_eq!(reconcile_sessions(&unbound, found)[0].title(), "fix the build");
    }

    #[test]
    fn mapping_only_entries_need_a_file_on_disk() {
        let mapping = vec![entry("gone", Some("Claude-Gone")), entry("here", None)];
        let input = ReconcileInput {
            indexed: &[],
            unindexed: &[],
            mapping: &mapping,
            profile_prefix: "Claude-",
        };

        let records = reconcile_sessions(&input, |entry| {
            if entry.session_id == "here" {
                found(entry)
            } else {
                None
            }
        });

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "here");
        assert_eq!(records[0].origin, SessionOrigin::LocalOnly);
        assert_eq!(records[0].title(), "(unnamed)");
    }

    #[test]
    fn equal_timestamps_sort_stably_across_calls() {
        let same = datetime!(2026-01-20 10:00:00 UTC);
        let indexed = vec![
            indexed("b", same),
            indexed("a", same),
            indexed("c", datetime!(2026-01-21 10:00:00 UTC)),
        ];
        let input = ReconcileInput {
            indexed: &indexed,
            unindexed: &[],
            mapping: &[],
            profile_prefix: "Claude-",
        };

        let first: Vec<String> = reconcile_sessions(&input, found)
            .into_iter()
            .map(|record| record.id)
            .collect();
        for _ in 0..5 {
            let again: Vec<String> = reconcile_sessions(&input, found)
                .into_iter()
                .map(|record| record.id)
                .collect();
            assert_eq!(again, first);
        }
        assert_eq!(first, vec!["c", "a", "b"]);
    }

    #[test]
    fn duplicate_index_entries_keep_the_newest() {
        let indexed = vec![
            indexed("abc", datetime!(2026-01-20 10:00:00 UTC)),
            indexed("abc", datetime!(2026-01-21 10:00:00 UTC)),
        ];
        let input = ReconcileInput {
            indexed: &indexed,
            unindexed: &indexed,
            mapping: &[],
            profile_prefix: "Claude-",
        };

        let records = reconcile_sessions(&input, found);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].modified, datetime!(2026-01-21 10:00:00 UTC));
    }

    #[test]
    fn long_first_prompt_is_truncated() {
        let prompt = "a".repeat(60);
        let title = title_from_first_prompt(&prompt).expect("title");
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));
    }
}
