use crate::domain::{IndexedSession, decode_project_path, normalize_project_path};
use crate::infra::{
    SESSION_FILE_EXTENSION, SESSIONS_INDEX_FILE, file_modified, read_session_file_hint,
};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ScanWarningCount(usize);

impl From<usize> for ScanWarningCount {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl ScanWarningCount {
    pub fn get(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum ParseSessionsIndexError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// How one project directory under the projects root was read.
#[derive(Clone, Debug, PartialEq)]
pub enum ProjectIndexState {
    Indexed(Vec<IndexedSession>),
    /// No index document; sessions come from bare session files.
    Unindexed(Vec<IndexedSession>),
    /// The index document exists but could not be trusted.
    Malformed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProjectIndex {
    pub dir: PathBuf,
    pub state: ProjectIndexState,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProjectsScan {
    pub projects: Vec<ProjectIndex>,
    pub warnings: ScanWarningCount,
    pub notice: Option<String>,
}

impl ProjectsScan {
    pub fn indexed_sessions(&self) -> Vec<IndexedSession> {
        self.sessions_where(|state| match state {
            ProjectIndexState::Indexed(sessions) => Some(sessions),
            _ => None,
        })
    }

    pub fn unindexed_sessions(&self) -> Vec<IndexedSession> {
        self.sessions_where(|state| match state {
            ProjectIndexState::Unindexed(sessions) => Some(sessions),
            _ => None,
        })
    }

    pub fn contains_session(&self, session_id: &str) -> bool {
        self.projects.iter().any(|project| match &project.state {
            ProjectIndexState::Indexed(sessions) | ProjectIndexState::Unindexed(sessions) => {
                sessions.iter().any(|session| session.id == session_id)
            }
            ProjectIndexState::Malformed(_) => false,
        })
    }

    /// True when the project directory named `dir_name` has an index that
    /// could not be read, so its sessions are unknown rather than absent.
    pub fn has_malformed_index(&self, dir_name: &str) -> bool {
        self.projects.iter().any(|project| {
            matches!(project.state, ProjectIndexState::Malformed(_))
                && project.dir.file_name().is_some_and(|name| name == dir_name)
        })
    }

    fn sessions_where(
        &self,
        pick: impl Fn(&ProjectIndexState) -> Option<&Vec<IndexedSession>>,
    ) -> Vec<IndexedSession> {
        self.projects
            .iter()
            .filter_map(|project| pick(&project.state))
            .flat_map(|sessions| sessions.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct SessionsIndexFile {
    version: Option<u32>,
    #[serde(rename = "originalPath", default)]
    original_path: Option<String>,
    entries: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SessionsIndexEntry {
    #[serde(rename = "sessionId", default)]
    session_id: Option<String>,

    #[serde(rename = "fullPath", default)]
    full_path: Option<PathBuf>,

    #[serde(rename = "customTitle", default)]
    custom_title: Option<String>,

    #[serde(default)]
    summary: Option<String>,

    #[serde(rename = "firstPrompt", default)]
    first_prompt: Option<String>,

    #[serde(rename = "projectPath", default)]
    project_path: Option<String>,

    #[serde(default)]
    created: Option<String>,

    #[serde(default)]
    modified: Option<String>,

    #[serde(rename = "messageCount", default)]
    message_count: Option<u64>,

    #[serde(rename = "gitBranch", default)]
    git_branch: Option<String>,
}

/// Parsed index document: the entries that could be read plus a count of
/// rejected ones.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedSessionsIndex {
    pub sessions: Vec<IndexedSession>,
    pub rejected: usize,
}

pub fn parse_sessions_index(
    text: &str,
    project_dir: &Path,
) -> Result<ParsedSessionsIndex, ParseSessionsIndexError> {
    let file: SessionsIndexFile = serde_json::from_str(text)?;
    if file.version.is_none() {
        return Err(ParseSessionsIndexError::MissingField("version"));
    }
    let Some(entries) = file.entries else {
        return Err(ParseSessionsIndexError::MissingField("entries"));
    };

    let fallback_project = file
        .original_path
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(|| project_path_from_dir(project_dir));

    let mut sessions = Vec::new();
    let mut rejected = 0usize;
    for (position, raw) in entries.into_iter().enumerate() {
        let entry = match serde_json::from_value::<SessionsIndexEntry>(raw) {
            Ok(entry) => entry,
            Err(error) => {
                debug!(position, %error, "rejected index entry");
                rejected += 1;
                continue;
            }
        };
        match session_from_index_entry(project_dir, &fallback_project, entry) {
            Some(session) => sessions.push(session),
            None => {
                debug!(position, "index entry without sessionId");
                rejected += 1;
            }
        }
    }

    Ok(ParsedSessionsIndex { sessions, rejected })
}

fn session_from_index_entry(
    project_dir: &Path,
    fallback_project: &str,
    entry: SessionsIndexEntry,
) -> Option<IndexedSession> {
    let id = entry.session_id.filter(|id| !id.trim().is_empty())?;

    let data_file = match entry.full_path {
        Some(path) if path.is_absolute() => path,
        Some(path) => project_dir.join(path),
        None => project_dir.join(format!("{id}.{SESSION_FILE_EXTENSION}")),
    };

    let created = entry.created.as_deref().and_then(parse_timestamp);
    let modified = entry.modified.as_deref().and_then(parse_timestamp);
    let (created, modified) = match (created, modified) {
        (Some(created), Some(modified)) => (created, modified),
        (Some(created), None) => (created, created),
        (None, Some(modified)) => (modified, modified),
        (None, None) => {
            let from_file = file_modified(&data_file).unwrap_or(OffsetDateTime::UNIX_EPOCH);
            (from_file, from_file)
        }
    };

    let project_path = entry
        .project_path
        .filter(|path| !path.trim().is_empty())
        .map(|path| normalize_project_path(&path))
        .unwrap_or_else(|| normalize_project_path(fallback_project));

    Some(IndexedSession {
        id,
        custom_title: entry
            .custom_title
            .or(entry.summary)
            .filter(|title| !title.trim().is_empty()),
        first_prompt: entry.first_prompt.filter(|prompt| !prompt.trim().is_empty()),
        project_path,
        created,
        modified,
        message_count: entry.message_count.unwrap_or(0),
        git_branch: entry.git_branch.filter(|branch| !branch.is_empty()),
        data_file,
    })
}

pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    OffsetDateTime::parse(trimmed, &Rfc3339).ok()
}

fn project_path_from_dir(project_dir: &Path) -> String {
    let name = project_dir
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    decode_project_path(name)
}

/// Reads every project directory under the agent's projects root. One bad
/// directory degrades to a warning; it never aborts the scan.
pub fn scan_projects_dir(projects_dir: &Path) -> ProjectsScan {
    if !projects_dir.exists() {
        return ProjectsScan {
            notice: Some(format!(
                "Claude projects dir not found: {}",
                projects_dir.display()
            )),
            ..ProjectsScan::default()
        };
    }

    let Ok(entries) = fs::read_dir(projects_dir) else {
        return ProjectsScan {
            notice: Some(format!(
                "Claude projects dir is not readable: {}",
                projects_dir.display()
            )),
            ..ProjectsScan::default()
        };
    };

    let mut dirs: Vec<PathBuf> = Vec::new();
    let mut warnings = 0usize;
    for entry in entries {
        let Ok(entry) = entry else {
            warnings += 1;
            continue;
        };
        match entry.file_type() {
            Ok(file_type) if file_type.is_dir() => dirs.push(entry.path()),
            Ok(_) => {}
            Err(_) => warnings += 1,
        }
    }
    dirs.sort();

    let mut projects = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let (state, dir_warnings) = scan_project_dir(&dir);
        warnings += dir_warnings;
        projects.push(ProjectIndex { dir, state });
    }

    ProjectsScan {
        projects,
        warnings: ScanWarningCount::from(warnings),
        notice: None,
    }
}

fn scan_project_dir(project_dir: &Path) -> (ProjectIndexState, usize) {
    let index_path = project_dir.join(SESSIONS_INDEX_FILE);
    if !index_path.exists() {
        let (sessions, warnings) = scan_session_files(project_dir);
        return (ProjectIndexState::Unindexed(sessions), warnings);
    }

    let text = match fs::read_to_string(&index_path) {
        Ok(text) => text,
        Err(error) => {
            warn!(path = %index_path.display(), %error, "could not read sessions index");
            return (ProjectIndexState::Malformed(error.to_string()), 1);
        }
    };

    match parse_sessions_index(&text, project_dir) {
        Ok(parsed) => (ProjectIndexState::Indexed(parsed.sessions), parsed.rejected),
        Err(error) => {
            warn!(path = %index_path.display(), %error, "skipping malformed sessions index");
            (ProjectIndexState::Malformed(error.to_string()), 1)
        }
    }
}

fn scan_session_files(project_dir: &Path) -> (Vec<IndexedSession>, usize) {
    let mut sessions = Vec::new();
    let mut warnings = 0usize;
    let fallback_project = project_path_from_dir(project_dir);

    let walker = WalkDir::new(project_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    for entry in walker {
        let Ok(entry) = entry else {
            warnings += 1;
            continue;
        };
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|ext| ext.to_str()) != Some(SESSION_FILE_EXTENSION)
        {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        if stem.starts_with("agent-") {
            continue;
        }

        let hint = match read_session_file_hint(path) {
            Ok(hint) => hint,
            Err(error) => {
                debug!(path = %path.display(), %error, "unreadable session file");
                warnings += 1;
                continue;
            }
        };

        let modified = file_modified(path).unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let created = hint
            .first_timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(modified);
        sessions.push(IndexedSession {
            id: hint.session_id.unwrap_or_else(|| stem.to_string()),
            custom_title: None,
            first_prompt: hint.first_prompt,
            project_path: normalize_project_path(hint.cwd.as_deref().unwrap_or(&fallback_project)),
            created,
            modified,
            message_count: hint.user_messages,
            git_branch: hint.git_branch,
            data_file: path.to_path_buf(),
        });
    }

    (sessions, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use time::macros::datetime;

    #[test]
    fn reads_entries_from_a_valid_index() {
        let dir = tempdir().expect("tempdir");
        let projects = dir.path().join("projects");
        let key_dir = projects.join("C--work-app");
        fs::create_dir_all(&key_dir).expect("create");
        fs::write(
            key_dir.join(SESSIONS_INDEX_FILE),
            r#"{
  "version": 1,
  "entries": [
    {
      "sessionId": "s1",
      "customTitle": "Refactor parser",
      "projectPath": "C:\\work\\app",
      "created": "2026-01-20T10:00:00Z",
      "modified": "2026-01-21T10:00:00Z",
      "messageCount": 12
    },
    { "customTitle": "no id" }
  ]
}"#,
        )
        .expect("write");

        let scan = scan_projects_dir(&projects);
        assert_eq!(scan.warnings.get(), 1);
        let sessions = scan.indexed_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "s1");
        assert_eq!(sessions[0].custom_title.as_deref(), Some("Refactor parser"));
        assert_eq!(sessions[0].project_path, r"C:\work\app");
        assert_eq!(sessions[0].modified, datetime!(2026-01-21 10:00:00 UTC));
        assert_eq!(sessions[0].message_count, 12);
        assert_eq!(sessions[0].data_file, key_dir.join("s1.jsonl"));
    }

    #[test]
    fn index_without_version_is_skipped_not_fatal() {
        let dir = tempdir().expect("tempdir");
        let projects = dir.path().join("projects");
        let bad = projects.join("C--bad");
        let good = projects.join("C--good");
        fs::create_dir_all(&bad).expect("create");
        fs::create_dir_all(&good).expect("create");
        fs::write(bad.join(SESSIONS_INDEX_FILE), r#"{"entries":[]}"#).expect("write");
        fs::write(
            good.join(SESSIONS_INDEX_FILE),
            r#"{"version":1,"entries":[{"sessionId":"g1","created":"2026-01-20T10:00:00Z"}]}"#,
        )
        .expect("write");

        let scan = scan_projects_dir(&projects);
        assert_eq!(scan.projects.len(), 2);
        assert!(matches!(
            scan.projects[0].state,
            ProjectIndexState::Malformed(_)
        ));
        let sessions = scan.indexed_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].project_path, r"C:\good");
    }

    #[test]
    fn corrupt_json_index_is_malformed() {
        let dir = tempdir().expect("tempdir");
        let key_dir = dir.path().join("C--x");
        let error = parse_sessions_index("{", &key_dir).expect_err("error");
        assert!(matches!(error, ParseSessionsIndexError::Json(_)));
        let error = parse_sessions_index(r#"{"version":1}"#, &key_dir).expect_err("error");
        assert!(matches!(error, ParseSessionsIndexError::MissingField("entries")));
    }

    #[test]
    fn directory_without_index_falls_back_to_session_files() {
        let dir = tempdir().expect("tempdir");
        let projects = dir.path().join("projects");
        let key_dir = projects.join("C--work-app");
        fs::create_dir_all(&key_dir).expect("create");
        fs::write(
            key_dir.join("u1.jsonl"),
            r#"{"type":"user","sessionId":"u1","timestamp":"2026-01-20T10:00:00Z","message":{"content":"hello"}}"#,
        )
        .expect("write");
        fs::write(key_dir.join("agent-x.jsonl"), "").expect("write");

        let scan = scan_projects_dir(&projects);
        let sessions = scan.unindexed_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "u1");
        assert_eq!(sessions[0].project_path, r"C:\work\app");
        assert_eq!(sessions[0].first_prompt.as_deref(), Some("hello"));
        assert!(scan.contains_session("u1"));
    }

    #[test]
    fn missing_projects_dir_returns_notice() {
        let dir = tempdir().expect("tempdir");
        let scan = scan_projects_dir(&dir.path().join("missing"));
        assert!(scan.projects.is_empty());
        assert!(scan.notice.is_some());
    }
}
