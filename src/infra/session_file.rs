use serde_json::Value;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use time::OffsetDateTime;

const MAX_HINT_SCAN_BYTES: usize = 4 * 1024 * 1024;
const SESSION_FILE_WAIT_POLL: Duration = Duration::from_millis(250);

/// What a single pass over a session file reveals without interpreting
/// conversation content.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionFileHint {
    pub session_id: Option<String>,
    pub cwd: Option<String>,
    pub first_timestamp: Option<String>,
    pub first_prompt: Option<String>,
    pub git_branch: Option<String>,
    pub user_messages: u64,
    pub last_model: Option<String>,
}

pub fn read_session_file_hint(path: &Path) -> io::Result<SessionFileHint> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hint = SessionFileHint::default();

    let mut bytes_read = 0usize;
    loop {
        let mut line = String::new();
        let bytes = reader.read_line(&mut line)?;
        if bytes == 0 {
            break;
        }
        bytes_read = bytes_read.saturating_add(bytes);
        if bytes_read > MAX_HINT_SCAN_BYTES {
            break;
        }

        let Ok(value) = serde_json::from_str::<Value>(line.trim_end()) else {
            continue;
        };
        absorb_line(&mut hint, &value);
    }

    Ok(hint)
}

fn absorb_line(hint: &mut SessionFileHint, value: &Value) {
    let text = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string())
    };

    if hint.session_id.is_none() {
        hint.session_id = text("sessionId");
    }
    if hint.cwd.is_none() {
        hint.cwd = text("cwd");
    }
    if hint.first_timestamp.is_none() {
        hint.first_timestamp = text("timestamp");
    }
    if hint.git_branch.is_none() {
        hint.git_branch = text("gitBranch");
    }

    match value.get("type").and_then(|v| v.as_str()) {
        Some("user") => {
            hint.user_messages = hint.user_messages.saturating_add(1);
            if hint.first_prompt.is_none() {
                hint.first_prompt = user_message_text(value);
            }
        }
        Some("assistant") => {
            if let Some(model) = value
                .get("message")
                .and_then(|m| m.get("model"))
                .and_then(|m| m.as_str())
                .filter(|m| !m.is_empty())
            {
                hint.last_model = Some(model.to_string());
            }
        }
        _ => {}
    }
}

fn user_message_text(value: &Value) -> Option<String> {
    let content = value.get("message")?.get("content")?;
    let text = match content {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return None,
    };
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with('<') {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// `claude-opus-4-...` -> `opus`; unknown model ids pass through.
pub fn simplify_model_name(model: &str) -> String {
    let lower = model.to_lowercase();
    for family in ["opus", "sonnet", "haiku"] {
        if lower.contains(family) {
            return family.to_string();
        }
    }
    model.to_string()
}

pub fn read_session_model(path: &Path) -> Option<String> {
    let hint = read_session_file_hint(path).ok()?;
    hint.last_model.map(|model| simplify_model_name(&model))
}

pub fn file_modified(path: &Path) -> Option<OffsetDateTime> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(OffsetDateTime::from(modified))
}

pub fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|metadata| metadata.len())
}

/// Polls for a session file that a just-launched agent is expected to create.
/// Gives up with `None` once `timeout` has elapsed.
pub fn wait_for_session_file(path: &Path, timeout: Duration) -> Option<PathBuf> {
    let deadline = Instant::now().checked_add(timeout)?;
    loop {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        std::thread::sleep(SESSION_FILE_WAIT_POLL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn reads_hint_from_session_lines() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("s1.jsonl");
        let mut file = File::create(&path).expect("create");
        writeln!(
            file,
            r#"{{"type":"user","cwd":"C:\\work\\app","sessionId":"s1","gitBranch":"main","timestamp":"2026-01-20T10:00:00Z","message":{{"content":"hello there"}}}}"#
        )
        .expect("write");
        writeln!(file, "not json").expect("write");
        writeln!(
            file,
            r#"{{"type":"assistant","message":{{"model":"claude-sonnet-4-5","content":[]}}}}"#
        )
        .expect("write");
        writeln!(
            file,
            r#"{{"type":"user","message":{{"content":[{{"type":"text","text":"again"}}]}}}}"#
        )
        .expect("write");

        let hint = read_session_file_hint(&path).expect("hint");
        assert_eq!(hint.session_id.as_deref(), Some("s1"));
        assert_eq!(hint.cwd.as_deref(), Some(r"C:\work\app"));
        assert_eq!(hint.git_branch.as_deref(), Some("main"));
        assert_eq!(hint.first_prompt.as_deref(), Some("hello there"));
        assert_eq!(hint.user_messages, 2);
        assert_eq!(read_session_model(&path).as_deref(), Some("sonnet"));
    }

    #[test]
    fn simplifies_known_model_families() {
        assert_eq!(simplify_model_name("claude-opus-4-1-20250805"), "opus");
        assert_eq!(simplify_model_name("claude-3-5-haiku"), "haiku");
        assert_eq!(simplify_model_name("gpt-x"), "gpt-x");
    }

    #[test]
    fn wait_gives_up_after_timeout() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("never.jsonl");
        let started = Instant::now();
        assert_eq!(wait_for_session_file(&path, Duration::from_millis(50)), None);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn wait_returns_existing_file_immediately() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("s.jsonl");
        fs::write(&path, "").expect("write");
        assert_eq!(wait_for_session_file(&path, Duration::ZERO), Some(path));
    }
}
