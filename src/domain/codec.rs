use tracing::warn;

const DRIVE_MARKER: &str = "--";
const SEPARATOR_MARKER: char = '-';

/// Canonical form of a project path: backslash separators for drive-rooted
/// paths and no trailing separator, except for a bare drive root (`C:\`).
pub fn normalize_project_path(path: &str) -> String {
    let trimmed = path.trim();
    if let Some((drive, rest)) = split_drive(trimmed) {
        let rest = rest
            .trim_matches(|c| c == '\\' || c == '/')
            .replace('/', "\\");
        if rest.is_empty() {
            return format!("{drive}:\\");
        }
        return format!("{drive}:\\{rest}");
    }

    let without_trailing = trimmed.trim_end_matches('/');
    if without_trailing.is_empty() && trimmed.starts_with('/') {
        return "/".to_string();
    }
    without_trailing.to_string()
}

/// Encodes a project directory into the directory name the agent uses under
/// its projects root (`C:\Users\me\app` -> `C--Users-me-app`,
/// `/home/me/app` -> `-home-me-app`).
pub fn encode_project_path(path: &str) -> String {
    let normalized = normalize_project_path(path);
    if let Some((drive, rest)) = split_drive(&normalized) {
        let rest = rest.trim_start_matches('\\');
        let tail = rest.replace('\\', &SEPARATOR_MARKER.to_string());
        return format!("{drive}{DRIVE_MARKER}{tail}");
    }

    normalized.replace(['/', '\\'], &SEPARATOR_MARKER.to_string())
}

/// Reverses [`encode_project_path`]. A segment that does not have an encoded
/// shape is returned unchanged so one odd directory cannot abort a scan.
pub fn decode_project_path(segment: &str) -> String {
    if let Some(rest) = segment.strip_prefix(SEPARATOR_MARKER) {
        if !rest.starts_with(SEPARATOR_MARKER) {
            return format!("/{}", rest.replace(SEPARATOR_MARKER, "/"));
        }
    }

    let mut chars = segment.chars();
    let drive = chars.next();
    let remainder = chars.as_str();
    match (drive, remainder.strip_prefix(DRIVE_MARKER)) {
        (Some(drive), Some(tail)) if drive.is_ascii_alphabetic() => {
            if tail.is_empty() {
                format!("{drive}:\\")
            } else {
                format!("{drive}:\\{}", tail.replace(SEPARATOR_MARKER, "\\"))
            }
        }
        _ => {
            warn!(segment, "not an encoded project directory name; leaving as-is");
            segment.to_string()
        }
    }
}

pub fn is_drive_rooted(path: &str) -> bool {
    split_drive(path).is_some()
}

fn split_drive(path: &str) -> Option<(char, &str)> {
    let mut chars = path.chars();
    let drive = chars.next()?;
    if !drive.is_ascii_alphabetic() {
        return None;
    }
    let rest = chars.as_str().strip_prefix(':')?;
    if rest.is_empty() || rest.starts_with('\\') || rest.starts_with('/') {
        Some((drive, rest))
    } else {
        None
    }
}
