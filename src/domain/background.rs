use crate::domain::{ImageKind, is_drive_rooted};

pub const ORIGIN_SEPARATOR: char = ':';
const ORIGIN_LINE_PREFIX: &str = "Origin: ";

/// What gets written onto a profile's background image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackgroundInfo {
    pub session_name: String,
    pub directory: String,
    pub kind: ImageKind,
    pub forked_from: Option<String>,
    pub git_branch: Option<String>,
    pub model: Option<String>,
    pub origin: String,
}

impl BackgroundInfo {
    pub fn rendered_text(&self) -> String {
        let mut lines = vec![self.session_name.clone()];
        if let Some(parent) = self.forked_from.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("Forked from: {parent}"));
        }
        lines.push(self.directory.clone());
        if let Some(branch) = self.git_branch.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("Branch: {branch}"));
        }
        if let Some(model) = self.model.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("Model: {model}"));
        }
        lines.push(format!("{ORIGIN_LINE_PREFIX}{}", self.origin));
        lines.join("\n")
    }
}

pub fn format_origin(host: &str, user: &str) -> String {
    format!("{}{ORIGIN_SEPARATOR}{}", host.trim(), user.trim())
}

/// Rewrites `HOST\user`, `HOST/user` and `user@HOST` into `HOST:user`.
pub fn normalize_origin(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains(ORIGIN_SEPARATOR) {
        return trimmed.to_string();
    }
    if let Some((host, user)) = trimmed.split_once(['\\', '/']) {
        return format_origin(host, user);
    }
    if let Some((user, host)) = trimmed.split_once('@') {
        return format_origin(host, user);
    }
    trimmed.to_string()
}

/// Change detection on the stored origin. Host names compare
/// case-insensitively.
pub fn origin_matches(stored: &str, current: &str) -> bool {
    normalize_origin(stored).eq_ignore_ascii_case(&normalize_origin(current))
}

/// Replaces the origin line of previously rendered text with `origin`.
pub fn rewrite_origin_line(text: &str, origin: &str) -> String {
    text.lines()
        .map(|line| {
            if line.starts_with(ORIGIN_LINE_PREFIX) {
                format!("{ORIGIN_LINE_PREFIX}{origin}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Windows Terminal silently ignores a drive-rooted `backgroundImage` that
/// uses forward slashes. Returns the corrected path when a fix is needed.
pub fn corrected_image_path(path: &str) -> Option<String> {
    if path.contains("://") {
        return None;
    }
    let is_windows_path = is_drive_rooted(path) || path.starts_with("//");
    if is_windows_path && path.contains('/') {
        Some(path.replace('/', "\\"))
    } else {
        None
    }
}

/// Compares two image paths regardless of separator style and case.
pub fn same_image_path(left: &str, right: &str) -> bool {
    let canonical = |value: &str| value.trim().replace('/', "\\").to_lowercase();
    canonical(left) == canonical(right)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> BackgroundInfo {
        BackgroundInfo {
            session_name: "Feature".to_string(),
            directory: r"C:\work\app".to_string(),
            kind: ImageKind::Fork,
            forked_from: Some("Parent".to_string()),
            git_branch: Some("main".to_string()),
            model: None,
            origin: "DESKTOP-1:me".to_string(),
        }
    }

    #[test]
    fn rendered_text_lists_present_fields_only() {
        assert_eq!(
            info().rendered_text(),
            "Feature\nForked from: Parent\nC:\\work\\app\nBranch: main\nOrigin: DESKTOP-1:me"
        );
    }

    #[test]
    fn normalizes_inconsistent_origin_separators() {
        assert_eq!(normalize_origin(r"DESKTOP-1\me"), "DESKTOP-1:me");
        assert_eq!(normalize_origin("DESKTOP-1/me"), "DESKTOP-1:me");
        assert_eq!(normalize_origin("me@DESKTOP-1"), "DESKTOP-1:me");
        assert_eq!(normalize_origin("DESKTOP-1:me"), "DESKTOP-1:me");
        assert!(origin_matches(r"desktop-1\me", "DESKTOP-1:me"));
    }

    #[test]
    fn rewrites_origin_line_in_rendered_text() {
        let text = "Feature\nOrigin: DESKTOP-1\\me";
        assert_eq!(
            rewrite_origin_line(text, "DESKTOP-1:me"),
            "Feature\nOrigin: DESKTOP-1:me"
        );
    }

    #[test]
    fn corrects_forward_slashes_in_drive_paths_only() {
        assert_eq!(
            corrected_image_path("C:/Users/me/bg.png").as_deref(),
            Some(r"C:\Users\me\bg.png")
        );
        assert_eq!(corrected_image_path(r"C:\Users\me\bg.png"), None);
        assert_eq!(corrected_image_path("/home/me/bg.png"), None);
        assert_eq!(corrected_image_path("ms-appdata:///local/bg.png"), None);
        assert!(same_image_path("C:/a/B.png", r"c:\a\b.png"));
    }
}
