pub const DEFAULT_PROFILE_PREFIX: &str = "Claude-";

const MAX_LABEL_CHARS: usize = 48;

/// Reduces a display name to characters that are safe both as a profile name
/// and as a directory name for its background assets.
pub fn sanitize_profile_label(display_name: &str) -> String {
    let mut label = String::new();
    let mut pending_dash = false;
    for ch in display_name.trim().chars() {
        if ch.is_alphanumeric() || ch == '_' || ch == '.' {
            if pending_dash && !label.is_empty() {
                label.push('-');
            }
            pending_dash = false;
            label.push(ch);
        } else {
            pending_dash = true;
        }
        if label.chars().count() >= MAX_LABEL_CHARS {
            break;
        }
    }

    let label = label.trim_matches('.').to_string();
    if label.is_empty() {
        "session".to_string()
    } else {
        label
    }
}

pub fn profile_name_for(prefix: &str, display_name: &str) -> String {
    format!("{prefix}{}", sanitize_profile_label(display_name))
}

/// First free profile name for `display_name`, appending 1, 2, ... to the
/// prefixed name while `taken` reports a collision.
pub fn unique_profile_name(
    prefix: &str,
    display_name: &str,
    taken: impl Fn(&str) -> bool,
) -> String {
    let base = profile_name_for(prefix, display_name);
    if !taken(&base) {
        return base;
    }

    let mut counter: u32 = 1;
    loop {
        let candidate = format!("{base}{counter}");
        if !taken(&candidate) {
            return candidate;
        }
        counter = counter.saturating_add(1);
    }
}

pub fn strip_profile_prefix<'a>(prefix: &str, profile_name: &'a str) -> Option<&'a str> {
    profile_name
        .strip_prefix(prefix)
        .filter(|rest| !rest.is_empty())
}

pub fn is_managed_profile(prefix: &str, profile_name: &str) -> bool {
    strip_profile_prefix(prefix, profile_name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_display_names() {
        assert_eq!(sanitize_profile_label("  My new feature! "), "My-new-feature");
        assert_eq!(sanitize_profile_label("fix/api: v2.1"), "fix-api-v2.1");
        assert_eq!(sanitize_profile_label("???"), "session");
    }

    #[test]
    fn suffixes_increasing_integers_on_collision() {
        let existing = ["Claude-Foo", "Claude-Foo1"];
        let name = unique_profile_name(DEFAULT_PROFILE_PREFIX, "Foo", |candidate| {
            existing.contains(&candidate)
        });
        assert_eq!(name, "Claude-Foo2");

        let fresh = unique_profile_name(DEFAULT_PROFILE_PREFIX, "Bar", |candidate| {
            existing.contains(&candidate)
        });
        assert_eq!(fresh, "Claude-Bar");
    }

    #[test]
    fn strips_prefix_only_from_managed_names() {
        assert_eq!(strip_profile_prefix("Claude-", "Claude-Foo"), Some("Foo"));
        assert_eq!(strip_profile_prefix("Claude-", "Claude-"), None);
        assert_eq!(strip_profile_prefix("Claude-", "PowerShell"), None);
        assert!(!is_managed_profile("Claude-", "Ubuntu"));
    }
}
