use crate::domain::{ProfileBinding, corrected_image_path, is_managed_profile};
use crate::infra::{ReadDocumentError, read_text_file};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ParseTerminalSettingsError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("settings root is not an object")]
    NotAnObject,

    #[error("settings have no profiles.list array")]
    MissingProfileList,
}

#[derive(Debug, Error)]
pub enum LoadTerminalSettingsError {
    #[error(transparent)]
    Read(#[from] ReadDocumentError),

    #[error("terminal settings not found: {path}")]
    Missing { path: String },

    #[error("failed to parse terminal settings {path}: {source}")]
    Parse {
        path: String,
        source: ParseTerminalSettingsError,
    },
}

#[derive(Debug, Error)]
pub enum EditTerminalSettingsError {
    #[error("failed to encode profile: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("settings have no profiles.list array")]
    MissingProfileList,
}

#[derive(Debug, Error)]
pub enum WriteTerminalSettingsError {
    #[error("failed to encode terminal settings: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to back up {path}: {source}")]
    Backup { path: String, source: io::Error },

    #[error("failed to write {path}: {source} (previous settings restored)")]
    Write { path: String, source: io::Error },

    #[error("written settings {path} were invalid: {reason} (previous settings restored)")]
    Invalid { path: String, reason: String },

    #[error(
        "could not restore {path} from backup {backup} after {cause}: {source}; terminal settings may be corrupt"
    )]
    RestoreFailed {
        path: String,
        backup: String,
        cause: String,
        source: io::Error,
    },
}

impl WriteTerminalSettingsError {
    /// The terminal's own state may now be broken; the user has to know.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RestoreFailed { .. })
    }
}

/// The terminal's settings document. Only `profiles.list` is ever edited;
/// everything else is carried through as parsed.
#[derive(Clone, Debug, PartialEq)]
pub struct TerminalSettings {
    root: Map<String, Value>,
}

impl TerminalSettings {
    pub fn parse(text: &str) -> Result<Self, ParseTerminalSettingsError> {
        let cleaned = strip_trailing_commas(&strip_json_comments(text));
        let value: Value = serde_json::from_str(&cleaned)?;
        validate_settings_root(&value)?;
        match value {
            Value::Object(root) => Ok(Self { root }),
            _ => Err(ParseTerminalSettingsError::NotAnObject),
        }
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.root.serialize(&mut serializer)?;
        out.push(b'\n');
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Profiles that deserialize; hidden or odd entries without a name are
    /// left out.
    pub fn profiles(&self) -> Vec<ProfileBinding> {
        self.list()
            .map(|list| {
                list.iter()
                    .filter_map(|value| serde_json::from_value(value.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.list()
            .map(|list| list.iter().filter_map(profile_name_of).map(str::to_string).collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn find_profile(&self, name: &str) -> Option<ProfileBinding> {
        let value = self
            .list()?
            .iter()
            .find(|value| profile_name_of(value) == Some(name))?;
        serde_json::from_value(value.clone()).ok()
    }

    pub fn has_profile(&self, name: &str) -> bool {
        self.list()
            .is_some_and(|list| list.iter().any(|value| profile_name_of(value) == Some(name)))
    }

    pub fn append_profile(
        &mut self,
        profile: &ProfileBinding,
    ) -> Result<(), EditTerminalSettingsError> {
        let value = serde_json::to_value(profile)?;
        let list = self
            .list_mut()
            .ok_or(EditTerminalSettingsError::MissingProfileList)?;
        list.push(value);
        Ok(())
    }

    pub fn remove_profile(&mut self, name: &str) -> Option<ProfileBinding> {
        let list = self.list_mut()?;
        let index = list
            .iter()
            .position(|value| profile_name_of(value) == Some(name))?;
        let removed = list.remove(index);
        serde_json::from_value(removed).ok()
    }

    pub fn rename_profile(&mut self, from: &str, to: &str) -> bool {
        self.with_profile_mut(from, |profile| {
            profile.insert("name".to_string(), Value::String(to.to_string()));
        })
    }

    pub fn set_background_image(&mut self, name: &str, image_path: &str, opacity: f64) -> bool {
        self.with_profile_mut(name, |profile| {
            profile.insert(
                "backgroundImage".to_string(),
                Value::String(image_path.to_string()),
            );
            if let Some(opacity) = serde_json::Number::from_f64(opacity) {
                profile.insert("backgroundImageOpacity".to_string(), Value::Number(opacity));
            }
        })
    }

    /// Rewrites separator-broken background image paths on profiles this
    /// tool manages. Returns how many profiles changed.
    pub fn normalize_background_paths(&mut self, prefix: &str) -> usize {
        let Some(list) = self.list_mut() else {
            return 0;
        };
        let mut fixed = 0usize;
        for value in list.iter_mut() {
            let Some(profile) = value.as_object_mut() else {
                continue;
            };
            let managed = profile
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|name| is_managed_profile(prefix, name));
            if !managed {
                continue;
            }
            let corrected = profile
                .get("backgroundImage")
                .and_then(Value::as_str)
                .and_then(corrected_image_path);
            if let Some(corrected) = corrected {
                profile.insert("backgroundImage".to_string(), Value::String(corrected));
                fixed += 1;
            }
        }
        fixed
    }

    fn list(&self) -> Option<&Vec<Value>> {
        self.root.get("profiles")?.get("list")?.as_array()
    }

    fn list_mut(&mut self) -> Option<&mut Vec<Value>> {
        self.root
            .get_mut("profiles")?
            .get_mut("list")?
            .as_array_mut()
    }

    fn with_profile_mut(&mut self, name: &str, change: impl FnOnce(&mut Map<String, Value>)) -> bool {
        let Some(list) = self.list_mut() else {
            return false;
        };
        let profile = list
            .iter_mut()
            .filter_map(Value::as_object_mut)
            .find(|profile| profile.get("name").and_then(Value::as_str) == Some(name));
        match profile {
            Some(profile) => {
                change(profile);
                true
            }
            None => false,
        }
    }
}

fn profile_name_of(value: &Value) -> Option<&str> {
    value.get("name").and_then(Value::as_str)
}

pub fn validate_settings_root(value: &Value) -> Result<(), ParseTerminalSettingsError> {
    let Some(root) = value.as_object() else {
        return Err(ParseTerminalSettingsError::NotAnObject);
    };
    let has_list = root
        .get("profiles")
        .and_then(|profiles| profiles.get("list"))
        .is_some_and(Value::is_array);
    if has_list {
        Ok(())
    } else {
        Err(ParseTerminalSettingsError::MissingProfileList)
    }
}

pub fn load_terminal_settings(path: &Path) -> Result<TerminalSettings, LoadTerminalSettingsError> {
    let Some(text) = read_text_file(path)? else {
        return Err(LoadTerminalSettingsError::Missing {
            path: path.display().to_string(),
        });
    };
    TerminalSettings::parse(&text).map_err(|source| LoadTerminalSettingsError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub fn write_terminal_settings(
    path: &Path,
    backups_dir: &Path,
    settings: &TerminalSettings,
) -> Result<Option<PathBuf>, WriteTerminalSettingsError> {
    let text = settings.to_json_string()?;
    replace_with_backup(path, backups_dir, text.as_bytes(), |target, bytes| {
        fs::write(target, bytes)
    })
}

/// Copy the current document to a timestamped backup, write through
/// `write`, then re-read and validate. Any failure after the backup puts the
/// backup back. Returns the backup path when one was taken.
pub fn replace_with_backup(
    path: &Path,
    backups_dir: &Path,
    contents: &[u8],
    write: impl FnOnce(&Path, &[u8]) -> io::Result<()>,
) -> Result<Option<PathBuf>, WriteTerminalSettingsError> {
    let backup = if path.exists() {
        Some(take_backup(path, backups_dir)?)
    } else {
        None
    };

    if let Err(source) = write(path, contents) {
        restore(path, backup.as_deref(), &source.to_string())?;
        return Err(WriteTerminalSettingsError::Write {
            path: path.display().to_string(),
            source,
        });
    }

    if let Err(reason) = validate_written(path) {
        restore(path, backup.as_deref(), &reason)?;
        return Err(WriteTerminalSettingsError::Invalid {
            path: path.display().to_string(),
            reason,
        });
    }

    info!(path = %path.display(), "terminal settings written");
    Ok(backup)
}

fn take_backup(path: &Path, backups_dir: &Path) -> Result<PathBuf, WriteTerminalSettingsError> {
    let backup_error = |source: io::Error| WriteTerminalSettingsError::Backup {
        path: path.display().to_string(),
        source,
    };
    fs::create_dir_all(backups_dir).map_err(backup_error)?;

    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("settings");
    let stamp = backup_stamp(OffsetDateTime::now_utc());
    let mut backup = backups_dir.join(format!("{stem}-{stamp}.json"));
    let mut counter: u32 = 1;
    while backup.exists() {
        backup = backups_dir.join(format!("{stem}-{stamp}-{counter}.json"));
        counter = counter.saturating_add(1);
    }

    fs::copy(path, &backup).map_err(backup_error)?;
    Ok(backup)
}

fn backup_stamp(now: OffsetDateTime) -> String {
    let format = format_description!("[year][month][day]-[hour][minute][second]-[subsecond digits:3]");
    now.format(&format)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

fn validate_written(path: &Path) -> Result<(), String> {
    let text = fs::read_to_string(path).map_err(|error| error.to_string())?;
    TerminalSettings::parse(&text)
        .map(|_| ())
        .map_err(|error| error.to_string())
}

fn restore(path: &Path, backup: Option<&Path>, cause: &str) -> Result<(), WriteTerminalSettingsError> {
    warn!(path = %path.display(), cause, "restoring terminal settings");
    let result = match backup {
        Some(backup) => fs::copy(backup, path).map(|_| ()),
        None => match fs::remove_file(path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error),
            _ => Ok(()),
        },
    };
    result.map_err(|source| {
        error!(path = %path.display(), %source, "terminal settings restore failed");
        WriteTerminalSettingsError::RestoreFailed {
            path: path.display().to_string(),
            backup: backup
                .map(|backup| backup.display().to_string())
                .unwrap_or_else(|| "(none)".to_string()),
            cause: cause.to_string(),
            source,
        }
    })
}

/// Drops `//` and `/* */` comments outside string literals. Newlines are
/// kept so parse errors still point at the right line.
fn strip_json_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for next in chars.by_ref() {
                    if previous == '*' && next == '/' {
                        break;
                    }
                    if next == '\n' {
                        out.push('\n');
                    }
                    previous = next;
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (index, ch) in text.char_indices() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let rest = text[index + 1..].trim_start();
            if rest.starts_with(']') || rest.starts_with('}') {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SETTINGS: &str = r##"{
    // user settings
    "$schema": "https://aka.ms/terminal-profiles-schema",
    "defaultProfile": "{00000000-0000-0000-0000-000000000001}",
    "profiles": {
        "defaults": { "font": { "face": "Cascadia Mono" } },
        "list": [
            { "name": "PowerShell", "guid": "{00000000-0000-0000-0000-000000000001}" },
            {
                "name": "Claude-Foo",
                "startingDirectory": "C:\\work\\foo",
                "backgroundImage": "C:/Users/me/bg/foo.png", /* broken */
            },
        ]
    },
    "schemes": [ { "name": "Campbell", "background": "#0C0C0C" } ]
}"##;

    fn settings() -> TerminalSettings {
        TerminalSettings::parse(SETTINGS).expect("parse")
    }

    #[test]
    fn parses_commented_settings_and_lists_profiles() {
        let settings = settings();
        assert_eq!(settings.profile_names(), vec!["PowerShell", "Claude-Foo"]);
        let foo = settings.find_profile("Claude-Foo").expect("profile");
        assert_eq!(foo.starting_directory.as_deref(), Some(r"C:\work\foo"));
        assert!(!settings.has_profile("Claude-Bar"));
    }

    #[test]
    fn comment_markers_inside_strings_are_kept() {
        let settings = TerminalSettings::parse(
            r#"{"profiles":{"list":[{"name":"a//b","commandline":"x /* y */"}]}}"#,
        )
        .expect("parse");
        assert!(settings.has_profile("a//b"));
    }

    #[test]
    fn rejects_documents_without_profile_list() {
        assert!(matches!(
            TerminalSettings::parse(r#"{"profiles":[]}"#),
            Err(ParseTerminalSettingsError::MissingProfileList)
        ));
        assert!(matches!(
            TerminalSettings::parse("[]"),
            Err(ParseTerminalSettingsError::NotAnObject)
        ));
    }

    #[test]
    fn unrelated_sections_survive_a_round_trip() {
        let mut settings = settings();
        settings.rename_profile("Claude-Foo", "Claude-Bar");
        let reparsed = TerminalSettings::parse(&settings.to_json_string().expect("encode"))
            .expect("reparse");
        assert_eq!(reparsed.root.get("schemes"), settings.root.get("schemes"));
        assert_eq!(
            reparsed.root.get("defaultProfile"),
            settings.root.get("defaultProfile")
        );
        assert!(reparsed.has_profile("Claude-Bar"));
        let keys: Vec<&String> = reparsed.root.keys().collect();
        assert_eq!(keys, vec!["$schema", "defaultProfile", "profiles", "schemes"]);
    }

    #[test]
    fn append_and_remove_profiles() {
        let mut settings = settings();
        let profile = ProfileBinding {
            name: "Claude-New".to_string(),
            guid: Some("{11111111-1111-1111-1111-111111111111}".to_string()),
            starting_directory: Some(r"C:\work\new".to_string()),
            background_image_path: None,
            background_opacity: None,
            extra: Map::new(),
        };
        settings.append_profile(&profile).expect("append");
        assert_eq!(settings.find_profile("Claude-New"), Some(profile));
        assert!(settings.remove_profile("Claude-New").is_some());
        assert!(settings.remove_profile("Claude-New").is_none());
    }

    #[test]
    fn background_path_normalization_is_idempotent() {
        let mut settings = settings();
        assert_eq!(settings.normalize_background_paths("Claude-"), 1);
        assert_eq!(
            settings
                .find_profile("Claude-Foo")
                .and_then(|p| p.background_image_path)
                .as_deref(),
            Some(r"C:\Users\me\bg\foo.png")
        );
        let before = settings.clone();
        assert_eq!(settings.normalize_background_paths("Claude-"), 0);
        assert_eq!(settings, before);
    }

    #[test]
    fn writes_with_backup_and_validates() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let backups = dir.path().join("backups");
        fs::write(&path, SETTINGS).expect("write");

        let mut settings = load_terminal_settings(&path).expect("load");
        settings.rename_profile("Claude-Foo", "Claude-Renamed");
        let backup = write_terminal_settings(&path, &backups, &settings)
            .expect("write")
            .expect("backup");

        assert_eq!(fs::read_to_string(&backup).expect("backup"), SETTINGS);
        assert!(load_terminal_settings(&path).expect("reload").has_profile("Claude-Renamed"));
    }

    #[test]
    fn corrupt_write_restores_byte_identical_document() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let backups = dir.path().join("backups");
        fs::write(&path, SETTINGS).expect("write");
        let before = fs::read(&path).expect("read");

        let result = replace_with_backup(&path, &backups, b"{\"profiles\":", |target, _| {
            fs::write(target, b"{ truncated")
        });

        let error = result.expect_err("invalid");
        assert!(matches!(error, WriteTerminalSettingsError::Invalid { .. }));
        assert!(!error.is_fatal());
        assert_eq!(fs::read(&path).expect("read"), before);
    }

    #[test]
    fn failed_write_restores_previous_document() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let backups = dir.path().join("backups");
        fs::write(&path, SETTINGS).expect("write");

        let result = replace_with_backup(&path, &backups, b"{}", |target, _| {
            fs::write(target, b"partial")?;
            Err(io::Error::other("disk full"))
        });

        assert!(matches!(result, Err(WriteTerminalSettingsError::Write { .. })));
        assert_eq!(fs::read_to_string(&path).expect("read"), SETTINGS);
    }

    #[test]
    fn missing_settings_is_reported() {
        let dir = tempdir().expect("tempdir");
        assert!(matches!(
            load_terminal_settings(&dir.path().join("settings.json")),
            Err(LoadTerminalSettingsError::Missing { .. })
        ));
    }
}
