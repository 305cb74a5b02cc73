use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use time::OffsetDateTime;

pub const UNNAMED_TITLE: &str = "(unnamed)";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionOrigin {
    /// Listed by the agent's own index.
    Authoritative,
    /// Created by this tool and launched, but not indexed by the agent yet.
    LocalOnly,
    /// Found as a bare session file in a project directory that has no index.
    Unindexed,
}

impl SessionOrigin {
    pub fn label(self) -> &'static str {
        match self {
            Self::Authoritative => "indexed",
            Self::LocalOnly => "local",
            Self::Unindexed => "unindexed",
        }
    }
}

/// One row of the merged session list. Assembled at discovery time from the
/// agent's index, the mapping store, and the filesystem; never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub display_name: Option<String>,
    pub project_path: String,
    pub created: OffsetDateTime,
    pub modified: OffsetDateTime,
    pub message_count: u64,
    pub forked_from: Option<String>,
    pub origin: SessionOrigin,
    pub profile_name: Option<String>,
    pub model: Option<String>,
    pub git_branch: Option<String>,
    pub notes: String,
    pub archived: bool,
    pub data_file: PathBuf,
}

impl SessionRecord {
    pub fn title(&self) -> &str {
        self.display_name.as_deref().unwrap_or(UNNAMED_TITLE)
    }
}

pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((index, _)) => &id[..index],
        None => id,
    }
}

/// A session as the agent's index (or a bare session file) describes it,
/// before any local knowledge is merged in.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexedSession {
    pub id: String,
    pub custom_title: Option<String>,
    pub first_prompt: Option<String>,
    pub project_path: String,
    pub created: OffsetDateTime,
    pub modified: OffsetDateTime,
    pub message_count: u64,
    pub git_branch: Option<String>,
    pub data_file: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    pub session_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub project_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forked_from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub notes: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub archived: bool,

    #[serde(
        default = "unix_epoch",
        serialize_with = "time::serde::rfc3339::serialize",
        deserialize_with = "timestamp_or_epoch"
    )]
    pub created: OffsetDateTime,

    #[serde(
        default = "unix_epoch",
        serialize_with = "time::serde::rfc3339::serialize",
        deserialize_with = "timestamp_or_epoch"
    )]
    pub updated: OffsetDateTime,

    /// Fields written by newer versions are carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MappingEntry {
    pub fn new(session_id: &str, now: OffsetDateTime) -> Self {
        Self {
            session_id: session_id.to_string(),
            profile_name: None,
            project_path: String::new(),
            model: None,
            forked_from: None,
            git_branch: None,
            notes: String::new(),
            archived: false,
            created: now,
            updated: now,
            extra: Map::new(),
        }
    }
}

/// The fields an upsert sets. `None` leaves a field as it is; the nested
/// `Option` on optional fields distinguishes "clear" from "keep".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MappingPatch {
    pub profile_name: Option<Option<String>>,
    pub project_path: Option<String>,
    pub model: Option<Option<String>>,
    pub forked_from: Option<Option<String>>,
    pub git_branch: Option<Option<String>>,
    pub notes: Option<String>,
    pub archived: Option<bool>,
}

impl MappingPatch {
    pub fn profile_name(mut self, value: impl Into<String>) -> Self {
        self.profile_name = Some(Some(value.into()));
        self
    }

    pub fn clear_profile_name(mut self) -> Self {
        self.profile_name = Some(None);
        self
    }

    pub fn project_path(mut self, value: impl Into<String>) -> Self {
        self.project_path = Some(value.into());
        self
    }

    pub fn model(mut self, value: Option<String>) -> Self {
        self.model = Some(value);
        self
    }

    pub fn forked_from(mut self, value: impl Into<String>) -> Self {
        self.forked_from = Some(Some(value.into()));
        self
    }

    pub fn git_branch(mut self, value: Option<String>) -> Self {
        self.git_branch = Some(value);
        self
    }

    pub fn notes(mut self, value: impl Into<String>) -> Self {
        self.notes = Some(value.into());
        self
    }

    pub fn archived(mut self, value: bool) -> Self {
        self.archived = Some(value);
        self
    }

    /// Builds the replacement record: a copy of `base` with every set field
    /// overwritten and `updated` stamped.
    pub fn merged_onto(&self, base: &MappingEntry, now: OffsetDateTime) -> MappingEntry {
        let mut next = base.clone();
        if let Some(value) = &self.profile_name {
            next.profile_name = value.clone();
        }
        if let Some(value) = &self.project_path {
            next.project_path = value.clone();
        }
        if let Some(value) = &self.model {
            next.model = value.clone();
        }
        if let Some(value) = &self.forked_from {
            next.forked_from = value.clone();
        }
        if let Some(value) = &self.git_branch {
            next.git_branch = value.clone();
        }
        if let Some(value) = &self.notes {
            next.notes = value.clone();
        }
        if let Some(value) = self.archived {
            next.archived = value;
        }
        next.updated = now;
        next
    }
}

/// A Windows Terminal profile entry from `profiles.list`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileBinding {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_directory: Option<String>,

    #[serde(rename = "backgroundImage", default, skip_serializing_if = "Option::is_none")]
    pub background_image_path: Option<String>,

    #[serde(
        rename = "backgroundImageOpacity",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub background_opacity: Option<f64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    New,
    Fork,
    Continue,
    Custom,
}

impl ImageKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Fork => "fork",
            Self::Continue => "continue",
            Self::Custom => "custom",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundAssetRecord {
    pub session_name: String,
    pub image_path: String,

    #[serde(default)]
    pub rendered_text_content: String,

    pub image_kind: ImageKind,

    /// `host:user` the image was rendered for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    #[serde(default = "unix_epoch", with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,

    #[serde(default = "unix_epoch", with = "time::serde::rfc3339")]
    pub updated: OffsetDateTime,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn unix_epoch() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH
}

/// Older writers stored `null` for empty fields.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `null` reads as the epoch; any other non-RFC 3339 value is an error.
fn timestamp_or_epoch<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(time::serde::rfc3339::option::deserialize(deserializer)?.unwrap_or_else(unix_epoch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn patch_keeps_unset_fields_and_stamps_updated() {
        let created = datetime!(2026-01-20 10:00:00 UTC);
        let later = datetime!(2026-01-21 09:30:00 UTC);
        let mut base = MappingEntry::new("abc", created);
        base.model = Some("sonnet".to_string());

        let next = MappingPatch::default().notes("x").merged_onto(&base, later);

        assert_eq!(next.model.as_deref(), Some("sonnet"));
        assert_eq!(next.notes, "x");
        assert_eq!(next.created, created);
        assert_eq!(next.updated, later);
    }

    #[test]
    fn old_records_without_newer_fields_deserialize() {
        let entry: MappingEntry =
            serde_json::from_str(r#"{"sessionId":"abc","profileName":"Claude-Foo"}"#)
                .expect("parse");
        assert_eq!(entry.profile_name.as_deref(), Some("Claude-Foo"));
        assert!(!entry.archived);
        assert!(entry.notes.is_empty());
        assert_eq!(entry.created, OffsetDateTime::UNIX_EPOCH);
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let raw = r#"{"sessionId":"abc","created":"2026-01-20T10:00:00Z","updated":"2026-01-20T10:00:00Z","pinned":true}"#;
        let entry: MappingEntry = serde_json::from_str(raw).expect("parse");
        let text = serde_json::to_string(&entry).expect("encode");
        assert!(text.contains(r#""pinned":true"#));
    }

    #[test]
    fn short_id_takes_first_eight_chars() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
