use crate::domain::{
    BackgroundAssetRecord, BackgroundInfo, ProfileBinding, format_origin, same_image_path,
};
use crate::infra::{ReadDocumentError, WriteDocumentError, read_json_file, write_json_atomic};
use png::{BitDepth, ColorType, Encoder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

const BACKGROUND_TRACKING_VERSION: u32 = 1;
const SIDECAR_EXTENSION: &str = "txt";

/// Generated background images, tracked apart from the profiles that show
/// them so that images nobody references can be found and reclaimed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackgroundTracking {
    records: Vec<BackgroundAssetRecord>,
    extra: Map<String, Value>,
}

impl BackgroundTracking {
    #[cfg(test)]
    pub fn records(&self) -> &[BackgroundAssetRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut BackgroundAssetRecord> {
        self.records.iter_mut()
    }

    pub fn find(&self, image_path: &str) -> Option<&BackgroundAssetRecord> {
        self.records
            .iter()
            .find(|record| same_image_path(&record.image_path, image_path))
    }

    /// Replaces the record for the same image path, keeping its `created`.
    pub fn upsert(&mut self, mut record: BackgroundAssetRecord) {
        match self
            .records
            .iter()
            .position(|existing| same_image_path(&existing.image_path, &record.image_path))
        {
            Some(index) => {
                record.created = self.records[index].created;
                self.records[index] = record;
            }
            None => self.records.push(record),
        }
    }

    pub fn remove(&mut self, image_path: &str) -> Option<BackgroundAssetRecord> {
        let index = self
            .records
            .iter()
            .position(|record| same_image_path(&record.image_path, image_path))?;
        Some(self.records.remove(index))
    }

    /// Records whose image no profile points at.
    pub fn orphans(&self, profiles: &[ProfileBinding]) -> Vec<BackgroundAssetRecord> {
        self.records
            .iter()
            .filter(|record| {
                !profiles.iter().any(|profile| {
                    profile
                        .background_image_path
                        .as_deref()
                        .is_some_and(|path| same_image_path(path, &record.image_path))
                })
            })
            .cloned()
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum LoadBackgroundTrackingError {
    #[error(transparent)]
    Read(#[from] ReadDocumentError),
}

#[derive(Debug, Error)]
pub enum SaveBackgroundTrackingError {
    #[error(transparent)]
    Write(#[from] WriteDocumentError),
}

#[derive(Debug, Error)]
pub enum UpdateBackgroundTrackingError {
    #[error(transparent)]
    Load(#[from] LoadBackgroundTrackingError),

    #[error(transparent)]
    Save(#[from] SaveBackgroundTrackingError),
}

#[derive(Debug, Deserialize)]
struct BackgroundTrackingFileIn {
    #[serde(default)]
    backgrounds: Vec<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct BackgroundTrackingFileOut<'a> {
    version: u32,
    backgrounds: &'a [BackgroundAssetRecord],
    #[serde(flatten)]
    extra: &'a Map<String, Value>,
}

pub fn load_background_tracking(
    path: &Path,
) -> Result<BackgroundTracking, LoadBackgroundTrackingError> {
    let Some(file) = read_json_file::<BackgroundTrackingFileIn>(path)? else {
        return Ok(BackgroundTracking::default());
    };

    let mut extra = file.extra;
    extra.remove("version");

    let mut records = Vec::with_capacity(file.backgrounds.len());
    for raw in file.backgrounds {
        match serde_json::from_value::<BackgroundAssetRecord>(raw) {
            Ok(record) => records.push(record),
            Err(error) => warn!(%error, "dropping unreadable background record"),
        }
    }
    Ok(BackgroundTracking { records, extra })
}

pub fn save_background_tracking(
    path: &Path,
    tracking: &BackgroundTracking,
) -> Result<(), SaveBackgroundTrackingError> {
    let file = BackgroundTrackingFileOut {
        version: BACKGROUND_TRACKING_VERSION,
        backgrounds: &tracking.records,
        extra: &tracking.extra,
    };
    write_json_atomic(path, &file)?;
    Ok(())
}

pub fn update_background_tracking<T>(
    path: &Path,
    change: impl FnOnce(&mut BackgroundTracking) -> T,
) -> Result<T, UpdateBackgroundTrackingError> {
    let mut tracking = load_background_tracking(path)?;
    let result = change(&mut tracking);
    save_background_tracking(path, &tracking)?;
    Ok(result)
}

/// Deletes an image, its text sidecar and the per-profile directory when it
/// ends up empty. Files already gone count as deleted.
pub fn delete_background_files(image_path: &Path) -> io::Result<()> {
    for path in [
        image_path.to_path_buf(),
        image_path.with_extension(SIDECAR_EXTENSION),
    ] {
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed background file"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(error),
        }
    }
    if let Some(parent) = image_path.parent() {
        let is_empty = fs::read_dir(parent)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty {
            let _ = fs::remove_dir(parent);
        }
    }
    Ok(())
}

/// `host:user` for the machine this process runs on.
pub fn current_origin() -> String {
    let host = env_first(&["COMPUTERNAME", "HOSTNAME"]).unwrap_or_else(|| "localhost".to_string());
    let user = env_first(&["USERNAME", "USER"]).unwrap_or_else(|| "unknown".to_string());
    format_origin(&host, &user)
}

fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

#[derive(Debug, Error)]
pub enum RenderBackgroundError {
    #[error("failed to create background dir {path}: {source}")]
    CreateDir { path: String, source: io::Error },

    #[error("failed to create image file {path}: {source}")]
    CreateFile { path: String, source: io::Error },

    #[error("failed to write image file {path}: {source}")]
    WriteFile { path: String, source: io::Error },

    #[error("failed to encode png: {0}")]
    EncodePng(String),
}

/// Turns background text into an image file at `dest`.
pub trait BackgroundRenderer {
    fn render(&self, info: &BackgroundInfo, dest: &Path) -> Result<(), RenderBackgroundError>;
}

/// Solid dark image plus a `.txt` sidecar carrying the text the image stands
/// for. Glyph rendering is left to a richer renderer.
#[derive(Clone, Copy, Debug)]
pub struct PlainBackgroundRenderer {
    pub width: u32,
    pub height: u32,
    pub color: [u8; 4],
}

impl Default for PlainBackgroundRenderer {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            color: [0x12, 0x12, 0x16, 0xff],
        }
    }
}

impl BackgroundRenderer for PlainBackgroundRenderer {
    fn render(&self, info: &BackgroundInfo, dest: &Path) -> Result<(), RenderBackgroundError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|error| RenderBackgroundError::CreateDir {
                path: parent.display().to_string(),
                source: error,
            })?;
        }

        self.write_png(dest)?;

        let sidecar = dest.with_extension(SIDECAR_EXTENSION);
        fs::write(&sidecar, info.rendered_text()).map_err(|error| {
            RenderBackgroundError::WriteFile {
                path: sidecar.display().to_string(),
                source: error,
            }
        })
    }
}

impl PlainBackgroundRenderer {
    fn write_png(&self, dest: &Path) -> Result<(), RenderBackgroundError> {
        let file = fs::File::create(dest).map_err(|error| RenderBackgroundError::CreateFile {
            path: dest.display().to_string(),
            source: error,
        })?;

        let mut encoder = Encoder::new(io::BufWriter::new(file), self.width, self.height);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);

        let pixels = usize::try_from(u64::from(self.width) * u64::from(self.height))
            .map_err(|error| RenderBackgroundError::EncodePng(error.to_string()))?;
        let data = self.color.repeat(pixels);

        let mut writer = encoder
            .write_header()
            .map_err(|error| RenderBackgroundError::EncodePng(error.to_string()))?;
        writer.write_image_data(&data).map_err(|error| match error {
            png::EncodingError::IoError(io) => RenderBackgroundError::WriteFile {
                path: dest.display().to_string(),
                source: io,
            },
            other => RenderBackgroundError::EncodePng(other.to_string()),
        })?;
        writer
            .finish()
            .map_err(|error| RenderBackgroundError::EncodePng(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ImageKind;
    use tempfile::tempdir;
    use time::OffsetDateTime;

    fn record(path: &str) -> BackgroundAssetRecord {
        BackgroundAssetRecord {
            session_name: "Foo".to_string(),
            image_path: path.to_string(),
            rendered_text_content: "Foo".to_string(),
            image_kind: ImageKind::New,
            origin: Some("HOST:me".to_string()),
            created: OffsetDateTime::UNIX_EPOCH,
            updated: OffsetDateTime::UNIX_EPOCH,
            extra: Map::new(),
        }
    }

    fn profile(name: &str, image: Option<&str>) -> ProfileBinding {
        ProfileBinding {
            name: name.to_string(),
            guid: None,
            starting_directory: None,
            background_image_path: image.map(str::to_string),
            background_opacity: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn orphans_are_records_no_profile_references() {
        let mut tracking = BackgroundTracking::default();
        tracking.upsert(record(r"C:\bg\a.png"));
        tracking.upsert(record(r"C:\bg\b.png"));

        let profiles = [profile("Claude-A", Some("C:/bg/a.png")), profile("Other", None)];
        let orphans = tracking.orphans(&profiles);

        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].image_path, r"C:\bg\b.png");
    }

    #[test]
    fn upsert_replaces_by_image_path_and_keeps_created() {
        let mut tracking = BackgroundTracking::default();
        tracking.upsert(record(r"C:\bg\a.png"));
        let mut next = record(r"C:\bg\a.png");
        next.session_name = "Bar".to_string();
        next.created = OffsetDateTime::now_utc();
        tracking.upsert(next);

        assert_eq!(tracking.records().len(), 1);
        assert_eq!(tracking.records()[0].session_name, "Bar");
        assert_eq!(tracking.records()[0].created, OffsetDateTime::UNIX_EPOCH);
    }

    #[test]
    fn tracking_document_round_trips_through_disk() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("background-tracking.json");
        update_background_tracking(&path, |tracking| tracking.upsert(record(r"C:\bg\a.png")))
            .expect("update");
        let loaded = load_background_tracking(&path).expect("load");
        assert!(loaded.find(r"c:\BG\a.png").is_some());
    }

    #[test]
    fn plain_renderer_writes_png_and_sidecar() {
        let dir = tempdir().expect("tempdir");
        let dest = dir.path().join("Claude-Foo").join("background.png");
        let info = BackgroundInfo {
            session_name: "Foo".to_string(),
            directory: r"C:\work".to_string(),
            kind: ImageKind::New,
            forked_from: None,
            git_branch: None,
            model: None,
            origin: "HOST:me".to_string(),
        };
        let renderer = PlainBackgroundRenderer {
            width: 4,
            height: 2,
            ..PlainBackgroundRenderer::default()
        };

        renderer.render(&info, &dest).expect("render");

        let bytes = fs::read(&dest).expect("png");
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(
            fs::read_to_string(dest.with_extension("txt")).expect("sidecar"),
            info.rendered_text()
        );

        delete_background_files(&dest).expect("delete");
        assert!(!dest.exists());
        assert!(!dest.parent().expect("parent").exists());
    }
}
