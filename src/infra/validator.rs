use crate::domain::{MappingPatch, encode_project_path, normalize_origin, rewrite_origin_line};
use crate::infra::{
    CachedLoadError, Config, DocumentCache, UpdateBackgroundTrackingError,
    UpdateMappingStoreError, WriteTerminalSettingsError, delete_background_files,
    update_background_tracking, update_mapping_store, write_terminal_settings,
};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationScope {
    /// Every check, including the ones that delete files.
    Startup,
    /// The cheap checks run after each explicit refresh or mutation.
    Refresh,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationReport {
    pub cleared_profile_refs: Vec<String>,
    pub fixed_background_paths: usize,
    pub normalized_origins: usize,
    pub reclaimed_assets: usize,
    pub evicted_local_only: Vec<String>,
    pub failures: Vec<String>,
}

impl ValidationReport {
    pub fn repairs(&self) -> usize {
        self.cleared_profile_refs.len()
            + self.fixed_background_paths
            + self.normalized_origins
            + self.reclaimed_assets
            + self.evicted_local_only.len()
    }
}

#[derive(Debug, Error)]
enum CheckError {
    #[error(transparent)]
    Snapshot(#[from] CachedLoadError),

    #[error(transparent)]
    Mapping(#[from] UpdateMappingStoreError),

    #[error(transparent)]
    Tracking(#[from] UpdateBackgroundTrackingError),

    #[error(transparent)]
    WriteSettings(#[from] WriteTerminalSettingsError),
}

/// Detects and repairs drift between the mapping store, the terminal
/// profiles and the background tracking document. Checks run independently;
/// a failing check is reported and the rest still run. The only error
/// returned is a terminal settings restore that did not succeed.
///
/// Reads go through `cache`; callers clear it before the next discovery.
pub fn run_validation(
    cache: &mut DocumentCache,
    config: &Config,
    scope: ValidationScope,
    now: OffsetDateTime,
) -> Result<ValidationReport, WriteTerminalSettingsError> {
    let mut report = ValidationReport::default();

    let result = clear_dangling_profile_refs(cache);
    if let Some(cleared) = settle(&mut report, "dangling profile refs", result)? {
        report.cleared_profile_refs = cleared;
    }

    if scope == ValidationScope::Startup {
        let result = fix_background_paths(cache, config);
        if let Some(fixed) = settle(&mut report, "background paths", result)? {
            report.fixed_background_paths = fixed;
        }
    }

    let result = normalize_stored_origins(cache);
    if let Some(normalized) = settle(&mut report, "origins", result)? {
        report.normalized_origins = normalized;
    }

    if scope == ValidationScope::Startup {
        let result = reclaim_orphan_assets(cache);
        if let Some(reclaimed) = settle(&mut report, "orphan assets", result)? {
            report.reclaimed_assets = reclaimed;
        }

        let result = evict_stale_local_only(cache, config, now);
        if let Some(evicted) = settle(&mut report, "local-only eviction", result)? {
            report.evicted_local_only = evicted;
        }
    }

    if report.repairs() > 0 {
        info!(
            cleared = report.cleared_profile_refs.len(),
            paths = report.fixed_background_paths,
            origins = report.normalized_origins,
            reclaimed = report.reclaimed_assets,
            evicted = report.evicted_local_only.len(),
            "validator repaired drift"
        );
    }
    Ok(report)
}

fn settle<T>(
    report: &mut ValidationReport,
    check: &str,
    result: Result<T, CheckError>,
) -> Result<Option<T>, WriteTerminalSettingsError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(CheckError::WriteSettings(error)) if error.is_fatal() => Err(error),
        Err(error) => {
            warn!(check, %error, "validation check failed");
            report.failures.push(format!("{check}: {error}"));
            Ok(None)
        }
    }
}

/// Mapping entries naming a profile the terminal no longer has lose the
/// profile name. The entries themselves stay.
fn clear_dangling_profile_refs(cache: &mut DocumentCache) -> Result<Vec<String>, CheckError> {
    let settings = cache.terminal_settings()?;
    let existing: HashSet<String> = settings.profile_names().into_iter().collect();

    let dangling: Vec<String> = cache
        .mapping_store()?
        .list_all()
        .iter()
        .filter(|entry| {
            entry
                .profile_name
                .as_deref()
                .is_some_and(|name| !existing.contains(name))
        })
        .map(|entry| entry.session_id.clone())
        .collect();
    if dangling.is_empty() {
        return Ok(dangling);
    }

    let path = cache.paths().mapping_store();
    update_mapping_store(&path, |store| {
        for session_id in &dangling {
            store.upsert(session_id, &MappingPatch::default().clear_profile_name());
        }
    })?;
    for session_id in &dangling {
        info!(session_id = %session_id, "cleared reference to missing profile");
    }
    Ok(dangling)
}

fn fix_background_paths(cache: &mut DocumentCache, config: &Config) -> Result<usize, CheckError> {
    let mut settings = (*cache.terminal_settings()?).clone();
    let fixed = settings.normalize_background_paths(&config.profile_prefix);
    if fixed == 0 {
        return Ok(0);
    }
    let paths = cache.paths().clone();
    write_terminal_settings(&paths.terminal_settings, &paths.backups_dir(), &settings)?;
    info!(fixed, "rewrote background image paths");
    Ok(fixed)
}

fn normalize_stored_origins(cache: &mut DocumentCache) -> Result<usize, CheckError> {
    let path = cache.paths().background_tracking();
    let normalized = update_background_tracking(&path, |tracking| {
        let mut normalized = 0usize;
        for record in tracking.records_mut() {
            let Some(stored) = record.origin.as_deref() else {
                continue;
            };
            let fixed = normalize_origin(stored);
            if fixed == stored {
                continue;
            }
            record.rendered_text_content = rewrite_origin_line(&record.rendered_text_content, &fixed);
            record.origin = Some(fixed);
            normalized += 1;
        }
        normalized
    })?;
    Ok(normalized)
}

fn reclaim_orphan_assets(cache: &mut DocumentCache) -> Result<usize, CheckError> {
    let profiles = cache.terminal_settings()?.profiles();
    let path = cache.paths().background_tracking();
    let reclaimed = update_background_tracking(&path, |tracking| {
        let mut reclaimed = 0usize;
        for orphan in tracking.orphans(&profiles) {
            let image = PathBuf::from(&orphan.image_path);
            match delete_background_files(&image) {
                Ok(()) => {
                    tracking.remove(&orphan.image_path);
                    reclaimed += 1;
                }
                Err(error) => {
                    warn!(path = %image.display(), %error, "could not reclaim background");
                }
            }
        }
        reclaimed
    })?;
    Ok(reclaimed)
}

/// Drops mapping entries for sessions that never showed up: unknown to the
/// agent, no session file, and older than the configured age.
fn evict_stale_local_only(
    cache: &mut DocumentCache,
    config: &Config,
    now: OffsetDateTime,
) -> Result<Vec<String>, CheckError> {
    let scan = cache.session_indexes();
    let paths = cache.paths().clone();
    if let Some(notice) = &scan.notice {
        warn!(%notice, "skipping local-only eviction");
        return Ok(Vec::new());
    }
    if !paths.projects_dir.is_dir() {
        warn!(projects_dir = %paths.projects_dir.display(), "skipping local-only eviction");
        return Ok(Vec::new());
    }
    let store = cache.mapping_store()?;
    let Some(cutoff) = now.checked_sub(config.local_only_max_age()) else {
        return Ok(Vec::new());
    };

    let stale: Vec<String> = store
        .list_all()
        .iter()
        .filter(|entry| !scan.contains_session(&entry.session_id))
        .filter(|entry| entry.created < cutoff)
        .filter(|entry| !scan.has_malformed_index(&encode_project_path(&entry.project_path)))
        .filter(|entry| {
            entry.project_path.trim().is_empty()
                || !paths
                    .session_file(&entry.project_path, &entry.session_id)
                    .is_file()
        })
        .map(|entry| entry.session_id.clone())
        .collect();
    if stale.is_empty() {
        return Ok(stale);
    }

    update_mapping_store(&paths.mapping_store(), |store| {
        for session_id in &stale {
            store.remove(session_id);
        }
    })?;
    for session_id in &stale {
        info!(session_id = %session_id, "evicted local-only session that never appeared");
    }
    Ok(stale)
}
