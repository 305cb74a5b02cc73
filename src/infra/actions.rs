use crate::domain::{
    BackgroundAssetRecord, BackgroundInfo, ImageKind, MappingPatch, ProfileBinding,
    SessionRecord, normalize_project_path, origin_matches, short_id, tracked_name,
    unique_profile_name,
};
use crate::infra::{
    AgentCommand, AmbiguousSessionIdError, EditTerminalSettingsError, LaunchError,
    LaunchRequest, LoadTerminalSettingsError, RenderBackgroundError, SessionRegistry,
    TerminalSettings, UpdateBackgroundTrackingError, UpdateMappingStoreError,
    WriteTerminalSettingsError, current_git_branch, current_origin, load_background_tracking,
    load_mapping_store, load_terminal_settings, read_session_model, update_background_tracking,
    update_mapping_store, wait_for_session_file, write_terminal_settings,
};
use serde_json::Map;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of a mutation addressed at an existing session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MutationOutcome<T = ()> {
    Done(T),
    NotFound,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchedSession {
    pub session_id: String,
    pub profile_name: Option<String>,
    /// Set when the agent's session file showed up within the wait window.
    pub session_file: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Lookup(#[from] AmbiguousSessionIdError),

    #[error(transparent)]
    LoadSettings(#[from] LoadTerminalSettingsError),

    #[error(transparent)]
    EditSettings(#[from] EditTerminalSettingsError),

    #[error(transparent)]
    WriteSettings(#[from] WriteTerminalSettingsError),

    #[error(transparent)]
    Mapping(#[from] UpdateMappingStoreError),

    #[error(transparent)]
    Tracking(#[from] UpdateBackgroundTrackingError),

    #[error(transparent)]
    Render(#[from] RenderBackgroundError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl ActionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::WriteSettings(error) if error.is_fatal())
    }
}

impl SessionRegistry {
    pub fn new_session(
        &mut self,
        project_path: &str,
        name: Option<&str>,
    ) -> Result<LaunchedSession, ActionError> {
        let directory = normalize_project_path(project_path);
        let display = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_session_name(&directory));
        let session_id = Uuid::new_v4().to_string();
        let git_branch = current_git_branch(Path::new(&directory));

        let info = BackgroundInfo {
            session_name: display.clone(),
            directory: directory.clone(),
            kind: ImageKind::New,
            forked_from: None,
            git_branch: git_branch.clone(),
            model: None,
            origin: current_origin(),
        };
        let profile_name = self.provision_profile(None, &display, &info)?;

        self.record_mapping(
            &session_id,
            MappingPatch::default()
                .profile_name(profile_name.clone())
                .project_path(directory.clone())
                .git_branch(git_branch),
        )?;

        self.launch_and_wait(LaunchRequest {
            profile_name: Some(profile_name),
            directory,
            command: AgentCommand::New { session_id },
        })
    }

    pub fn fork_session(
        &mut self,
        parent_query: &str,
        name: &str,
    ) -> Result<MutationOutcome<LaunchedSession>, ActionError> {
        let Some(parent) = self.find_session(parent_query)? else {
            return Ok(MutationOutcome::NotFound);
        };

        let display = match name.trim() {
            "" => format!("{} fork", parent.title()),
            name => name.to_string(),
        };
        let session_id = Uuid::new_v4().to_string();
        let model = parent
            .model
            .clone()
            .or_else(|| read_session_model(&parent.data_file));
        let git_branch = parent
            .git_branch
            .clone()
            .or_else(|| current_git_branch(Path::new(&parent.project_path)));

        let info = BackgroundInfo {
            session_name: display.clone(),
            directory: parent.project_path.clone(),
            kind: ImageKind::Fork,
            forked_from: Some(parent.title().to_string()),
            git_branch: git_branch.clone(),
            model: model.clone(),
            origin: current_origin(),
        };
        let profile_name = self.provision_profile(None, &display, &info)?;

        self.record_mapping(
            &session_id,
            MappingPatch::default()
                .profile_name(profile_name.clone())
                .project_path(parent.project_path.clone())
                .forked_from(parent.id.clone())
                .model(model)
                .git_branch(git_branch),
        )?;

        let launched = self.launch_and_wait(LaunchRequest {
            profile_name: Some(profile_name),
            directory: parent.project_path.clone(),
            command: AgentCommand::Fork {
                parent_id: parent.id.clone(),
                session_id,
            },
        })?;
        Ok(MutationOutcome::Done(launched))
    }

    /// Resumes a session in its own profile. A background rendered on another
    /// machine is redrawn first so its origin line stays truthful.
    pub fn continue_session(
        &mut self,
        query: &str,
    ) -> Result<MutationOutcome<LaunchedSession>, ActionError> {
        let Some(session) = self.find_session(query)? else {
            return Ok(MutationOutcome::NotFound);
        };

        let settings = load_terminal_settings(&self.paths.terminal_settings)?;
        let profile = session
            .profile_name
            .clone()
            .filter(|name| settings.has_profile(name));

        if let Some(profile_name) = &profile {
            let origin = current_origin();
            let image = self.paths.background_image(profile_name);
            let tracking = load_background_tracking(&self.paths.background_tracking())
                .map_err(UpdateBackgroundTrackingError::from)?;
            let stale = tracking
                .find(&image.display().to_string())
                .and_then(|record| record.origin.as_deref())
                .is_some_and(|stored| !origin_matches(stored, &origin));
            if stale {
                info!(session_id = %session.id, "background origin changed, redrawing");
                let info = self.background_for(&session, ImageKind::Continue, origin);
                self.provision_profile(Some(profile_name), session.title(), &info)?;
            }
        }

        let launched = self.launch_and_wait(LaunchRequest {
            profile_name: profile,
            directory: session.project_path.clone(),
            command: AgentCommand::Resume {
                session_id: session.id.clone(),
            },
        })?;
        Ok(MutationOutcome::Done(launched))
    }

    pub fn rename_session(
        &mut self,
        query: &str,
        name: &str,
    ) -> Result<MutationOutcome<String>, ActionError> {
        let Some(session) = self.find_session(query)? else {
            return Ok(MutationOutcome::NotFound);
        };
        let name = name.trim();
        let display = if name.is_empty() { session.title() } else { name };

        let mut settings = load_terminal_settings(&self.paths.terminal_settings)?;
        let current = session
            .profile_name
            .clone()
            .filter(|profile| settings.has_profile(profile));
        let next = unique_profile_name(&self.config.profile_prefix, display, |candidate| {
            Some(candidate) != current.as_deref() && settings.has_profile(candidate)
        });

        if let Some(current) = &current {
            if current != &next {
                settings.rename_profile(current, &next);
                write_terminal_settings(
                    &self.paths.terminal_settings,
                    &self.paths.backups_dir(),
                    &settings,
                )?;
                // The binding follows the rename even if redrawing fails below.
                self.record_mapping(
                    &session.id,
                    MappingPatch::default()
                        .profile_name(next.clone())
                        .project_path(session.project_path.clone()),
                )?;
            }
        }

        let mut info = self.background_for(&session, ImageKind::Continue, current_origin());
        info.session_name = display.to_string();
        let profile_name = self.provision_profile(Some(&next), display, &info)?;

        self.record_mapping(
            &session.id,
            MappingPatch::default()
                .profile_name(profile_name.clone())
                .project_path(session.project_path.clone()),
        )?;
        info!(session_id = %session.id, profile = %profile_name, "renamed session");
        Ok(MutationOutcome::Done(profile_name))
    }

    /// Forgets a session locally: its profile goes, its background becomes an
    /// orphan for the validator, its mapping entry is removed. The agent's
    /// own session file is left alone.
    pub fn delete_session(&mut self, query: &str) -> Result<MutationOutcome, ActionError> {
        let Some(session) = self.find_session(query)? else {
            return Ok(MutationOutcome::NotFound);
        };

        if let Some(profile_name) = &session.profile_name {
            let mut settings = load_terminal_settings(&self.paths.terminal_settings)?;
            if settings.remove_profile(profile_name).is_some() {
                write_terminal_settings(
                    &self.paths.terminal_settings,
                    &self.paths.backups_dir(),
                    &settings,
                )?;
            }
        }

        update_mapping_store(&self.paths.mapping_store(), |store| {
            store.remove(&session.id);
        })?;
        self.cache.clear_all();
        info!(session_id = %session.id, "deleted session");
        Ok(MutationOutcome::Done(()))
    }

    /// Redraws the background and recreates the profile if the terminal lost
    /// it.
    pub fn regenerate_profile(
        &mut self,
        query: &str,
    ) -> Result<MutationOutcome<String>, ActionError> {
        let Some(session) = self.find_session(query)? else {
            return Ok(MutationOutcome::NotFound);
        };

        let info = self.background_for(&session, ImageKind::Custom, current_origin());
        let profile_name =
            self.provision_profile(session.profile_name.as_deref(), session.title(), &info)?;

        self.record_mapping(
            &session.id,
            MappingPatch::default()
                .profile_name(profile_name.clone())
                .project_path(session.project_path.clone()),
        )?;
        Ok(MutationOutcome::Done(profile_name))
    }

    pub fn set_notes(&mut self, query: &str, notes: &str) -> Result<MutationOutcome, ActionError> {
        self.patch_existing(query, MappingPatch::default().notes(notes.trim()))
    }

    pub fn set_archived(
        &mut self,
        query: &str,
        archived: bool,
    ) -> Result<MutationOutcome, ActionError> {
        self.patch_existing(query, MappingPatch::default().archived(archived))
    }

    fn patch_existing(
        &mut self,
        query: &str,
        patch: MappingPatch,
    ) -> Result<MutationOutcome, ActionError> {
        let Some(session) = self.find_session(query)? else {
            return Ok(MutationOutcome::NotFound);
        };
        self.record_mapping(&session.id, patch.project_path(session.project_path.clone()))?;
        Ok(MutationOutcome::Done(()))
    }

    fn record_mapping(&mut self, session_id: &str, patch: MappingPatch) -> Result<(), ActionError> {
        update_mapping_store(&self.paths.mapping_store(), |store| {
            store.upsert(session_id, &patch);
        })?;
        self.cache.clear_all();
        Ok(())
    }

    fn background_for(
        &self,
        session: &SessionRecord,
        kind: ImageKind,
        origin: String,
    ) -> BackgroundInfo {
        let forked_from = session.forked_from.as_deref().map(|parent_id| {
            self.tracked_title(parent_id)
                .unwrap_or_else(|| short_id(parent_id).to_string())
        });
        BackgroundInfo {
            session_name: session.title().to_string(),
            directory: session.project_path.clone(),
            kind,
            forked_from,
            git_branch: session.git_branch.clone(),
            model: session
                .model
                .clone()
                .or_else(|| read_session_model(&session.data_file)),
            origin,
        }
    }

    /// The tracked background of the session's profile, if one was drawn.
    pub fn background_of(&self, session: &SessionRecord) -> Option<BackgroundAssetRecord> {
        let profile_name = session.profile_name.as_deref()?;
        let image = self.paths.background_image(profile_name).display().to_string();
        match load_background_tracking(&self.paths.background_tracking()) {
            Ok(tracking) => tracking.find(&image).cloned(),
            Err(error) => {
                warn!(%error, "background tracking unavailable");
                None
            }
        }
    }

    /// Fork parents are shown by their tracked name when one is known.
    fn tracked_title(&self, session_id: &str) -> Option<String> {
        let store = load_mapping_store(&self.paths.mapping_store()).ok()?;
        let entry = store.get(session_id)?;
        tracked_name(entry, &self.config.profile_prefix)
    }

    /// Renders `info` for the profile (an existing name, or a fresh unique one
    /// derived from `display`), points the profile at the image, creating it
    /// when missing, and tracks the asset. Returns the profile name.
    fn provision_profile(
        &mut self,
        existing: Option<&str>,
        display: &str,
        info: &BackgroundInfo,
    ) -> Result<String, ActionError> {
        let mut settings = load_terminal_settings(&self.paths.terminal_settings)?;
        let profile_name = match existing {
            Some(name) => name.to_string(),
            None => unique_profile_name(&self.config.profile_prefix, display, |candidate| {
                settings.has_profile(candidate)
            }),
        };

        let image = self.paths.background_image(&profile_name);
        self.renderer.render(info, &image)?;
        let image_path = image.display().to_string();

        if !settings.set_background_image(&profile_name, &image_path, self.config.background_opacity)
        {
            settings.append_profile(&new_profile(
                &profile_name,
                &info.directory,
                &image_path,
                self.config.background_opacity,
            ))?;
        }
        write_terminal_settings(&self.paths.terminal_settings, &self.paths.backups_dir(), &settings)?;

        self.track_background(&settings, info, &image_path)?;
        self.cache.clear_all();
        Ok(profile_name)
    }

    fn track_background(
        &self,
        settings: &TerminalSettings,
        info: &BackgroundInfo,
        image_path: &str,
    ) -> Result<(), ActionError> {
        let now = OffsetDateTime::now_utc();
        let record = BackgroundAssetRecord {
            session_name: info.session_name.clone(),
            image_path: image_path.to_string(),
            rendered_text_content: info.rendered_text(),
            image_kind: info.kind,
            origin: Some(info.origin.clone()),
            created: now,
            updated: now,
            extra: Map::new(),
        };
        let orphans = update_background_tracking(&self.paths.background_tracking(), |tracking| {
            tracking.upsert(record);
            tracking.orphans(&settings.profiles()).len()
        })?;
        if orphans > 0 {
            info!(orphans, "background assets awaiting reclamation");
        }
        Ok(())
    }

    fn launch_and_wait(&mut self, request: LaunchRequest) -> Result<LaunchedSession, ActionError> {
        self.launcher.launch(&request)?;
        let session_id = request.command.session_id().to_string();
        let expected = self.paths.session_file(&request.directory, &session_id);
        let session_file = wait_for_session_file(&expected, self.config.launch_wait());
        if session_file.is_none() && !self.config.launch_wait().is_zero() {
            warn!(session_id = %session_id, "session file did not appear in time");
        }
        self.cache.clear_all();
        Ok(LaunchedSession {
            session_id,
            profile_name: request.profile_name,
            session_file,
        })
    }
}

fn default_session_name(directory: &str) -> String {
    directory
        .rsplit(['\\', '/'])
        .find(|segment| !segment.is_empty() && !segment.ends_with(':'))
        .unwrap_or("session")
        .to_string()
}

fn new_profile(name: &str, directory: &str, image_path: &str, opacity: f64) -> ProfileBinding {
    ProfileBinding {
        name: name.to_string(),
        guid: Some(format!("{{{}}}", Uuid::new_v4())),
        starting_directory: Some(directory.to_string()),
        background_image_path: Some(image_path.to_string()),
        background_opacity: Some(opacity),
        extra: Map::new(),
    }
}
