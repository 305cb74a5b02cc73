use crate::domain::encode_project_path;
use crate::infra::Config;
use dirs::home_dir;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SESSION_FILE_EXTENSION: &str = "jsonl";
pub const SESSIONS_INDEX_FILE: &str = "sessions-index.json";

const WINDOWS_TERMINAL_PACKAGE: &str = "Microsoft.WindowsTerminal_8wekyb3d8bbwe";

#[derive(Debug, Error)]
pub enum ResolvePathsError {
    #[error("home directory not found")]
    HomeDirNotFound,

    #[error("config directory not found")]
    ConfigDirNotFound,
}

#[derive(Debug, Error)]
#[error("state directory {path} is not usable: {source}")]
pub struct PrepareStateDirError {
    pub path: String,
    pub source: io::Error,
}

/// Every on-disk location the registry reads or writes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegistryPaths {
    pub state_dir: PathBuf,
    pub projects_dir: PathBuf,
    pub terminal_settings: PathBuf,
}

impl RegistryPaths {
    pub fn resolve(state_dir: PathBuf, config: &Config) -> Result<Self, ResolvePathsError> {
        Ok(Self {
            projects_dir: resolve_claude_projects_dir(config)?,
            terminal_settings: resolve_terminal_settings_path(config)?,
            state_dir,
        })
    }

    pub fn mapping_store(&self) -> PathBuf {
        self.state_dir.join("session-mapping.json")
    }

    pub fn background_tracking(&self) -> PathBuf {
        self.state_dir.join("background-tracking.json")
    }

    pub fn backgrounds_dir(&self) -> PathBuf {
        self.state_dir.join("backgrounds")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir.join("backups")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn background_image(&self, profile_name: &str) -> PathBuf {
        self.backgrounds_dir()
            .join(profile_name)
            .join("background.png")
    }

    pub fn project_dir(&self, project_path: &str) -> PathBuf {
        self.projects_dir.join(encode_project_path(project_path))
    }

    pub fn session_file(&self, project_path: &str, session_id: &str) -> PathBuf {
        self.project_dir(project_path)
            .join(format!("{session_id}.{SESSION_FILE_EXTENSION}"))
    }
}

pub fn resolve_state_dir() -> Result<PathBuf, ResolvePathsError> {
    if let Some(override_dir) = std::env::var_os("CCMENU_STATE_DIR") {
        return Ok(PathBuf::from(override_dir));
    }
    let Some(config_dir) = dirs::config_dir() else {
        return Err(ResolvePathsError::ConfigDirNotFound);
    };
    Ok(config_dir.join("claude-menu"))
}

/// Creates the state directory tree. Failure here is fatal: without it the
/// mapping store can neither be read nor written.
pub fn prepare_state_dir(state_dir: &Path) -> Result<(), PrepareStateDirError> {
    let dirs = [
        state_dir.to_path_buf(),
        state_dir.join("backgrounds"),
        state_dir.join("backups"),
        state_dir.join("logs"),
    ];
    for dir in dirs {
        fs::create_dir_all(&dir).map_err(|source| PrepareStateDirError {
            path: dir.display().to_string(),
            source,
        })?;
    }

    let marker = state_dir.join(".write-check");
    fs::write(&marker, b"")
        .and_then(|()| fs::remove_file(&marker))
        .map_err(|source| PrepareStateDirError {
            path: state_dir.display().to_string(),
            source,
        })
}

pub fn resolve_claude_projects_dir(config: &Config) -> Result<PathBuf, ResolvePathsError> {
    if let Some(override_dir) = std::env::var_os("CLAUDE_PROJECTS_DIR") {
        return Ok(PathBuf::from(override_dir));
    }
    if let Some(dir) = &config.claude_projects_dir {
        return Ok(dir.clone());
    }

    let Some(home) = home_dir() else {
        return Err(ResolvePathsError::HomeDirNotFound);
    };
    Ok(home.join(".claude").join("projects"))
}

pub fn resolve_terminal_settings_path(config: &Config) -> Result<PathBuf, ResolvePathsError> {
    if let Some(override_path) = std::env::var_os("CCMENU_TERMINAL_SETTINGS") {
        return Ok(PathBuf::from(override_path));
    }
    if let Some(path) = &config.terminal_settings_path {
        return Ok(path.clone());
    }

    let base = match dirs::data_local_dir() {
        Some(dir) => dir,
        None => home_dir()
            .ok_or(ResolvePathsError::HomeDirNotFound)?
            .join("AppData")
            .join("Local"),
    };
    Ok(base
        .join("Packages")
        .join(WINDOWS_TERMINAL_PACKAGE)
        .join("LocalState")
        .join("settings.json"))
}

#[cfg(test)]
pub(crate) fn test_paths(root: &Path) -> RegistryPaths {
    RegistryPaths {
        state_dir: root.join("state"),
        projects_dir: root.join("projects"),
        terminal_settings: root.join("terminal").join("settings.json"),
    }
}
