use crate::domain::DEFAULT_PROFILE_PREFIX;
use crate::infra::{read_json_file, write_json_atomic};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub profile_prefix: String,
    pub claude_projects_dir: Option<PathBuf>,
    pub terminal_settings_path: Option<PathBuf>,
    pub background_opacity: f64,
    pub local_only_max_age_hours: u64,
    pub launch_wait_secs: u64,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile_prefix: DEFAULT_PROFILE_PREFIX.to_string(),
            claude_projects_dir: None,
            terminal_settings_path: None,
            background_opacity: 0.3,
            local_only_max_age_hours: 72,
            launch_wait_secs: 20,
            debug: false,
        }
    }
}

impl Config {
    pub fn launch_wait(&self) -> Duration {
        Duration::from_secs(self.launch_wait_secs)
    }

    pub fn local_only_max_age(&self) -> time::Duration {
        let seconds = self.local_only_max_age_hours.saturating_mul(3600);
        time::Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ConfigFile {
    version: u32,
    #[serde(default)]
    config: Config,
}

pub fn config_path(state_dir: &Path) -> PathBuf {
    state_dir.join("config.json")
}

/// Loads `config.json`, creating it with defaults when absent. A corrupt file
/// falls back to defaults and is left in place for the user to inspect.
pub fn load_config(state_dir: &Path) -> Config {
    let path = config_path(state_dir);
    match read_json_file::<ConfigFile>(&path) {
        Ok(Some(file)) => file.config,
        Ok(None) => {
            let config = Config::default();
            if let Err(error) = save_config(state_dir, &config) {
                warn!(%error, "could not write default config");
            }
            config
        }
        Err(error) => {
            warn!(%error, "could not load config, using defaults");
            Config::default()
        }
    }
}

pub fn save_config(state_dir: &Path, config: &Config) -> Result<(), crate::infra::WriteDocumentError> {
    let file = ConfigFile {
        version: CONFIG_VERSION,
        config: config.clone(),
    };
    write_json_atomic(&config_path(state_dir), &file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn creates_default_config_when_missing() {
        let dir = tempdir().expect("tempdir");
        let config = load_config(dir.path());
        assert_eq!(config, Config::default());
        assert!(config_path(dir.path()).is_file());
    }

    #[test]
    fn unknown_keys_are_ignored_and_missing_keys_defaulted() {
        let dir = tempdir().expect("tempdir");
        fs::write(
            config_path(dir.path()),
            r#"{"version":1,"config":{"profile_prefix":"Agent-","terminal":"kitty"}}"#,
        )
        .expect("write");

        let config = load_config(dir.path());
        assert_eq!(config.profile_prefix, "Agent-");
        assert_eq!(config.local_only_max_age_hours, 72);
    }

    #[test]
    fn corrupt_config_falls_back_to_defaults() {
        let dir = tempdir().expect("tempdir");
        fs::write(config_path(dir.path()), "{").expect("write");
        assert_eq!(load_config(dir.path()), Config::default());
    }
}
