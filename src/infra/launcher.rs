use std::ffi::OsString;
use std::io;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::info;

const AGENT_PROGRAM: &str = "claude";
const WINDOWS_TERMINAL_PROGRAM: &str = "wt.exe";

/// What the agent is asked to do when its tab opens.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AgentCommand {
    New { session_id: String },
    Fork { parent_id: String, session_id: String },
    Resume { session_id: String },
}

impl AgentCommand {
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::New { session_id } => vec!["--session-id".to_string(), session_id.clone()],
            Self::Fork {
                parent_id,
                session_id,
            } => vec![
                "--resume".to_string(),
                parent_id.clone(),
                "--fork-session".to_string(),
                "--session-id".to_string(),
                session_id.clone(),
            ],
            Self::Resume { session_id } => vec!["--resume".to_string(), session_id.clone()],
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::New { session_id } | Self::Fork { session_id, .. } | Self::Resume { session_id } => {
                session_id
            }
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchRequest {
    pub profile_name: Option<String>,
    pub directory: String,
    pub command: AgentCommand,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to start {program}: {source}")]
    Spawn { program: String, source: io::Error },
}

/// Opens an agent session somewhere the user can interact with it.
pub trait SessionLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<(), LaunchError>;
}

/// Opens a Windows Terminal tab in the session's profile running the agent.
#[derive(Clone, Debug)]
pub struct WindowsTerminalLauncher {
    pub terminal_program: String,
    pub agent_program: String,
}

impl Default for WindowsTerminalLauncher {
    fn default() -> Self {
        Self {
            terminal_program: WINDOWS_TERMINAL_PROGRAM.to_string(),
            agent_program: AGENT_PROGRAM.to_string(),
        }
    }
}

impl WindowsTerminalLauncher {
    pub fn command_args(&self, request: &LaunchRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(profile) = &request.profile_name {
            args.push("-p".into());
            args.push(profile.into());
        }
        args.push("-d".into());
        args.push(request.directory.clone().into());
        args.push(self.agent_program.clone().into());
        args.extend(request.command.args().into_iter().map(OsString::from));
        args
    }

    fn build_command(&self, request: &LaunchRequest) -> Command {
        let mut command = Command::new(&self.terminal_program);
        command
            .args(self.command_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }
}

impl SessionLauncher for WindowsTerminalLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<(), LaunchError> {
        let mut command = self.build_command(request);
        command.spawn().map_err(|source| LaunchError::Spawn {
            program: self.terminal_program.clone(),
            source,
        })?;
        info!(
            session_id = request.command.session_id(),
            profile = request.profile_name.as_deref().unwrap_or("(default)"),
            "launched agent"
        );
        Ok(())
    }
}
