mod cli;
mod domain;
mod infra;

use crate::cli::CliInvocation;
use crate::infra::{
    PrepareStateDirError, RegistryPaths, ResolvePathsError, SessionRegistry, init_logging,
    load_config, prepare_state_dir, resolve_state_dir,
};
use std::io::{self, BufRead, IsTerminal, Write};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
enum MainError {
    #[error(transparent)]
    ResolvePaths(#[from] ResolvePathsError),

    #[error(transparent)]
    PrepareStateDir(#[from] PrepareStateDirError),

    #[error(transparent)]
    Cli(#[from] crate::cli::CliRunError),
}

impl MainError {
    fn is_fatal(&self) -> bool {
        matches!(self, Self::Cli(error) if error.is_fatal())
    }
}

fn main() {
    match run_main() {
        Ok(()) => {}
        Err(error) if error.is_fatal() => {
            report_fatal(&error);
            std::process::exit(3);
        }
        Err(error) => {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "{error}");
            std::process::exit(1);
        }
    }
}

fn run_main() -> Result<(), MainError> {
    let args = std::env::args().collect::<Vec<_>>();
    let invocation = match crate::cli::parse_invocation(&args) {
        Ok(invocation) => invocation,
        Err(error) => {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "{error}");
            let _ = writeln!(err);
            print_help();
            std::process::exit(2);
        }
    };

    match invocation {
        CliInvocation::PrintHelp => {
            print_help();
            Ok(())
        }
        CliInvocation::PrintVersion => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliInvocation::Command(command) if command.needs_registry() => {
            let mut registry = open_registry()?;
            crate::cli::run(command, &mut registry)?;
            Ok(())
        }
        CliInvocation::Command(command) => Ok(crate::cli::run_offline(command)?),
    }
}

fn open_registry() -> Result<SessionRegistry, MainError> {
    let state_dir = resolve_state_dir()?;
    prepare_state_dir(&state_dir)?;
    let config = load_config(&state_dir);
    let paths = RegistryPaths::resolve(state_dir, &config)?;

    if let Err(error) = init_logging(&paths.logs_dir(), config.debug) {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "warning: logging disabled: {error}");
    }
    info!(
        state_dir = %paths.state_dir.display(),
        projects_dir = %paths.projects_dir.display(),
        terminal_settings = %paths.terminal_settings.display(),
        "registry opened"
    );
    Ok(SessionRegistry::new(paths, config))
}

/// The terminal settings file may be damaged. Holds the process until the
/// user acknowledges when a terminal is attached.
fn report_fatal(error: &MainError) {
    warn!(error = %error, "fatal terminal settings failure");
    let mut err = io::stderr().lock();
    let _ = writeln!(err, "================ FATAL ================");
    let _ = writeln!(err, "{error}");
    let _ = writeln!(
        err,
        "Windows Terminal settings may be corrupt. Restore them from the backup above before opening a new terminal."
    );
    let _ = writeln!(err, "=======================================");

    let stdin = io::stdin();
    if stdin.is_terminal() {
        let _ = write!(err, "Press Enter to acknowledge...");
        let _ = err.flush();
        let mut line = String::new();
        let _ = stdin.lock().read_line(&mut line);
    }
}

fn print_help() {
    let mut out = io::stdout().lock();
    let _ = write!(out, "{}", help_text());
}

fn help_text() -> String {
    format!(
        "{name} - manage Claude Code sessions as Windows Terminal profiles\n\nUSAGE:\n  {name}                                 List active sessions\n  {name} sessions [--archived | --all]   List sessions (archived only, or everything)\n  {name} show <session-id>               Print one session's details\n  {name} new <directory> [name...]       Start a new session in its own profile\n  {name} fork <session-id> <name...>     Fork a session into a new profile\n  {name} continue <session-id>           Resume a session in its profile\n  {name} rename <session-id> <name...>   Rename a session and its profile\n  {name} delete <session-id>             Forget a session and remove its profile\n  {name} regenerate <session-id>         Redraw a session's profile background\n  {name} notes <session-id> [text...]    Set (or clear) a session's notes\n  {name} archive <session-id>            Hide a session from the default list\n  {name} unarchive <session-id>          Show an archived session again\n  {name} validate                        Run every consistency check and report repairs\n  {name} encode-path <path>              Print the project directory name for a path\n  {name} decode-path <segment>           Print the path a project directory name stands for\n  {name} --help | --version\n\nSession ids may be abbreviated to any unique prefix.\n\nOUTPUT:\n  sessions: modified<TAB>session_id<TAB>origin<TAB>profile<TAB>title<TAB>project_path\n  show:     key<TAB>value\n  new/fork/continue: launched<TAB>session_id<TAB>profile<TAB>session_file\n  validate: check<TAB>count (failed<TAB>reason per failed check)\n\nNOTES:\n  Windows Terminal settings.json is rewritten whole when a profile changes.\n  Comments in it are not kept; the copy taken before each write under\n  <state dir>/backups/ still has them.\n\nEXIT CODES:\n  0 ok, 1 error, 2 usage error, 3 terminal settings could not be restored\n\nENV:\n  CCMENU_STATE_DIR          Override the state dir (default: <config dir>/claude-menu)\n  CCMENU_LOG                Log filter for <state dir>/logs/debug.log (default: info)\n  CLAUDE_PROJECTS_DIR       Override Claude projects dir (default: ~/.claude/projects)\n  CCMENU_TERMINAL_SETTINGS  Override the Windows Terminal settings.json path\n",
        name = env!("CARGO_PKG_NAME")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_warns_that_settings_comments_are_dropped() {
        let text = help_text();
        assert!(text.contains("Comments in it are not kept"));
        assert!(text.contains("<state dir>/backups/"));
    }
}
