use crate::domain::{SessionRecord, decode_project_path, encode_project_path};
use crate::infra::{
    ActionError, AmbiguousSessionIdError, DiscoveryOptions, DiscoveryOutput, LaunchedSession,
    MutationOutcome, SessionRegistry, ValidationReport, ValidationScope,
    WriteTerminalSettingsError, file_size,
};
use humansize::{DECIMAL, format_size};
use std::io::{self, Write};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use tracing::info;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const TITLE_COLUMN_WIDTH: usize = 48;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliInvocation {
    PrintHelp,
    PrintVersion,
    Command(CliCommand),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ArchiveFilter {
    #[default]
    Active,
    ArchivedOnly,
    All,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliCommand {
    Sessions { filter: ArchiveFilter },
    Show { id: String },
    New { directory: String, name: Option<String> },
    Fork { id: String, name: String },
    Continue { id: String },
    Rename { id: String, name: String },
    Delete { id: String },
    Regenerate { id: String },
    Notes { id: String, text: String },
    Archive { id: String },
    Unarchive { id: String },
    Validate,
    EncodePath { path: String },
    DecodePath { segment: String },
}

impl CliCommand {
    /// Path conversions are pure; everything else reads the state dir.
    pub fn needs_registry(&self) -> bool {
        !matches!(self, Self::EncodePath { .. } | Self::DecodePath { .. })
    }

    fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::New { .. }
                | Self::Fork { .. }
                | Self::Continue { .. }
                | Self::Rename { .. }
                | Self::Delete { .. }
                | Self::Regenerate { .. }
                | Self::Notes { .. }
                | Self::Archive { .. }
                | Self::Unarchive { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum CliParseError {
    #[error("unknown subcommand: {0}")]
    UnknownSubcommand(String),

    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("missing argument for {command}: {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}

pub fn parse_invocation(args: &[String]) -> Result<CliInvocation, CliParseError> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        return Ok(CliInvocation::PrintHelp);
    }
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        return Ok(CliInvocation::PrintVersion);
    }

    let mut iter = args.iter().skip(1);
    let Some(subcommand) = iter.next() else {
        return Ok(CliInvocation::Command(CliCommand::Sessions {
            filter: ArchiveFilter::Active,
        }));
    };

    let command = match subcommand.as_str() {
        "sessions" | "ls" => {
            let mut filter = ArchiveFilter::Active;
            for arg in iter.by_ref() {
                match arg.as_str() {
                    "--archived" => filter = ArchiveFilter::ArchivedOnly,
                    "--all" | "-a" => filter = ArchiveFilter::All,
                    _ if arg.starts_with('-') => {
                        return Err(CliParseError::UnknownFlag(arg.to_string()));
                    }
                    _ => return Err(CliParseError::UnexpectedArgument(arg.to_string())),
                }
            }
            CliCommand::Sessions { filter }
        }
        "show" => CliCommand::Show {
            id: required(&mut iter, "show", "session-id")?,
        },
        "new" => {
            let directory = required(&mut iter, "new", "directory")?;
            let name = rest_joined(&mut iter);
            CliCommand::New { directory, name }
        }
        "fork" => {
            let id = required(&mut iter, "fork", "session-id")?;
            let name = rest_joined(&mut iter).ok_or(CliParseError::MissingArgument {
                command: "fork",
                argument: "name",
            })?;
            CliCommand::Fork { id, name }
        }
        "continue" | "resume" => CliCommand::Continue {
            id: required(&mut iter, "continue", "session-id")?,
        },
        "rename" => {
            let id = required(&mut iter, "rename", "session-id")?;
            let name = rest_joined(&mut iter).ok_or(CliParseError::MissingArgument {
                command: "rename",
                argument: "name",
            })?;
            CliCommand::Rename { id, name }
        }
        "delete" | "rm" => CliCommand::Delete {
            id: required(&mut iter, "delete", "session-id")?,
        },
        "regenerate" => CliCommand::Regenerate {
            id: required(&mut iter, "regenerate", "session-id")?,
        },
        "notes" => {
            let id = required(&mut iter, "notes", "session-id")?;
            let text = rest_joined(&mut iter).unwrap_or_default();
            CliCommand::Notes { id, text }
        }
        "archive" => CliCommand::Archive {
            id: required(&mut iter, "archive", "session-id")?,
        },
        "unarchive" => CliCommand::Unarchive {
            id: required(&mut iter, "unarchive", "session-id")?,
        },
        "validate" => CliCommand::Validate,
        "encode-path" => CliCommand::EncodePath {
            path: required(&mut iter, "encode-path", "path")?,
        },
        "decode-path" => CliCommand::DecodePath {
            segment: required(&mut iter, "decode-path", "segment")?,
        },
        other => return Err(CliParseError::UnknownSubcommand(other.to_string())),
    };

    if let Some(extra) = iter.next() {
        return Err(CliParseError::UnexpectedArgument(extra.to_string()));
    }
    Ok(CliInvocation::Command(command))
}

fn required<'a>(
    iter: &mut impl Iterator<Item = &'a String>,
    command: &'static str,
    argument: &'static str,
) -> Result<String, CliParseError> {
    match iter.next() {
        Some(value) if value.starts_with("--") => Err(CliParseError::UnknownFlag(value.to_string())),
        Some(value) => Ok(value.to_string()),
        None => Err(CliParseError::MissingArgument { command, argument }),
    }
}

/// Remaining words as one value, so names need no quoting.
fn rest_joined<'a>(iter: &mut impl Iterator<Item = &'a String>) -> Option<String> {
    let words: Vec<&str> = iter.by_ref().map(|arg| arg.as_str()).collect();
    let joined = words.join(" ");
    if joined.trim().is_empty() {
        None
    } else {
        Some(joined)
    }
}

#[derive(Debug, Error)]
pub enum CliRunError {
    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Validate(#[from] WriteTerminalSettingsError),

    #[error(transparent)]
    Lookup(#[from] AmbiguousSessionIdError),

    #[error("session not found: {0}\nHint: run `ccmenu sessions --all` and copy the id column.")]
    SessionNotFound(String),

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl CliRunError {
    /// Terminal settings may be corrupt; the user must be told before exit.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Action(error) => error.is_fatal(),
            Self::Validate(error) => error.is_fatal(),
            _ => false,
        }
    }
}

pub fn run(command: CliCommand, registry: &mut SessionRegistry) -> Result<(), CliRunError> {
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    let stderr = io::stderr();
    let mut err = io::BufWriter::new(stderr.lock());
    let result = execute(command, registry, &mut out, &mut err);
    out.flush()?;
    err.flush()?;
    result
}

pub fn run_offline(command: CliCommand) -> Result<(), CliRunError> {
    let stdout = io::stdout();
    let mut out = io::BufWriter::new(stdout.lock());
    write_path_conversion(&command, &mut out)?;
    out.flush()?;
    Ok(())
}

fn write_path_conversion(command: &CliCommand, out: &mut impl Write) -> io::Result<bool> {
    match command {
        CliCommand::EncodePath { path } => write_line(out, &encode_project_path(path)),
        CliCommand::DecodePath { segment } => write_line(out, &decode_project_path(segment)),
        _ => Ok(true),
    }
}

/// One render cycle: startup checks, the command, and for mutations a
/// refresh pass followed by a fresh discovery.
pub fn execute(
    command: CliCommand,
    registry: &mut SessionRegistry,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<(), CliRunError> {
    registry.begin_cycle();

    if !command.needs_registry() {
        write_path_conversion(&command, out)?;
        return Ok(());
    }

    let startup = registry.validate(ValidationScope::Startup)?;
    if command == CliCommand::Validate {
        write_report(out, &startup)?;
        return Ok(());
    }
    write_failures(err, &startup)?;

    let is_mutation = command.is_mutation();
    let touched = match command {
        CliCommand::Sessions { filter } => {
            let output = registry.discover(DiscoveryOptions {
                include_archived: filter != ArchiveFilter::Active,
            });
            write_sessions(out, err, output, filter)?;
            None
        }
        CliCommand::Show { id } => {
            let session = lookup(registry, &id)?;
            let background = registry.background_of(&session).map(|record| {
                format!("{} {}", record.image_kind.label(), record.image_path)
            });
            write_details(out, &session, background)?;
            None
        }
        CliCommand::New { directory, name } => {
            let launched = registry.new_session(&directory, name.as_deref())?;
            write_launched(out, &launched)?;
            Some(launched.session_id)
        }
        CliCommand::Fork { id, name } => {
            let launched = found(registry.fork_session(&id, &name)?, &id)?;
            write_launched(out, &launched)?;
            Some(launched.session_id)
        }
        CliCommand::Continue { id } => {
            let launched = found(registry.continue_session(&id)?, &id)?;
            write_launched(out, &launched)?;
            Some(launched.session_id)
        }
        CliCommand::Rename { id, name } => {
            let profile = found(registry.rename_session(&id, &name)?, &id)?;
            write_line(out, &format!("renamed\t{id}\t{profile}"))?;
            Some(id)
        }
        CliCommand::Delete { id } => {
            found(registry.delete_session(&id)?, &id)?;
            write_line(out, &format!("deleted\t{id}"))?;
            None
        }
        CliCommand::Regenerate { id } => {
            let profile = found(registry.regenerate_profile(&id)?, &id)?;
            write_line(out, &format!("regenerated\t{id}\t{profile}"))?;
            Some(id)
        }
        CliCommand::Notes { id, text } => {
            found(registry.set_notes(&id, &text)?, &id)?;
            Some(id)
        }
        CliCommand::Archive { id } => {
            found(registry.set_archived(&id, true)?, &id)?;
            Some(id)
        }
        CliCommand::Unarchive { id } => {
            found(registry.set_archived(&id, false)?, &id)?;
            Some(id)
        }
        CliCommand::Validate | CliCommand::EncodePath { .. } | CliCommand::DecodePath { .. } => {
            None
        }
    };

    if is_mutation {
        registry.begin_cycle();
        let refresh = registry.validate(ValidationScope::Refresh)?;
        write_failures(err, &refresh)?;
        if refresh.repairs() > 0 {
            info!(repairs = refresh.repairs(), "refresh repaired drift");
        }
        if let Some(query) = touched {
            if let Ok(Some(session)) = registry.find_session(&query) {
                write_line(out, &session_row(&session))?;
            }
        }
    }
    Ok(())
}

fn lookup(registry: &mut SessionRegistry, query: &str) -> Result<SessionRecord, CliRunError> {
    registry
        .find_session(query)?
        .ok_or_else(|| CliRunError::SessionNotFound(query.to_string()))
}

fn found<T>(outcome: MutationOutcome<T>, query: &str) -> Result<T, CliRunError> {
    match outcome {
        MutationOutcome::Done(value) => Ok(value),
        MutationOutcome::NotFound => Err(CliRunError::SessionNotFound(query.to_string())),
    }
}

fn write_sessions(
    out: &mut impl Write,
    err: &mut impl Write,
    output: DiscoveryOutput,
    filter: ArchiveFilter,
) -> io::Result<()> {
    let sessions = output
        .sessions
        .iter()
        .filter(|session| filter != ArchiveFilter::ArchivedOnly || session.archived);
    for session in sessions {
        if !write_line(out, &session_row(session))? {
            return Ok(());
        }
    }
    if let Some(notice) = output.notice {
        write_line(err, &notice)?;
    }
    if output.warnings.get() > 0 {
        write_line(err, &format!("warnings: {}", output.warnings.get()))?;
    }
    Ok(())
}

/// `modified<TAB>id<TAB>origin<TAB>profile<TAB>title<TAB>project_path`
fn session_row(session: &SessionRecord) -> String {
    let mut title = fit_width(session.title(), TITLE_COLUMN_WIDTH);
    if session.archived {
        title.push_str(" [archived]");
    }
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        format_timestamp(session.modified),
        session.id,
        session.origin.label(),
        session.profile_name.as_deref().unwrap_or("-"),
        title,
        session.project_path,
    )
}

fn write_details(
    out: &mut impl Write,
    session: &SessionRecord,
    background: Option<String>,
) -> io::Result<()> {
    let size = file_size(&session.data_file)
        .map(|bytes| format_size(bytes, DECIMAL))
        .unwrap_or_else(|| "-".to_string());
    let rows = [
        ("id", session.id.clone()),
        ("title", session.title().to_string()),
        ("origin", session.origin.label().to_string()),
        ("project", session.project_path.clone()),
        ("created", format_timestamp(session.created)),
        ("modified", format_timestamp(session.modified)),
        ("messages", session.message_count.to_string()),
        ("forked_from", optional(session.forked_from.as_deref())),
        ("profile", optional(session.profile_name.as_deref())),
        ("background", background.unwrap_or_else(|| "-".to_string())),
        ("model", optional(session.model.as_deref())),
        ("branch", optional(session.git_branch.as_deref())),
        ("notes", session.notes.clone()),
        ("archived", session.archived.to_string()),
        ("data_file", session.data_file.display().to_string()),
        ("size", size),
    ];
    for (key, value) in rows {
        if !write_line(out, &format!("{key}\t{value}"))? {
            break;
        }
    }
    Ok(())
}

fn write_launched(out: &mut impl Write, launched: &LaunchedSession) -> io::Result<bool> {
    let file = launched
        .session_file
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "(pending)".to_string());
    write_line(
        out,
        &format!(
            "launched\t{}\t{}\t{file}",
            launched.session_id,
            launched.profile_name.as_deref().unwrap_or("-"),
        ),
    )
}

fn write_report(out: &mut impl Write, report: &ValidationReport) -> io::Result<()> {
    let lines = [
        format!("cleared_profile_refs\t{}", report.cleared_profile_refs.len()),
        format!("fixed_background_paths\t{}", report.fixed_background_paths),
        format!("normalized_origins\t{}", report.normalized_origins),
        format!("reclaimed_assets\t{}", report.reclaimed_assets),
        format!("evicted_local_only\t{}", report.evicted_local_only.len()),
    ];
    for line in lines {
        write_line(out, &line)?;
    }
    for failure in &report.failures {
        write_line(out, &format!("failed\t{failure}"))?;
    }
    Ok(())
}

fn write_failures(err: &mut impl Write, report: &ValidationReport) -> io::Result<()> {
    for failure in &report.failures {
        write_line(err, &format!("warning: {failure}"))?;
    }
    Ok(())
}

fn optional(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

fn format_timestamp(value: time::OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| value.unix_timestamp().to_string())
}

/// Truncates to `max` terminal columns, marking the cut with `...`.
fn fit_width(text: &str, max: usize) -> String {
    if UnicodeWidthStr::width(text) <= max {
        return text.to_string();
    }
    let budget = max.saturating_sub(3);
    let mut used = 0usize;
    let mut fitted = String::new();
    for ch in text.chars() {
        let width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + width > budget {
            break;
        }
        used += width;
        fitted.push(ch);
    }
    fitted.push_str("...");
    fitted
}

fn write_line(out: &mut impl Write, line: &str) -> io::Result<bool> {
    match writeln!(out, "{line}") {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(error) => Err(error),
    }
}
