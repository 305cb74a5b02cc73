use crate::domain::SessionRecord;
use crate::infra::{
    BackgroundRenderer, Config, DiscoveryOptions, DiscoveryOutput, DocumentCache,
    PlainBackgroundRenderer, RegistryPaths, SessionLauncher, ValidationReport, ValidationScope,
    WindowsTerminalLauncher, WriteTerminalSettingsError, discover_sessions, run_validation,
};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error, Eq, PartialEq)]
#[error("session id {query} is ambiguous: {}", .candidates.join(", "))]
pub struct AmbiguousSessionIdError {
    pub query: String,
    pub candidates: Vec<String>,
}

/// Entry point for the session registry: one cache, the resolved paths and
/// the collaborators that open terminals and draw backgrounds.
pub struct SessionRegistry {
    pub(crate) paths: RegistryPaths,
    pub(crate) config: Config,
    pub(crate) cache: DocumentCache,
    pub(crate) launcher: Box<dyn SessionLauncher>,
    pub(crate) renderer: Box<dyn BackgroundRenderer>,
}

impl SessionRegistry {
    pub fn new(paths: RegistryPaths, config: Config) -> Self {
        Self::with_collaborators(
            paths,
            config,
            Box::new(WindowsTerminalLauncher::default()),
            Box::new(PlainBackgroundRenderer::default()),
        )
    }

    pub fn with_collaborators(
        paths: RegistryPaths,
        config: Config,
        launcher: Box<dyn SessionLauncher>,
        renderer: Box<dyn BackgroundRenderer>,
    ) -> Self {
        Self {
            cache: DocumentCache::new(paths.clone()),
            paths,
            config,
            launcher,
            renderer,
        }
    }

    /// Starts a render cycle. Must run before the cycle's first read.
    pub fn begin_cycle(&mut self) {
        self.cache.clear_all();
    }

    pub fn discover(&mut self, options: DiscoveryOptions) -> DiscoveryOutput {
        discover_sessions(&mut self.cache, &self.config.profile_prefix, options)
    }

    /// Runs the validator and starts a new cycle so later reads see its
    /// repairs.
    pub fn validate(
        &mut self,
        scope: ValidationScope,
    ) -> Result<ValidationReport, WriteTerminalSettingsError> {
        let report = run_validation(&mut self.cache, &self.config, scope, OffsetDateTime::now_utc());
        self.cache.clear_all();
        report
    }

    /// Looks a session up by full id or by a unique id prefix, archived
    /// sessions included.
    pub fn find_session(
        &mut self,
        query: &str,
    ) -> Result<Option<SessionRecord>, AmbiguousSessionIdError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(None);
        }
        let output = self.discover(DiscoveryOptions {
            include_archived: true,
        });
        if let Some(exact) = output.sessions.iter().find(|session| session.id == query) {
            return Ok(Some(exact.clone()));
        }

        let mut matches: Vec<SessionRecord> = output
            .sessions
            .into_iter()
            .filter(|session| session.id.starts_with(query))
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            _ => Err(AmbiguousSessionIdError {
                query: query.to_string(),
                candidates: matches.into_iter().map(|session| session.id).collect(),
            }),
        }
    }
}
