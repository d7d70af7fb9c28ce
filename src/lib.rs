//! Interactive model of a git repository's working state.
//!
//! Diffs are parsed into an addressable model ([`diff`]), laid out side by
//! side ([`linemap`]) and turned back into minimal patches for any selection
//! of changed lines ([`patch`]). The [`status`] tree tracks entries across
//! refreshes and the [`watcher`] flags it stale when the repository changes
//! underneath. [`view`] ties these together for a front end; [`Stagehand`]
//! is the non-interactive entry point the command line uses.

use error_set::error_set;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub mod config;
pub mod diff;
pub mod git;
pub mod linemap;
pub mod patch;
pub mod selection;
pub mod status;
pub mod view;
pub mod watcher;

pub use config::{Config, ConfigError};
pub use diff::{DiffContext, DiffRequest, DiffSource, DiffSpec, ParseError, format_diff};
pub use git::{GitExecutor, ProcessError, ProcessExecutor, RepoRegistry, RepoState};
pub use patch::{Operation, PatchError, SelectionError};
pub use selection::{FileSelection, SelectorError};
pub use status::{PorcelainError, StatusError};
pub use view::{DiffView, StatusView, ViewError};
pub use watcher::WatcherError;

use patch::{LinePicks, PatchBuilder};

error_set! {
    /// Top-level error for stagehand operations
    StagehandError := {
        #[display("No changes found in {file}")]
        NoChanges { file: String },
        SelectorError(SelectorError),
        SelectionError(SelectionError),
        PatchError(PatchError),
        ProcessError(ProcessError),
        StatusError(StatusError),
        ViewError(ViewError),
        ConfigError(ConfigError),
        WatcherError(WatcherError),
    }
}

/// Non-interactive staging by `FILE[:REFS]` selection
pub struct Stagehand<E = ProcessExecutor> {
    repo: Arc<RepoState<E>>,
    config: Config,
}

impl Stagehand<ProcessExecutor> {
    /// Open the repository containing `path`, running the configured git.
    ///
    /// Handles opened through the same registry share one [`RepoState`]
    /// per repository root, so their writes suppress each other's watchers.
    pub async fn open(
        registry: &mut RepoRegistry<ProcessExecutor>,
        path: &Path,
        config: Config,
    ) -> Result<Self, StagehandError> {
        let executor = ProcessExecutor::new(&config.git.program);
        let repo = registry.open(executor, path).await?;
        Ok(Self::with_repo(repo, config))
    }
}

impl<E: GitExecutor> Stagehand<E> {
    pub fn with_repo(repo: Arc<RepoState<E>>, config: Config) -> Self {
        Self { repo, config }
    }

    pub fn repo(&self) -> &Arc<RepoState<E>> {
        &self.repo
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Unstaged (or staged) changes formatted with explicit line numbers
    ///
    /// # Examples
    /// ```no_run
    /// # use git_stagehand::{Config, RepoRegistry, Stagehand};
    /// # async fn run() -> Result<(), git_stagehand::StagehandError> {
    /// let mut registry = RepoRegistry::default();
    /// let stagehand = Stagehand::open(&mut registry, ".".as_ref(), Config::default()).await?;
    /// let all = stagehand.diff(&[], false).await?;
    /// let one = stagehand.diff(&["flake.nix".to_string()], true).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn diff(&self, paths: &[String], cached: bool) -> Result<String, StagehandError> {
        let source = if cached {
            DiffSource::Staged
        } else {
            DiffSource::Unstaged
        };
        let spec = self.request(source, paths).fetch(&self.repo).await?;
        Ok(format_diff(&spec))
    }

    /// Stage the selected lines
    ///
    /// # Examples
    /// ```no_run
    /// # use git_stagehand::{Config, Operation, RepoRegistry, Stagehand};
    /// # async fn run() -> Result<(), git_stagehand::StagehandError> {
    /// let mut registry = RepoRegistry::default();
    /// let stagehand = Stagehand::open(&mut registry, ".".as_ref(), Config::default()).await?;
    /// stagehand.apply(Operation::Stage, &["flake.nix:137".parse()?]).await?;
    /// stagehand.apply(Operation::Stage, &["config.nix:-10,-11,12".parse()?]).await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// All selections are resolved against one diff, so line numbers refer
    /// to the same state even when several name the same file.
    pub async fn apply(
        &self,
        operation: Operation,
        selections: &[FileSelection],
    ) -> Result<usize, StagehandError> {
        let source = match operation {
            Operation::Stage | Operation::Discard => DiffSource::Unstaged,
            Operation::Unstage => DiffSource::Staged,
        };
        let paths: Vec<String> = selections.iter().map(|s| s.file.clone()).collect();
        let spec = self.request(source, &paths).fetch(&self.repo).await?;

        let mut merged: BTreeMap<usize, LinePicks> = BTreeMap::new();
        for selection in selections {
            if spec.position(&selection.file).is_none() {
                return Err(StagehandError::NoChanges {
                    file: selection.file.clone(),
                });
            }
            let picks = selection.resolve(&spec)?;
            let target = merged
                .entry(picks.file_index)
                .or_insert_with(|| LinePicks::new(picks.file_index));
            target.whole_file |= picks.whole_file;
            for (hunk, lines) in picks.hunks {
                target.hunks.entry(hunk).or_default().extend(lines);
            }
        }

        let builder = PatchBuilder::new(&spec);
        let mut changed = 0;
        for picks in merged.values() {
            let patch = builder.build(picks, operation.direction())?;
            patch.apply(&self.repo, operation).await?;
            tracing::info!(path = %patch.path, lines = patch.changed, ?operation, "applied selection");
            changed += patch.changed;
        }
        Ok(changed)
    }

    fn request(&self, source: DiffSource, paths: &[String]) -> DiffRequest {
        DiffRequest::new(source)
            .with_context(self.config.diff.context.0)
            .with_paths(paths.iter().cloned())
    }
}
