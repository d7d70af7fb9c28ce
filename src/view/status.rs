use super::ViewError;
use crate::config::Config;
use crate::diff::{DiffContext, DiffRequest, DiffSource, DiffSpec, FilePair};
use crate::git::{GitExecutor, RepoState, git_args};
use crate::patch::{LinePicks, Operation, PatchBuilder, SelectionError};
use crate::status::{
    EntryKey, RefreshEffect, RefreshEvent, RefreshMachine, RefreshState, RowKind, Section,
    StatusEntry, StatusSnapshot, StatusTree,
};
use crate::watcher::{ChangeWatcher, WatchOptions, WatchSignal};
use std::sync::Arc;

/// Asks the user before staging something that may finalize a conflict.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

impl<F: FnMut(&str) -> bool> Confirm for F {
    fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Result of one stage or unstage request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// A patch carrying `lines` changed lines was applied
    Patched { path: String, lines: usize },
    /// The whole path went through `git add` (or out through `git reset`)
    Whole { path: String },
    /// The user declined the confirmation
    Declined { path: String },
    /// One outcome per entry of a section
    Section(Vec<StageOutcome>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusViewOptions {
    /// Context lines for expanded hunks
    pub context: u32,
    pub recent_commits: usize,
    /// `None` runs without a watcher
    pub watch: Option<WatchOptions>,
}

impl Default for StatusViewOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for StatusViewOptions {
    fn from(config: &Config) -> Self {
        Self {
            context: config.status.context,
            recent_commits: config.status.recent_commits,
            watch: config.watcher.enabled.then(|| config.watcher.options()),
        }
    }
}

/// What a row asks to stage
enum Target {
    Whole(EntryKey),
    Lines(EntryKey, LinePicks),
    Section(Section),
}

/// The status tree of one repository, kept current by refreshes and the
/// change watcher.
pub struct StatusView<E> {
    repo: Arc<RepoState<E>>,
    options: StatusViewOptions,
    tree: StatusTree,
    machine: RefreshMachine,
    watcher: Option<ChangeWatcher>,
    stale: bool,
}

impl<E: GitExecutor> StatusView<E> {
    /// Read the status and start watching. A watcher that fails to start
    /// only costs live staleness detection.
    pub async fn open(
        repo: Arc<RepoState<E>>,
        options: StatusViewOptions,
    ) -> Result<Self, ViewError> {
        let watcher = options.watch.clone().and_then(|watch| {
            ChangeWatcher::start(repo.root(), repo.git_dir(), repo.clock().clone(), watch)
                .inspect_err(|error| {
                    tracing::warn!(%error, "change watcher unavailable; staleness is not tracked")
                })
                .ok()
        });

        let mut view = Self {
            repo,
            options,
            tree: StatusTree::default(),
            machine: RefreshMachine::new(),
            watcher,
            stale: false,
        };
        view.refresh().await?;
        Ok(view)
    }

    pub fn tree(&self) -> &StatusTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut StatusTree {
        &mut self.tree
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.machine.state()
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Re-read the status, re-fetch hunks of expanded entries and rebuild
    /// the tree. Changes seen while the read runs trigger one follow-up.
    pub async fn refresh(&mut self) -> Result<(), ViewError> {
        let mut effects = self.machine.handle(RefreshEvent::Requested);
        loop {
            self.apply_flags(&effects);
            let Some(generation) = effects.iter().find_map(|effect| match effect {
                RefreshEffect::StartRefresh { generation } => Some(*generation),
                _ => None,
            }) else {
                return Ok(());
            };

            let result = self.read_snapshot().await;
            self.drain_signals();

            match result {
                Ok(snapshot) => {
                    let done = self.machine.handle(RefreshEvent::Completed { generation });
                    if done.contains(&RefreshEffect::Render) {
                        self.tree.rebuild(snapshot);
                        tracing::info!(
                            generation,
                            entries = self.tree.snapshot().entries.len(),
                            "status refreshed"
                        );
                    }
                    self.apply_flags(&done);
                    if done.contains(&RefreshEffect::ScheduleFollowUp) {
                        effects = self.machine.handle(RefreshEvent::Requested);
                        continue;
                    }
                    self.machine.handle(RefreshEvent::Presented);
                    return Ok(());
                }
                Err(error) => {
                    let failed = self.machine.handle(RefreshEvent::Failed { generation });
                    self.apply_flags(&failed);
                    return Err(error);
                }
            }
        }
    }

    fn apply_flags(&mut self, effects: &[RefreshEffect]) {
        for effect in effects {
            match effect {
                RefreshEffect::MarkStale => self.stale = true,
                RefreshEffect::ClearStale => self.stale = false,
                RefreshEffect::DiscardResult => tracing::debug!("discarded superseded status"),
                RefreshEffect::StartRefresh { .. }
                | RefreshEffect::Render
                | RefreshEffect::ScheduleFollowUp => {}
            }
        }
    }

    // Signals that arrived while a read ran only mark the machine.
    fn drain_signals(&mut self) {
        let mut pending = Vec::new();
        if let Some(watcher) = &mut self.watcher {
            while let Some(signal) = watcher.try_next() {
                pending.push(signal);
            }
        }
        for signal in pending {
            let event = match signal {
                WatchSignal::Stale { .. } => RefreshEvent::ExternalChange,
                WatchSignal::AutoRefresh => RefreshEvent::Requested,
            };
            let effects = self.machine.handle(event);
            self.apply_flags(&effects);
        }
    }

    async fn read_snapshot(&self) -> Result<StatusSnapshot, ViewError> {
        let mut snapshot = StatusSnapshot::fetch(&self.repo, self.options.recent_commits).await?;
        let expanded: Vec<EntryKey> = self.tree.expanded().cloned().collect();
        for key in expanded {
            let Some(entry) = snapshot.entry(&key) else {
                continue;
            };
            let diff = self.entry_diff(entry).await?;
            if let Some(entry) = snapshot.entry_mut(&key) {
                entry.diff = diff;
            }
        }
        Ok(snapshot)
    }

    /// Wait for the next watcher signal; `None` without a watcher.
    pub async fn next_signal(&mut self) -> Option<WatchSignal> {
        self.watcher.as_mut()?.next().await
    }

    pub async fn handle_signal(&mut self, signal: WatchSignal) -> Result<(), ViewError> {
        match signal {
            WatchSignal::Stale { .. } => {
                let effects = self.machine.handle(RefreshEvent::ExternalChange);
                self.apply_flags(&effects);
                if self.stale {
                    tracing::info!("repository changed; status is stale");
                }
                Ok(())
            }
            WatchSignal::AutoRefresh => self.refresh().await,
        }
    }

    /// Expand or collapse the entry owning `row`.
    pub async fn toggle_expand(&mut self, row: usize) -> Result<(), ViewError> {
        let Some(entry) = self.tree.entry_at(row) else {
            let section = match self.tree.row(row).map(|row| &row.kind) {
                Some(RowKind::SectionHeader(section)) => Some(*section),
                _ => None,
            };
            if let Some(section) = section {
                self.tree.toggle_fold(section);
            }
            return Ok(());
        };

        let key = entry.key();
        if self.tree.is_expanded(&key) {
            self.tree.collapse(&key);
            return Ok(());
        }
        if let Some(diff) = self.entry_diff(entry).await? {
            self.tree.expand(&key, diff);
        }
        Ok(())
    }

    async fn entry_diff(&self, entry: &StatusEntry) -> Result<Option<FilePair>, ViewError> {
        let context = DiffContext::Lines(self.options.context);
        let source = match entry.section {
            Section::Untracked => return self.untracked_diff(entry).await.map(Some),
            Section::Unstaged => DiffSource::Unstaged,
            Section::Staged => DiffSource::Staged,
            // a combined diff cannot be staged from; show our side
            Section::Conflicted => DiffSource::Ours,
            Section::RecentCommits => return Ok(None),
        };
        let spec = self.entry_request(entry, source, context).fetch(&self.repo).await?;
        Ok(spec
            .files
            .into_iter()
            .find(|file| file.new_path == entry.path || file.old_path == entry.path))
    }

    fn entry_request(&self, entry: &StatusEntry, source: DiffSource, context: DiffContext) -> DiffRequest {
        let mut paths = vec![entry.path.clone()];
        if let Some(orig) = &entry.orig_path {
            paths.insert(0, orig.clone());
        }
        DiffRequest::new(source).with_context(context).with_paths(paths)
    }

    async fn untracked_diff(&self, entry: &StatusEntry) -> Result<FilePair, ViewError> {
        let path = self.repo.root().join(&entry.path);
        let read_failed = |error: std::io::Error| ViewError::IoFailed {
            path: entry.path.clone(),
            message: error.to_string(),
        };
        let content = tokio::fs::read(&path).await.map_err(read_failed)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(read_failed)?;
        Ok(FilePair::untracked(&entry.path, &content, is_executable(&metadata)))
    }

    /// Stage what `row` shows: a section, an entry, a hunk or one line.
    pub async fn stage(
        &mut self,
        row: usize,
        confirm: &mut impl Confirm,
    ) -> Result<StageOutcome, ViewError> {
        match self.target(row)? {
            Target::Section(section) => self.stage_section(section, confirm).await,
            Target::Whole(key) => {
                let entry = self.entry(&key)?;
                let outcome = self.stage_whole(&entry, None, confirm).await;
                self.refresh().await?;
                outcome
            }
            Target::Lines(key, picks) => {
                let entry = self.entry(&key)?;
                if entry.section == Section::Staged {
                    return Err(ViewError::WrongSource { operation: "stage" });
                }
                let outcome = self.stage_lines(&entry, picks, confirm).await;
                self.refresh().await?;
                outcome
            }
        }
    }

    /// Unstage what `row` shows.
    pub async fn unstage(&mut self, row: usize) -> Result<StageOutcome, ViewError> {
        match self.target(row)? {
            Target::Section(section) => self.unstage_section(section).await,
            Target::Whole(key) => {
                let entry = self.entry(&key)?;
                let outcome = self.unstage_whole(&entry, None).await;
                self.refresh().await?;
                outcome
            }
            Target::Lines(key, picks) => {
                let entry = self.entry(&key)?;
                if entry.section != Section::Staged {
                    return Err(ViewError::WrongSource { operation: "unstage" });
                }
                let outcome = self.apply_picks(&entry, picks, Operation::Unstage).await;
                self.refresh().await?;
                outcome
            }
        }
    }

    /// Stage every entry of an unstaged, untracked or conflicted section,
    /// refreshing once at the end.
    pub async fn stage_section(
        &mut self,
        section: Section,
        confirm: &mut impl Confirm,
    ) -> Result<StageOutcome, ViewError> {
        if matches!(section, Section::Staged | Section::RecentCommits) {
            return Err(ViewError::WrongSource { operation: "stage" });
        }
        let entries: Vec<StatusEntry> = self.tree.snapshot().section(section).cloned().collect();
        let spec = match section {
            Section::Unstaged => Some(self.section_spec(&entries, DiffSource::Unstaged).await?),
            _ => None,
        };

        let mut outcomes = Vec::new();
        let mut failure = None;
        for entry in &entries {
            match self.stage_whole(entry, spec.as_ref(), &mut *confirm).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        self.refresh().await?;
        tracing::info!(?section, entries = outcomes.len(), "staged section");
        match failure {
            Some(error) => Err(error),
            None => Ok(StageOutcome::Section(outcomes)),
        }
    }

    pub async fn unstage_section(&mut self, section: Section) -> Result<StageOutcome, ViewError> {
        if section != Section::Staged {
            return Err(ViewError::WrongSource { operation: "unstage" });
        }
        let entries: Vec<StatusEntry> = self.tree.snapshot().section(section).cloned().collect();
        let spec = self.section_spec(&entries, DiffSource::Staged).await?;

        let mut outcomes = Vec::new();
        let mut failure = None;
        for entry in &entries {
            match self.unstage_whole(entry, Some(&spec)).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        self.refresh().await?;
        tracing::info!(?section, entries = outcomes.len(), "unstaged section");
        match failure {
            Some(error) => Err(error),
            None => Ok(StageOutcome::Section(outcomes)),
        }
    }

    fn entry(&self, key: &EntryKey) -> Result<StatusEntry, ViewError> {
        self.tree
            .entry(key)
            .cloned()
            .ok_or_else(|| SelectionError::NothingToStage.into())
    }

    fn target(&self, row: usize) -> Result<Target, ViewError> {
        let kind = self
            .tree
            .row(row)
            .map(|row| row.kind.clone())
            .ok_or(SelectionError::NothingToStage)?;

        let lines = |key: &EntryKey,
                     hunk: usize,
                     line: Option<usize>|
         -> Result<Target, SelectionError> {
            let diff = self
                .tree
                .entry(key)
                .and_then(|entry| entry.diff.as_ref())
                .ok_or(SelectionError::NothingToStage)?;
            let target = diff.hunks.get(hunk).ok_or_else(|| SelectionError::NoSuchHunk {
                path: key.path.clone(),
                hunk,
            })?;
            let mut picks = LinePicks::new(0);
            match line {
                Some(line) => {
                    if target.lines.get(line).is_some_and(|l| l.kind.is_change()) {
                        picks.insert(hunk, line);
                    }
                }
                None => target
                    .change_indices()
                    .for_each(|line| picks.insert(hunk, line)),
            }
            if picks.is_empty() {
                return Err(SelectionError::NothingToStage);
            }
            Ok(Target::Lines(key.clone(), picks))
        };

        Ok(match kind {
            RowKind::SectionHeader(section) => Target::Section(section),
            RowKind::Entry(key) | RowKind::Detail(key) => Target::Whole(key),
            RowKind::HunkHeader { key, hunk } => lines(&key, hunk, None)?,
            RowKind::HunkLine { key, hunk, line } => lines(&key, hunk, Some(line))?,
            RowKind::Info | RowKind::Commit(_) => return Err(SelectionError::NothingToStage.into()),
        })
    }

    async fn section_spec(
        &self,
        entries: &[StatusEntry],
        source: DiffSource,
    ) -> Result<DiffSpec, ViewError> {
        let mut paths = Vec::new();
        for entry in entries {
            paths.extend(entry.orig_path.iter().cloned());
            paths.push(entry.path.clone());
        }
        if paths.is_empty() {
            return Ok(DiffSpec::default());
        }
        Ok(DiffRequest::new(source)
            .with_context(DiffContext::Lines(self.options.context))
            .with_paths(paths)
            .fetch(&self.repo)
            .await?)
    }

    async fn has_conflict_markers(&self, path: &str) -> bool {
        match tokio::fs::read(self.repo.root().join(path)).await {
            Ok(content) => contains_conflict_markers(&content),
            Err(_) => false,
        }
    }

    async fn stage_whole(
        &self,
        entry: &StatusEntry,
        spec: Option<&DiffSpec>,
        confirm: &mut impl Confirm,
    ) -> Result<StageOutcome, ViewError> {
        let path = entry.path.clone();
        let markers = self.has_conflict_markers(&path).await;
        let prompt = match entry.section {
            Section::Conflicted if markers => {
                Some(format!("{path} still contains conflict markers. Stage it anyway?"))
            }
            Section::Unstaged | Section::Untracked if markers => {
                Some(format!("{path} contains conflict markers. Stage it anyway?"))
            }
            Section::Staged | Section::RecentCommits => {
                return Err(ViewError::WrongSource { operation: "stage" });
            }
            _ => None,
        };
        if let Some(prompt) = prompt
            && !confirm.confirm(&prompt)
        {
            tracing::info!(path, "staging declined");
            return Ok(StageOutcome::Declined { path });
        }

        if entry.section != Section::Unstaged {
            return self.add(&path).await;
        }

        let file = match spec {
            Some(spec) => spec.file(&path).cloned(),
            None => self.entry_diff(entry).await?,
        };
        match file {
            Some(file) if !file.binary => {
                let picks = LinePicks::file(0, &file);
                self.apply_file(file, &picks, Operation::Stage).await
            }
            _ => self.add(&path).await,
        }
    }

    async fn stage_lines(
        &self,
        entry: &StatusEntry,
        picks: LinePicks,
        confirm: &mut impl Confirm,
    ) -> Result<StageOutcome, ViewError> {
        if self.has_conflict_markers(&entry.path).await
            && !confirm.confirm(&format!(
                "{} contains conflict markers. Stage it anyway?",
                entry.path
            ))
        {
            return Ok(StageOutcome::Declined {
                path: entry.path.clone(),
            });
        }
        if entry.section == Section::Conflicted {
            return self.add(&entry.path).await;
        }
        self.apply_picks(entry, picks, Operation::Stage).await
    }

    async fn unstage_whole(
        &self,
        entry: &StatusEntry,
        spec: Option<&DiffSpec>,
    ) -> Result<StageOutcome, ViewError> {
        if entry.section != Section::Staged {
            return Err(ViewError::WrongSource { operation: "unstage" });
        }
        let file = match spec {
            Some(spec) => spec.file(&entry.path).cloned(),
            None => self.entry_diff(entry).await?,
        };
        match file {
            Some(file) if !file.binary => {
                let picks = LinePicks::file(0, &file);
                self.apply_file(file, &picks, Operation::Unstage).await
            }
            _ => self.reset(entry).await,
        }
    }

    async fn apply_picks(
        &self,
        entry: &StatusEntry,
        picks: LinePicks,
        operation: Operation,
    ) -> Result<StageOutcome, ViewError> {
        let file = entry
            .diff
            .clone()
            .ok_or(SelectionError::NothingToStage)?;
        self.apply_file(file, &picks, operation).await
    }

    async fn apply_file(
        &self,
        file: FilePair,
        picks: &LinePicks,
        operation: Operation,
    ) -> Result<StageOutcome, ViewError> {
        let path = file.path().to_string();
        let spec = DiffSpec::from_files(self.repo.root(), vec![file]);
        let patch = PatchBuilder::new(&spec).build(picks, operation.direction())?;
        patch.apply(&self.repo, operation).await?;
        tracing::info!(path, lines = patch.changed, ?operation, "applied patch");
        Ok(StageOutcome::Patched {
            path,
            lines: patch.changed,
        })
    }

    async fn add(&self, path: &str) -> Result<StageOutcome, ViewError> {
        let args = git_args(&["add", "--", path]);
        self.repo.mutate(&args, None).await?.into_stdout(&args)?;
        tracing::info!(path, "added whole file");
        Ok(StageOutcome::Whole {
            path: path.to_string(),
        })
    }

    async fn reset(&self, entry: &StatusEntry) -> Result<StageOutcome, ViewError> {
        let mut args = if self.tree.snapshot().branch.is_unborn() {
            git_args(&["rm", "--cached", "-q", "--"])
        } else {
            git_args(&["reset", "-q", "--"])
        };
        args.extend(entry.orig_path.iter().cloned());
        args.push(entry.path.clone());
        self.repo.mutate(&args, None).await?.into_stdout(&args)?;
        tracing::info!(path = %entry.path, "reset whole file");
        Ok(StageOutcome::Whole {
            path: entry.path.clone(),
        })
    }
}

fn contains_conflict_markers(content: &[u8]) -> bool {
    let text = String::from_utf8_lossy(content);
    let mut opened = false;
    for line in text.lines() {
        if line.starts_with("<<<<<<<") {
            opened = true;
        } else if opened && line.starts_with(">>>>>>>") {
            return true;
        }
    }
    false
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::git::GitOutput;
    use crate::git::testing::{ScriptedExecutor, repo};
    use similar_asserts::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    const STATUS: &str = concat!(
        "# branch.oid 0123\0# branch.head main\0",
        "1 .M N... 100644 100644 100644 aaaa bbbb notes.txt\0",
    );

    const NOTES_DIFF: &str = "diff --git a/notes.txt b/notes.txt
index 1111111..2222222 100644
--- a/notes.txt
+++ b/notes.txt
@@ -1,2 +1,3 @@
 one
+two
+three
-four
";

    fn executor() -> Arc<ScriptedExecutor> {
        ScriptedExecutor::new(|args, _| {
            let stdout = if args.iter().any(|arg| arg == "status") {
                STATUS.to_string()
            } else if args.iter().any(|arg| arg == "diff") {
                NOTES_DIFF.to_string()
            } else {
                String::new()
            };
            GitOutput {
                stdout,
                ..GitOutput::default()
            }
        })
    }

    fn options() -> StatusViewOptions {
        StatusViewOptions {
            context: 3,
            recent_commits: 0,
            watch: None,
        }
    }

    async fn open(executor: Arc<ScriptedExecutor>) -> StatusView<Arc<ScriptedExecutor>> {
        StatusView::open(Arc::new(repo(executor)), options())
            .await
            .unwrap()
    }

    fn never(_: &str) -> bool {
        false
    }

    #[test]
    fn marker_detection_needs_an_opening_and_closing_marker() {
        assert!(contains_conflict_markers(
            b"a\n<<<<<<< HEAD\nb\n=======\nc\n>>>>>>> theirs\n"
        ));
        assert!(!contains_conflict_markers(b">>>>>>> quoted\n<<<<<<< mail\n"));
        assert!(!contains_conflict_markers(b"plain\n"));
    }

    #[tokio::test]
    async fn expand_then_stage_one_line() {
        let executor = executor();
        let mut view = open(executor.clone()).await;
        // Head, section header, entry
        assert_eq!(view.tree().rows().len(), 3);
        view.toggle_expand(2).await.unwrap();
        assert_eq!(view.tree().row(5).unwrap().text, "+two");

        let outcome = view.stage(5, &mut never).await.unwrap();
        assert_eq!(
            outcome,
            StageOutcome::Patched {
                path: "notes.txt".to_string(),
                lines: 1
            }
        );

        let calls = executor.calls();
        let apply = calls.iter().find(|(args, _)| args[0] == "apply").unwrap();
        assert_eq!(
            apply.1.as_deref().unwrap(),
            "diff --git a/notes.txt b/notes.txt
index 1111111..2222222 100644
--- a/notes.txt
+++ b/notes.txt
@@ -1,2 +1,3 @@
 one
+two
 four
"
        );
        // still expanded after the refresh that followed
        assert!(view.tree().is_expanded(&EntryKey {
            section: Section::Unstaged,
            path: "notes.txt".to_string()
        }));
    }

    #[tokio::test]
    async fn context_row_stages_nothing() {
        let executor = executor();
        let mut view = open(executor.clone()).await;
        view.toggle_expand(2).await.unwrap();
        let before = executor.calls().len();

        assert!(matches!(
            view.stage(4, &mut never).await,
            Err(ViewError::SelectionError(SelectionError::NothingToStage))
        ));
        assert_eq!(executor.calls().len(), before);
    }

    #[tokio::test]
    async fn unstage_rejects_unstaged_rows() {
        let mut view = open(executor()).await;
        assert!(matches!(
            view.unstage(2).await,
            Err(ViewError::WrongSource { .. })
        ));
    }

    #[tokio::test]
    async fn stale_signal_marks_until_refresh() {
        let mut view = open(executor()).await;
        assert_eq!(view.refresh_state(), RefreshState::Idle);

        view.handle_signal(WatchSignal::Stale { at: Instant::now() })
        .await
        .unwrap();
        assert!(view.is_stale());
        assert_eq!(view.refresh_state(), RefreshState::Stale);

        view.refresh().await.unwrap();
        assert!(!view.is_stale());
        assert_eq!(view.refresh_state(), RefreshState::Idle);
    }

    fn status_reads(executor: &ScriptedExecutor) -> usize {
        executor
            .calls()
            .iter()
            .filter(|(args, _)| args.iter().any(|arg| arg == "status"))
            .count()
    }

    #[tokio::test]
    async fn changes_during_refresh_trigger_one_follow_up() {
        let (signal_tx, signals) = tokio::sync::mpsc::unbounded_channel();
        let armed = Arc::new(AtomicBool::new(false));
        let trigger = Arc::clone(&armed);
        let executor = ScriptedExecutor::new(move |args, _| {
            let status = args.iter().any(|arg| arg == "status");
            // both arrive while the status read is still running
            if status && trigger.swap(false, Ordering::SeqCst) {
                let _ = signal_tx.send(WatchSignal::Stale { at: Instant::now() });
                let _ = signal_tx.send(WatchSignal::AutoRefresh);
            }
            GitOutput {
                stdout: if status { STATUS } else { "" }.to_string(),
                ..GitOutput::default()
            }
        });
        let mut view = open(executor.clone()).await;
        view.watcher = Some(ChangeWatcher::from_signals(signals));
        let before = status_reads(&executor);

        armed.store(true, Ordering::SeqCst);
        view.refresh().await.unwrap();

        assert_eq!(status_reads(&executor), before + 2);
        assert!(!view.is_stale());
        assert_eq!(view.refresh_state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn quiet_refresh_reads_once() {
        let (_signal_tx, signals) = tokio::sync::mpsc::unbounded_channel();
        let executor = executor();
        let mut view = open(executor.clone()).await;
        view.watcher = Some(ChangeWatcher::from_signals(signals));
        let before = status_reads(&executor);

        view.refresh().await.unwrap();
        assert_eq!(status_reads(&executor), before + 1);
    }
}
