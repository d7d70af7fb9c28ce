use super::ViewError;
use crate::diff::{DiffContext, DiffRequest, DiffSource, DiffSpec, FilePair};
use crate::git::{GitExecutor, RepoState, git_args};
use crate::linemap::{
    Backing, BufferPair, BufferTriple, EditError, LayoutOptions, LineMap, LineMapBuilder, Side,
};
use crate::patch::{Operation, Patch, PatchBuilder, Selection, SelectionError};
use std::ops::Range;
use std::sync::Arc;

/// Side-by-side diff of one [`DiffRequest`], with staging and edit write-back.
pub struct DiffView<E> {
    repo: Arc<RepoState<E>>,
    request: DiffRequest,
    layout: LayoutOptions,
    spec: DiffSpec,
    map: LineMap,
    buffers: BufferPair,
    /// Buffer versions right after the last render
    rendered: (u64, u64),
    cursor: usize,
}

fn backings(source: DiffSource) -> (Backing, Backing) {
    let blob = |revision: &str| Backing::Blob {
        revision: revision.to_string(),
    };
    match source {
        DiffSource::Unstaged => (Backing::Index, Backing::Worktree),
        DiffSource::Staged => (blob("HEAD"), Backing::Index),
        DiffSource::Ours => (blob(":2"), Backing::Worktree),
        DiffSource::Theirs => (blob(":3"), Backing::Worktree),
    }
}

impl<E: GitExecutor> DiffView<E> {
    /// Run the diff and lay it out.
    pub async fn open(
        repo: Arc<RepoState<E>>,
        request: DiffRequest,
        layout: LayoutOptions,
    ) -> Result<Self, ViewError> {
        let spec = request.fetch(&repo).await?;
        Ok(Self::open_spec(repo, request, spec, layout))
    }

    /// Lay out an already parsed diff.
    pub fn open_spec(
        repo: Arc<RepoState<E>>,
        request: DiffRequest,
        spec: DiffSpec,
        layout: LayoutOptions,
    ) -> Self {
        let (left, right) = backings(request.source);
        let mut view = Self {
            repo,
            request,
            layout,
            spec: DiffSpec::default(),
            map: LineMap::default(),
            buffers: BufferPair::new(left, right),
            rendered: (0, 0),
            cursor: 0,
        };
        view.render(spec);
        view
    }

    fn render(&mut self, spec: DiffSpec) {
        let rendered = LineMapBuilder::new(self.layout).build(&spec);
        self.buffers.render(&rendered);
        self.map = rendered.map;
        self.spec = spec;
        self.rendered = (self.buffers.left.version(), self.buffers.right.version());
        self.cursor = self.cursor.min(self.buffers.left.rows().len().saturating_sub(1));
    }

    /// Re-run the diff and re-render in place; buffer ids are kept.
    pub async fn refresh(&mut self) -> Result<(), ViewError> {
        let spec = self.request.fetch(&self.repo).await?;
        tracing::info!(
            files = spec.files.len(),
            source = ?self.request.source,
            "refreshed diff"
        );
        self.render(spec);
        Ok(())
    }

    pub fn spec(&self) -> &DiffSpec {
        &self.spec
    }

    pub fn map(&self) -> &LineMap {
        &self.map
    }

    pub fn buffers(&self) -> &BufferPair {
        &self.buffers
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, row: usize) {
        self.cursor = row.min(self.buffers.left.rows().len().saturating_sub(1));
    }

    /// Buffer content with filler and header rows stripped
    pub fn get_real_lines(&self, side: Side, file_index: Option<usize>) -> Vec<&str> {
        self.buffers.get_real_lines(side, file_index)
    }

    pub fn edit(
        &mut self,
        side: Side,
        range: Range<usize>,
        lines: Vec<String>,
    ) -> Result<(), EditError> {
        self.buffers.side_mut(side).edit(range, lines)
    }

    /// Edits made since the last render
    pub fn has_pending_edits(&self) -> bool {
        self.rendered != (self.buffers.left.version(), self.buffers.right.version())
    }

    pub async fn stage_selection(&mut self, selection: Selection) -> Result<Patch, ViewError> {
        self.apply(selection, Operation::Stage, DiffSource::Unstaged, "stage")
            .await
    }

    pub async fn unstage_selection(&mut self, selection: Selection) -> Result<Patch, ViewError> {
        self.apply(selection, Operation::Unstage, DiffSource::Staged, "unstage")
            .await
    }

    /// Revert the selected worktree changes to the index.
    pub async fn discard_selection(&mut self, selection: Selection) -> Result<Patch, ViewError> {
        self.apply(selection, Operation::Discard, DiffSource::Unstaged, "discard")
            .await
    }

    async fn apply(
        &mut self,
        selection: Selection,
        operation: Operation,
        source: DiffSource,
        name: &'static str,
    ) -> Result<Patch, ViewError> {
        if self.request.source != source {
            return Err(ViewError::WrongSource { operation: name });
        }
        if self.has_pending_edits() {
            return Err(ViewError::PendingEdits);
        }

        let patch = PatchBuilder::new(&self.spec).patch(&self.map, &selection, operation.direction())?;
        patch.apply(&self.repo, operation).await?;
        tracing::info!(path = %patch.path, lines = patch.changed, ?operation, "applied selection");

        self.refresh().await?;
        Ok(patch)
    }

    /// Write one file's edited side back to where it lives.
    ///
    /// Needs a whole-file diff: with limited context the buffer holds only
    /// part of the file.
    pub async fn write_back(&mut self, side: Side, file_index: usize) -> Result<(), ViewError> {
        let file = self
            .spec
            .files
            .get(file_index)
            .ok_or(SelectionError::NoSuchFile { index: file_index })?;
        if file.binary {
            return Err(SelectionError::BinaryFile {
                path: file.path().to_string(),
            }
            .into());
        }
        if self.request.context != DiffContext::Unlimited {
            return Err(ViewError::WrongSource {
                operation: "write back",
            });
        }

        let lines = self.buffers.get_real_lines(side, Some(file_index));
        let mut content = lines.join("\n");
        if !lines.is_empty() && !file.missing_final_newline(side == Side::Right) {
            content.push('\n');
        }
        let (path, mode) = match side {
            Side::Left => (file.old_path.clone(), file.old_mode.clone()),
            Side::Right => (file.new_path.clone(), file.new_mode.clone()),
        };

        match self.buffers.side(side).backing().clone() {
            Backing::Blob { revision } => return Err(EditError::ReadOnly { revision }.into()),
            Backing::Worktree => self.write_worktree(&path, content.as_bytes()).await?,
            Backing::Index => {
                let mode = mode.unwrap_or_else(|| "100644".to_string());
                self.write_index(&path, &mode, content.as_bytes()).await?;
            }
        }
        tracing::info!(path, ?side, bytes = content.len(), "wrote buffer back");

        self.refresh().await
    }

    async fn write_worktree(&self, path: &str, content: &[u8]) -> Result<(), ViewError> {
        let target = self.repo.root().join(path);
        let _exclusive = self.repo.exclusive().await;
        self.repo.clock().begin();
        let written = tokio::fs::write(&target, content).await;
        self.repo.clock().end();
        written.map_err(|error| ViewError::IoFailed {
            path: path.to_string(),
            message: error.to_string(),
        })
    }

    async fn write_index(&self, path: &str, mode: &str, content: &[u8]) -> Result<(), ViewError> {
        let hash_args = git_args(&["hash-object", "-w", "--stdin"]);
        let blob = self
            .repo
            .mutate(&hash_args, Some(content))
            .await?
            .into_stdout(&hash_args)?;

        let cacheinfo = format!("{mode},{},{path}", blob.trim());
        let update_args = git_args(&["update-index", "--cacheinfo", &cacheinfo]);
        self.repo
            .mutate(&update_args, None)
            .await?
            .into_stdout(&update_args)?;
        Ok(())
    }

    pub fn next_hunk(&mut self) -> Option<usize> {
        let row = self.map.next_hunk(self.cursor)?;
        self.cursor = row;
        Some(row)
    }

    pub fn prev_hunk(&mut self) -> Option<usize> {
        let row = self.map.prev_hunk(self.cursor)?;
        self.cursor = row;
        Some(row)
    }

    pub fn next_file(&mut self) -> Option<usize> {
        let row = self.map.next_file(self.cursor)?;
        self.cursor = row;
        Some(row)
    }

    pub fn prev_file(&mut self) -> Option<usize> {
        let row = self.map.prev_file(self.cursor)?;
        self.cursor = row;
        Some(row)
    }
}

/// Three-way view of a conflicted path, or `None` when neither side differs
/// from the worktree.
pub async fn open_conflict<E: GitExecutor>(
    repo: &RepoState<E>,
    path: &str,
) -> Result<Option<BufferTriple>, ViewError> {
    let fetch = |source| async move {
        DiffRequest::new(source)
            .with_paths([path])
            .fetch(repo)
            .await
    };
    let (ours, theirs) = tokio::try_join!(fetch(DiffSource::Ours), fetch(DiffSource::Theirs))?;

    let pick = |spec: DiffSpec| spec.files.into_iter().find(|file| file.path() == path);
    let identical = |other: &FilePair| FilePair {
        hunks: Vec::new(),
        ..other.clone()
    };
    let triple = match (pick(ours), pick(theirs)) {
        (Some(ours), Some(theirs)) => BufferTriple::conflict(&ours, &theirs),
        (Some(ours), None) => BufferTriple::conflict(&ours, &identical(&ours)),
        (None, Some(theirs)) => BufferTriple::conflict(&identical(&theirs), &theirs),
        (None, None) => return Ok(None),
    };
    Ok(Some(triple))
}
