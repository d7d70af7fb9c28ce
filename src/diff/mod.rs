//! Unified diff model and parser.
//!
//! [`DiffSpec::parse`] turns the output of `git diff` into [`FilePair`]s with
//! their [`Hunk`]s. [`DiffRequest`] builds the `git diff` invocation with
//! every format-affecting option pinned, so user configuration never changes
//! what the parser sees.

pub mod file;
pub mod hunk;
mod parser;

use crate::git::{GitExecutor, ProcessError, RepoState};
use error_set::error_set;
use std::path::PathBuf;

pub use file::{FilePair, FileStatus, split_lines};
pub use hunk::{Hunk, HunkHeader, Line, LineKind, NO_NEWLINE_MARKER};

/// Context value passed to `--unified` for "the whole file"
pub const UNLIMITED_CONTEXT: u32 = 100_000_000;

error_set! {
    /// Problems with one file block of a diff. The block is skipped.
    ParseError := {
        #[display("Line {line}: file block names no path")]
        MissingPath { line: usize },
        #[display("Line {line}: malformed hunk header '{header}'")]
        BadHunkHeader { line: usize, header: String },
        #[display("Line {line}: hunk ends early, {missing} lines missing")]
        TruncatedHunk { line: usize, missing: u32 },
        #[display("Line {line}: unexpected '{text}' in hunk body")]
        UnexpectedLine { line: usize, text: String },
        #[display("Line {line}: combined diffs are not supported")]
        CombinedDiff { line: usize },
    }
}

impl ParseError {
    /// 1-based line of the diff text where the problem was found
    pub fn line(&self) -> usize {
        match self {
            ParseError::MissingPath { line }
            | ParseError::BadHunkHeader { line, .. }
            | ParseError::TruncatedHunk { line, .. }
            | ParseError::UnexpectedLine { line, .. }
            | ParseError::CombinedDiff { line } => *line,
        }
    }
}

/// A parsed diff: every file it touches, plus the blocks that were skipped.
#[derive(Debug, Default)]
pub struct DiffSpec {
    pub root: PathBuf,
    pub files: Vec<FilePair>,
    pub errors: Vec<ParseError>,
}

impl DiffSpec {
    pub fn from_files(root: impl Into<PathBuf>, files: Vec<FilePair>) -> Self {
        Self {
            root: root.into(),
            files,
            errors: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Index of the file whose current (or old) path is `path`
    pub fn position(&self, path: &str) -> Option<usize> {
        self.files
            .iter()
            .position(|file| file.new_path == path || file.old_path == path)
    }

    pub fn file(&self, path: &str) -> Option<&FilePair> {
        self.position(path).map(|index| &self.files[index])
    }
}

/// How much unchanged text surrounds each change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffContext {
    /// Each hunk spans the whole file
    #[default]
    Unlimited,
    Lines(u32),
}

impl DiffContext {
    pub fn lines(self) -> u32 {
        match self {
            DiffContext::Unlimited => UNLIMITED_CONTEXT,
            DiffContext::Lines(n) => n,
        }
    }
}

/// Which pair of images to compare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffSource {
    /// Index against worktree
    Unstaged,
    /// HEAD against index
    Staged,
    /// Our side of a conflict against the worktree
    Ours,
    /// Their side of a conflict against the worktree
    Theirs,
}

/// One `git diff` invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRequest {
    pub source: DiffSource,
    pub context: DiffContext,
    pub paths: Vec<String>,
}

impl DiffRequest {
    pub fn new(source: DiffSource) -> Self {
        Self {
            source,
            context: DiffContext::Unlimited,
            paths: Vec::new(),
        }
    }

    pub fn unstaged() -> Self {
        Self::new(DiffSource::Unstaged)
    }

    pub fn staged() -> Self {
        Self::new(DiffSource::Staged)
    }

    pub fn with_context(mut self, context: DiffContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Arguments for git, with output format pinned
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            // diff may otherwise rewrite the index, which the watcher would see
            "--no-optional-locks",
            "-c",
            "core.quotePath=false",
            "diff",
            "--no-color",
            "--no-ext-diff",
            "--no-textconv",
            "--src-prefix=a/",
            "--dst-prefix=b/",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();
        args.push(format!("--unified={}", self.context.lines()));

        match self.source {
            DiffSource::Unstaged => {}
            DiffSource::Staged => args.push("--cached".to_string()),
            DiffSource::Ours => args.push("--ours".to_string()),
            DiffSource::Theirs => args.push("--theirs".to_string()),
        }

        args.push("--".to_string());
        args.extend(self.paths.iter().cloned());
        args
    }

    /// Run the diff and parse its output
    pub async fn fetch<E: GitExecutor>(&self, repo: &RepoState<E>) -> Result<DiffSpec, ProcessError> {
        let args = self.args();
        let stdout = repo.read(&args).await?.into_stdout(&args)?;
        let spec = DiffSpec::parse(repo.root(), &stdout);
        tracing::debug!(
            source = ?self.source,
            files = spec.files.len(),
            skipped = spec.errors.len(),
            "parsed diff"
        );
        Ok(spec)
    }
}

/// Format a diff for user display with explicit line numbers
pub fn format_diff(spec: &DiffSpec) -> String {
    let mut result = String::new();

    for file in &spec.files {
        result.push_str(file.path());
        result.push_str(":\n");

        if file.binary {
            result.push_str("  (binary)\n\n");
            continue;
        }

        for hunk in &file.hunks {
            for line in &hunk.lines {
                match line.kind {
                    LineKind::Delete => {
                        let number = line.old_lineno.unwrap_or_default();
                        result.push_str(&format!("  -{}:\t{}\n", number, line.text));
                    }
                    LineKind::Add => {
                        let number = line.new_lineno.unwrap_or_default();
                        result.push_str(&format!("  +{}:\t{}\n", number, line.text));
                    }
                    LineKind::Context => {}
                }
            }
            result.push('\n');
        }
    }

    // Remove trailing newline if present
    if result.ends_with("\n\n") {
        result.pop();
    }

    result
}
