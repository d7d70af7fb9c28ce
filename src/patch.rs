//! Minimal patches for partial staging.
//!
//! A selection of buffer rows (or a hunk, or a whole file) is resolved to the
//! changed lines it covers. [`PatchBuilder::build`] then writes a patch that
//! carries only those changes: every other change is neutralized against the
//! image git will apply it to, so the patch applies cleanly to exactly that
//! blob.

use crate::diff::file::{header_name, quote_path};
use crate::diff::{DiffSpec, FilePair, FileStatus, Hunk, Line, LineKind};
use crate::git::{GitExecutor, ProcessError, RepoState};
use crate::linemap::LineMap;
use error_set::error_set;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::RangeInclusive;

error_set! {
    /// Selections that cannot become a patch
    SelectionError := {
        #[display("Nothing to stage in the selection")]
        NothingToStage,
        #[display("Selection spans more than one file")]
        MultipleFiles,
        #[display("{path} is binary; stage the whole file instead")]
        BinaryFile { path: String },
        #[display("No file at index {index}")]
        NoSuchFile { index: usize },
        #[display("{path} has no hunk {hunk}")]
        NoSuchHunk { path: String, hunk: usize },
    }

    /// Failures applying a patch
    PatchError := {
        #[display("Patch for {path} no longer applies (stale, refresh): {stderr}")]
        ApplyConflict { path: String, stderr: String },
        ProcessError(ProcessError),
    }
}

/// What the user selected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Row(usize),
    Rows(RangeInclusive<usize>),
    /// Hunk by index within a file
    Hunk { file: usize, hunk: usize },
    File(usize),
}

/// Selected changed lines of one file, by hunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinePicks {
    pub file_index: usize,
    /// Hunk index to indices of changed lines within the hunk
    pub hunks: BTreeMap<usize, BTreeSet<usize>>,
    /// The whole file was selected, header changes included
    pub whole_file: bool,
}

impl LinePicks {
    pub fn new(file_index: usize) -> Self {
        Self {
            file_index,
            ..Self::default()
        }
    }

    /// Every change in the file
    pub fn file(file_index: usize, file: &FilePair) -> Self {
        let mut picks = Self::new(file_index);
        for (hunk_index, hunk) in file.hunks.iter().enumerate() {
            picks.hunks.insert(hunk_index, hunk.change_indices().collect());
        }
        picks.hunks.retain(|_, lines| !lines.is_empty());
        picks.whole_file = true;
        picks
    }

    pub fn insert(&mut self, hunk_index: usize, line_index: usize) {
        self.hunks.entry(hunk_index).or_default().insert(line_index);
    }

    pub fn count(&self) -> usize {
        self.hunks.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    fn contains(&self, hunk_index: usize, line_index: usize) -> bool {
        self.hunks
            .get(&hunk_index)
            .is_some_and(|lines| lines.contains(&line_index))
    }
}

/// Which image the patch is written against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Applied as is to the old image (staging)
    Forward,
    /// Applied with `--reverse` to the new image (unstaging, discarding)
    Reverse,
}

/// What a patch is applied for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Stage,
    Unstage,
    Discard,
}

impl Operation {
    pub fn direction(self) -> Direction {
        match self {
            Operation::Stage => Direction::Forward,
            Operation::Unstage | Operation::Discard => Direction::Reverse,
        }
    }

    fn apply_args(self, unidiff_zero: bool) -> Vec<String> {
        let mut args = vec!["apply".to_string(), "--whitespace=nowarn".to_string()];
        match self {
            Operation::Stage => args.push("--cached".to_string()),
            Operation::Unstage => {
                args.push("--cached".to_string());
                args.push("--reverse".to_string());
            }
            Operation::Discard => args.push("--reverse".to_string()),
        }
        if unidiff_zero {
            args.push("--unidiff-zero".to_string());
        }
        args.push("-".to_string());
        args
    }
}

/// A patch ready for `git apply`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub path: String,
    pub direction: Direction,
    pub text: String,
    /// Changed lines carried by the patch
    pub changed: usize,
    /// Some hunk has no context lines
    pub unidiff_zero: bool,
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Patch {
    /// Apply through the repository's mutation gate. Never retried.
    pub async fn apply<E: GitExecutor>(
        &self,
        repo: &RepoState<E>,
        operation: Operation,
    ) -> Result<(), PatchError> {
        let args = operation.apply_args(self.unidiff_zero);
        tracing::debug!(
            path = %self.path,
            ?operation,
            lines = self.changed,
            bytes = self.text.len(),
            "applying patch"
        );

        let output = repo.mutate(&args, Some(self.text.as_bytes())).await?;
        if output.success() {
            return Ok(());
        }
        if is_stale(&output.stderr) {
            return Err(PatchError::ApplyConflict {
                path: self.path.clone(),
                stderr: output.stderr,
            });
        }
        output.into_stdout(&args)?;
        Ok(())
    }
}

/// git rejected the patch because the blob moved underneath it
fn is_stale(stderr: &str) -> bool {
    [
        "patch does not apply",
        "does not match index",
        "does not exist in index",
        "already exists in index",
        "already exists in working directory",
        "No such file or directory",
    ]
    .iter()
    .any(|needle| stderr.contains(needle))
}

/// Builds patches for selections over one parsed diff
#[derive(Debug, Clone, Copy)]
pub struct PatchBuilder<'a> {
    spec: &'a DiffSpec,
}

impl<'a> PatchBuilder<'a> {
    pub fn new(spec: &'a DiffSpec) -> Self {
        Self { spec }
    }

    fn file(&self, index: usize) -> Result<&'a FilePair, SelectionError> {
        self.spec
            .files
            .get(index)
            .ok_or(SelectionError::NoSuchFile { index })
    }

    /// Resolve a selection to the changed lines it covers. Filler, header
    /// and context rows select nothing.
    pub fn resolve(&self, map: &LineMap, selection: &Selection) -> Result<LinePicks, SelectionError> {
        match selection {
            Selection::Row(row) => self.resolve_rows(map, *row..=*row),
            Selection::Rows(rows) => self.resolve_rows(map, rows.clone()),
            Selection::Hunk { file, hunk } => {
                let pair = self.file(*file)?;
                let target = pair.hunks.get(*hunk).ok_or_else(|| SelectionError::NoSuchHunk {
                    path: pair.path().to_string(),
                    hunk: *hunk,
                })?;
                let mut picks = LinePicks::new(*file);
                for line_index in target.change_indices() {
                    picks.insert(*hunk, line_index);
                }
                Ok(picks)
            }
            Selection::File(file) => Ok(LinePicks::file(*file, self.file(*file)?)),
        }
    }

    fn resolve_rows(
        &self,
        map: &LineMap,
        rows: RangeInclusive<usize>,
    ) -> Result<LinePicks, SelectionError> {
        let mut file_index = None;
        let mut picks = LinePicks::default();

        for entry in rows.filter_map(|row| map.get(row)) {
            match file_index {
                None => file_index = Some(entry.file_index),
                Some(index) if index != entry.file_index => {
                    return Err(SelectionError::MultipleFiles);
                }
                Some(_) => {}
            }
            if let Some(hunk_index) = entry.hunk_index {
                for line_index in entry.changed_lines() {
                    picks.insert(hunk_index, line_index);
                }
            }
        }

        picks.file_index = file_index.ok_or(SelectionError::NothingToStage)?;
        Ok(picks)
    }

    /// Resolve and build in one step
    pub fn patch(
        &self,
        map: &LineMap,
        selection: &Selection,
        direction: Direction,
    ) -> Result<Patch, SelectionError> {
        self.build(&self.resolve(map, selection)?, direction)
    }

    /// Write the patch for `picks`.
    pub fn build(&self, picks: &LinePicks, direction: Direction) -> Result<Patch, SelectionError> {
        let file = self.file(picks.file_index)?;
        if file.binary {
            return Err(SelectionError::BinaryFile {
                path: file.path().to_string(),
            });
        }

        let changed = picks.count();
        if changed == 0 {
            if picks.whole_file && file.has_meta_change() {
                return Ok(Patch {
                    path: file.path().to_string(),
                    direction,
                    text: header_lines(file, false).join("\n") + "\n",
                    changed: 0,
                    unidiff_zero: false,
                });
            }
            return Err(SelectionError::NothingToStage);
        }

        let partial = changed < file.changed_lines();
        let rewrite = partial
            && match direction {
                Direction::Forward => file.status == FileStatus::Deleted,
                Direction::Reverse => file.status == FileStatus::Added,
            };

        let mut text = header_lines(file, rewrite).join("\n");
        text.push('\n');

        let mut delta: i64 = 0;
        let mut unidiff_zero = false;
        for (hunk_index, hunk) in file.hunks.iter().enumerate() {
            let Some(mut partial_hunk) = select_hunk(hunk, hunk_index, picks, direction) else {
                continue;
            };
            place(&mut partial_hunk, hunk, direction, delta);
            delta += i64::from(partial_hunk.new_count) - i64::from(partial_hunk.old_count);
            unidiff_zero |= !partial_hunk
                .lines
                .iter()
                .any(|line| line.kind == LineKind::Context);
            text.push_str(&partial_hunk.to_string());
        }

        tracing::debug!(path = %file.path(), changed, ?direction, "built patch");
        Ok(Patch {
            path: file.path().to_string(),
            direction,
            text,
            changed,
            unidiff_zero,
        })
    }
}

/// Header lines for the patch. A rewrite turns a whole-file creation or
/// deletion into a plain modification.
fn header_lines(file: &FilePair, rewrite: bool) -> Vec<String> {
    if !rewrite {
        return file.header.clone();
    }

    let path = file.path();
    vec![
        format!("diff --git {} {}", quote_path("a/", path), quote_path("b/", path)),
        format!("--- {}", header_name("a/", path)),
        format!("+++ {}", header_name("b/", path)),
    ]
}

/// The hunk restricted to the picked lines, or `None` if it keeps no change
fn select_hunk(
    hunk: &Hunk,
    hunk_index: usize,
    picks: &LinePicks,
    direction: Direction,
) -> Option<Hunk> {
    let mut lines = Vec::with_capacity(hunk.lines.len());
    let mut kept = 0;

    for (index, line) in hunk.lines.iter().enumerate() {
        let picked = picks.contains(hunk_index, index);
        match (line.kind, picked, direction) {
            (LineKind::Context, _, _) => lines.push(line.clone()),
            (_, true, _) => {
                lines.push(line.clone());
                kept += 1;
            }
            // the unpicked change stays as it is in the target image
            (LineKind::Delete, false, Direction::Forward)
            | (LineKind::Add, false, Direction::Reverse) => {
                let mut context = line.clone();
                context.kind = LineKind::Context;
                lines.push(context);
            }
            (LineKind::Add, false, Direction::Forward)
            | (LineKind::Delete, false, Direction::Reverse) => {}
        }
    }

    if kept == 0 {
        return None;
    }
    Some(Hunk::with_lines(0, 0, bridge_newlines(lines)))
}

/// Only the last line of each image may lack its newline. A context line
/// without one that is followed by content on one side becomes a delete
/// and add pair, so that side gets the newline.
fn bridge_newlines(lines: Vec<Line>) -> Vec<Line> {
    let last_old = lines.iter().rposition(|line| line.kind != LineKind::Add);
    let last_new = lines.iter().rposition(|line| line.kind != LineKind::Delete);
    let mut bridged = Vec::with_capacity(lines.len() + 1);

    for (index, mut line) in lines.into_iter().enumerate() {
        if !line.missing_newline {
            bridged.push(line);
            continue;
        }
        let old_is_last = last_old == Some(index);
        let new_is_last = last_new == Some(index);
        match line.kind {
            LineKind::Context if old_is_last != new_is_last => {
                let mut delete = line.clone();
                delete.kind = LineKind::Delete;
                delete.new_lineno = None;
                delete.missing_newline = old_is_last;
                let mut add = line;
                add.kind = LineKind::Add;
                add.old_lineno = None;
                add.missing_newline = new_is_last;
                bridged.push(delete);
                bridged.push(add);
            }
            LineKind::Context => {
                line.missing_newline = old_is_last && new_is_last;
                bridged.push(line);
            }
            LineKind::Delete => {
                line.missing_newline = old_is_last;
                bridged.push(line);
            }
            LineKind::Add => {
                line.missing_newline = new_is_last;
                bridged.push(line);
            }
        }
    }
    bridged
}

/// First line a range covers; an empty range sits after its start line
fn first_line(start: u32, count: u32) -> i64 {
    if count == 0 {
        i64::from(start) + 1
    } else {
        i64::from(start)
    }
}

fn start_for(first: i64, count: u32) -> u32 {
    let start = if count == 0 { first - 1 } else { first };
    u32::try_from(start.max(0)).unwrap_or(0)
}

/// Set the partial hunk's starts. The target image's start is reused; the
/// other is shifted by the size change of the hunks already emitted.
fn place(partial: &mut Hunk, original: &Hunk, direction: Direction, delta: i64) {
    match direction {
        Direction::Forward => {
            let first = first_line(original.old_start, original.old_count);
            partial.old_start = start_for(first, partial.old_count);
            partial.new_start = start_for(first + delta, partial.new_count);
        }
        Direction::Reverse => {
            let first = first_line(original.new_start, original.new_count);
            partial.new_start = start_for(first, partial.new_count);
            partial.old_start = start_for(first - delta, partial.old_count);
        }
    }
    partial.heading = original.heading.clone();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::git::testing::{self, ScriptedExecutor};
    use crate::git::GitOutput;
    use crate::linemap::{LayoutOptions, LineMapBuilder};
    use similar_asserts::assert_eq;

    const MIXED: &str = "diff --git a/config.txt b/config.txt
index fa2da6e..41114ff 100644
--- a/config.txt
+++ b/config.txt
@@ -1,6 +1,7 @@ top
 one
-two
+TWO
+two and a half
 three
 four
-five
+FIVE
 six
";

    fn spec(text: &str) -> DiffSpec {
        DiffSpec::parse("/repo", text)
    }

    fn map(spec: &DiffSpec) -> LineMap {
        LineMapBuilder::new(LayoutOptions::default()).build(spec).map
    }

    #[test]
    fn single_add_row_forward() {
        let spec = spec(MIXED);
        let map = map(&spec);
        // rows: header, one, two/TWO, filler/two and a half, ...
        let patch = PatchBuilder::new(&spec)
            .patch(&map, &Selection::Row(3), Direction::Forward)
            .unwrap();
        insta::assert_snapshot!(patch.text, @r"
        diff --git a/config.txt b/config.txt
        index fa2da6e..41114ff 100644
        --- a/config.txt
        +++ b/config.txt
        @@ -1,6 +1,7 @@ top
         one
         two
        +two and a half
         three
         four
         five
         six
        ");
        assert_eq!(patch.changed, 1);
        assert!(!patch.unidiff_zero);
    }

    #[test]
    fn paired_row_selects_both_sides() {
        let spec = spec(MIXED);
        let map = map(&spec);
        let picks = PatchBuilder::new(&spec)
            .resolve(&map, &Selection::Row(2))
            .unwrap();
        assert_eq!(picks.count(), 2);
        assert_eq!(picks.hunks[&0], BTreeSet::from([1, 2]));
    }

    #[test]
    fn reverse_keeps_unpicked_additions() {
        let spec = spec(MIXED);
        let map = map(&spec);
        // row 6: five/FIVE
        let patch = PatchBuilder::new(&spec)
            .patch(&map, &Selection::Row(6), Direction::Reverse)
            .unwrap();
        insta::assert_snapshot!(patch.text, @r"
        diff --git a/config.txt b/config.txt
        index fa2da6e..41114ff 100644
        --- a/config.txt
        +++ b/config.txt
        @@ -1,7 +1,7 @@ top
         one
         TWO
         two and a half
         three
         four
        -five
        +FIVE
         six
        ");
    }

    #[test]
    fn later_hunk_new_start_shifts_by_earlier_delta() {
        let spec = spec(
            "diff --git a/a b/a
--- a/a
+++ b/a
@@ -2,0 +3,2 @@
+first
+second
@@ -8,0 +11 @@
+third
",
        );
        let builder = PatchBuilder::new(&spec);
        let mut picks = LinePicks::new(0);
        picks.insert(0, 1);
        picks.insert(1, 0);
        let patch = builder.build(&picks, Direction::Forward).unwrap();
        assert!(patch.text.contains("@@ -2,0 +3 @@\n+second\n"));
        assert!(patch.text.contains("@@ -8,0 +10 @@\n+third\n"));
        assert!(patch.unidiff_zero);

        let only_second = LinePicks {
            file_index: 0,
            hunks: BTreeMap::from([(1, BTreeSet::from([0]))]),
            whole_file: false,
        };
        let patch = builder.build(&only_second, Direction::Forward).unwrap();
        assert!(patch.text.contains("@@ -8,0 +9 @@\n+third\n"));
    }

    #[test]
    fn reverse_old_start_shifts_by_earlier_delta() {
        let spec = spec(
            "diff --git a/a b/a
--- a/a
+++ b/a
@@ -3 +2,0 @@
-gone
@@ -10 +9 @@
-old
+new
",
        );
        let picks = LinePicks {
            file_index: 0,
            hunks: BTreeMap::from([(1, BTreeSet::from([0, 1]))]),
            whole_file: false,
        };
        let patch = PatchBuilder::new(&spec)
            .build(&picks, Direction::Reverse)
            .unwrap();
        // without the first deletion the old image is one line shorter
        assert!(patch.text.contains("@@ -9 +9 @@\n-old\n+new\n"));
    }

    #[test]
    fn filler_and_context_rows_select_nothing() {
        let spec = spec(MIXED);
        let map = map(&spec);
        let builder = PatchBuilder::new(&spec);
        assert!(matches!(
            builder.patch(&map, &Selection::Row(1), Direction::Forward),
            Err(SelectionError::NothingToStage)
        ));
        assert!(matches!(
            builder.patch(&map, &Selection::Row(0), Direction::Forward),
            Err(SelectionError::NothingToStage)
        ));
        assert!(matches!(
            builder.patch(&map, &Selection::Row(99), Direction::Forward),
            Err(SelectionError::NothingToStage)
        ));
    }

    #[test]
    fn rows_across_files_are_rejected() {
        let text = format!(
            "{MIXED}diff --git a/b b/b\n--- a/b\n+++ b/b\n@@ -1 +1 @@\n-x\n+y\n"
        );
        let spec = spec(&text);
        let map = map(&spec);
        let last = map.len() - 1;
        assert!(matches!(
            PatchBuilder::new(&spec).resolve(&map, &Selection::Rows(7..=last)),
            Err(SelectionError::MultipleFiles)
        ));
    }

    #[test]
    fn no_newline_bridge_forward() {
        let spec = spec(
            "diff --git a/n b/n
--- a/n
+++ b/n
@@ -1,2 +1,3 @@
 keep
-last
\\ No newline at end of file
+last
+appended
\\ No newline at end of file
",
        );
        let picks = LinePicks {
            file_index: 0,
            hunks: BTreeMap::from([(0, BTreeSet::from([3]))]),
            whole_file: false,
        };
        let patch = PatchBuilder::new(&spec)
            .build(&picks, Direction::Forward)
            .unwrap();
        insta::assert_snapshot!(patch.text, @r"
        diff --git a/n b/n
        --- a/n
        +++ b/n
        @@ -1,2 +1,3 @@
         keep
        -last
        \ No newline at end of file
        +last
        +appended
        \ No newline at end of file
        ");
    }

    #[test]
    fn no_newline_kept_when_nothing_follows() {
        let spec = spec(
            "diff --git a/n b/n
--- a/n
+++ b/n
@@ -1,2 +1,2 @@
-first
+FIRST
 last
\\ No newline at end of file
",
        );
        let patch = PatchBuilder::new(&spec)
            .build(&LinePicks::file(0, &spec.files[0]), Direction::Forward)
            .unwrap();
        assert!(patch.text.ends_with(" last\n\\ No newline at end of file\n"));
    }

    #[test]
    fn partial_deletion_becomes_modification() {
        let spec = spec(
            "diff --git a/gone.txt b/gone.txt
deleted file mode 100644
index 3b18e51..0000000
--- a/gone.txt
+++ /dev/null
@@ -1,2 +0,0 @@
-hello
-world
",
        );
        let picks = LinePicks {
            file_index: 0,
            hunks: BTreeMap::from([(0, BTreeSet::from([0]))]),
            whole_file: false,
        };
        let patch = PatchBuilder::new(&spec)
            .build(&picks, Direction::Forward)
            .unwrap();
        assert_eq!(
            patch.text,
            "diff --git a/gone.txt b/gone.txt\n--- a/gone.txt\n+++ b/gone.txt\n@@ -1,2 +1 @@\n-hello\n world\n"
        );

        let whole = PatchBuilder::new(&spec)
            .build(&LinePicks::file(0, &spec.files[0]), Direction::Forward)
            .unwrap();
        assert!(whole.text.contains("deleted file mode 100644"));
        assert!(whole.text.contains("+++ /dev/null"));
    }

    #[test]
    fn partial_unstage_of_new_file_becomes_modification() {
        let spec = spec(
            "diff --git a/new.txt b/new.txt
new file mode 100644
index 0000000..3b18e51
--- /dev/null
+++ b/new.txt
@@ -0,0 +1,2 @@
+hello
+world
",
        );
        let picks = LinePicks {
            file_index: 0,
            hunks: BTreeMap::from([(0, BTreeSet::from([1]))]),
            whole_file: false,
        };
        let patch = PatchBuilder::new(&spec)
            .build(&picks, Direction::Reverse)
            .unwrap();
        assert_eq!(
            patch.text,
            "diff --git a/new.txt b/new.txt\n--- a/new.txt\n+++ b/new.txt\n@@ -1 +1,2 @@\n hello\n+world\n"
        );
    }

    #[test]
    fn header_only_change_stages_header() {
        let spec = spec(
            "diff --git a/run.sh b/run.sh\nold mode 100644\nnew mode 100755\n",
        );
        let builder = PatchBuilder::new(&spec);
        let map = map(&spec);
        let patch = builder
            .patch(&map, &Selection::File(0), Direction::Forward)
            .unwrap();
        assert_eq!(
            patch.text,
            "diff --git a/run.sh b/run.sh\nold mode 100644\nnew mode 100755\n"
        );
        assert!(matches!(
            builder.patch(&map, &Selection::Row(0), Direction::Forward),
            Err(SelectionError::NothingToStage)
        ));
    }

    #[test]
    fn binary_files_are_rejected() {
        let spec = spec(
            "diff --git a/logo.png b/logo.png\nindex 1..2 100644\nBinary files a/logo.png and b/logo.png differ\n",
        );
        let map = map(&spec);
        assert!(matches!(
            PatchBuilder::new(&spec).patch(&map, &Selection::File(0), Direction::Forward),
            Err(SelectionError::BinaryFile { .. })
        ));
    }

    #[test]
    fn hunk_selection_and_missing_hunk() {
        let spec = spec(MIXED);
        let map = map(&spec);
        let builder = PatchBuilder::new(&spec);
        let picks = builder
            .resolve(&map, &Selection::Hunk { file: 0, hunk: 0 })
            .unwrap();
        assert_eq!(picks.count(), 5);
        assert!(matches!(
            builder.resolve(&map, &Selection::Hunk { file: 0, hunk: 3 }),
            Err(SelectionError::NoSuchHunk { hunk: 3, .. })
        ));
        assert!(matches!(
            builder.resolve(&map, &Selection::File(4)),
            Err(SelectionError::NoSuchFile { index: 4 })
        ));
    }

    #[tokio::test]
    async fn stale_apply_is_a_conflict() {
        let executor = ScriptedExecutor::new(|_, _| GitOutput {
            stderr: "error: patch failed: a:1\nerror: a: patch does not apply\n".to_string(),
            exit_code: 1,
            ..GitOutput::default()
        });
        let repo = testing::repo(executor.clone());
        let spec = spec(MIXED);
        let patch = PatchBuilder::new(&spec)
            .build(&LinePicks::file(0, &spec.files[0]), Direction::Forward)
            .unwrap();

        let result = patch.apply(&repo, Operation::Stage).await;
        assert!(matches!(result, Err(PatchError::ApplyConflict { .. })));
        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].0,
            vec!["apply", "--whitespace=nowarn", "--cached", "-"]
        );
        assert_eq!(calls[0].1.as_deref(), Some(patch.text.as_str()));
    }

    #[tokio::test]
    async fn other_failures_keep_stderr() {
        let executor = ScriptedExecutor::new(|_, _| GitOutput {
            stderr: "fatal: not a git repository\n".to_string(),
            exit_code: 128,
            ..GitOutput::default()
        });
        let repo = testing::repo(executor);
        let spec = spec(MIXED);
        let patch = PatchBuilder::new(&spec)
            .build(&LinePicks::file(0, &spec.files[0]), Direction::Reverse)
            .unwrap();

        match patch.apply(&repo, Operation::Discard).await {
            Err(PatchError::ProcessError(ProcessError::ExitError { stderr, .. })) => {
                assert_eq!(stderr, "fatal: not a git repository\n");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn operation_args() {
        assert_eq!(
            Operation::Unstage.apply_args(true),
            vec!["apply", "--whitespace=nowarn", "--cached", "--reverse", "--unidiff-zero", "-"]
        );
        assert_eq!(
            Operation::Discard.apply_args(false),
            vec!["apply", "--whitespace=nowarn", "--reverse", "-"]
        );
    }
}
