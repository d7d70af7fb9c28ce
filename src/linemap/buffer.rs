//! Text surfaces a UI renders and edits.

use super::{Rendered, RowType};
use crate::diff::{FilePair, LineKind};
use error_set::error_set;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

error_set! {
    /// Invalid edits to a buffer
    EditError := {
        #[display("Rows {start}..{end} are outside the buffer ({len} rows)")]
        OutOfRange { start: usize, end: usize, len: usize },
        #[display("Row {row} is a header and cannot be edited")]
        HeaderRow { row: usize },
        #[display("Edit spans more than one file")]
        MultipleFiles,
        #[display("Buffer is backed by a read-only blob ({revision})")]
        ReadOnly { revision: String },
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Stable handle a UI keeps across refreshes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn fresh() -> Self {
        BufferId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Where a buffer's content lives, and so where edits are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backing {
    /// A committed or stage blob such as `HEAD` or `:2`; read-only
    Blob { revision: String },
    Index,
    Worktree,
}

/// One buffer row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub text: String,
    pub kind: RowType,
    pub file_index: Option<usize>,
}

impl Row {
    pub fn new(text: impl Into<String>, kind: RowType, file_index: Option<usize>) -> Self {
        Self {
            text: text.into(),
            kind,
            file_index,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Buffer {
    id: BufferId,
    backing: Backing,
    rows: Vec<Row>,
    version: u64,
}

impl Buffer {
    pub fn new(backing: Backing) -> Self {
        Self {
            id: BufferId::fresh(),
            backing,
            rows: Vec::new(),
            version: 0,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Bumped on every content change
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Replace the whole content, keeping the id.
    pub fn replace(&mut self, rows: Vec<Row>) {
        self.rows = rows;
        self.version += 1;
    }

    /// Replace `range` with `lines`. Replacement rows are real content of the
    /// file the range belongs to.
    pub fn edit(&mut self, range: Range<usize>, lines: Vec<String>) -> Result<(), EditError> {
        if let Backing::Blob { revision } = &self.backing {
            return Err(EditError::ReadOnly {
                revision: revision.clone(),
            });
        }
        if range.start > range.end || range.end > self.rows.len() {
            return Err(EditError::OutOfRange {
                start: range.start,
                end: range.end,
                len: self.rows.len(),
            });
        }
        if let Some(offset) = self.rows[range.clone()]
            .iter()
            .position(|row| row.kind == RowType::Header)
        {
            return Err(EditError::HeaderRow {
                row: range.start + offset,
            });
        }

        let mut files = self.rows[range.clone()].iter().map(|row| row.file_index);
        let file_index = match files.next() {
            Some(first) => {
                if files.any(|other| other != first) {
                    return Err(EditError::MultipleFiles);
                }
                first
            }
            // pure insertion belongs to the row it lands before, or after
            None => self
                .rows
                .get(range.start)
                .or_else(|| range.start.checked_sub(1).and_then(|i| self.rows.get(i)))
                .and_then(|row| row.file_index),
        };

        let replacement = lines
            .into_iter()
            .map(|text| Row::new(text, RowType::Context, file_index));
        self.rows.splice(range, replacement);
        self.version += 1;
        Ok(())
    }

    /// Content rows only, with filler and header rows stripped
    pub fn get_real_lines(&self, file_index: Option<usize>) -> Vec<&str> {
        self.rows
            .iter()
            .filter(|row| row.kind.is_real())
            .filter(|row| file_index.is_none() || row.file_index == file_index)
            .map(|row| row.text.as_str())
            .collect()
    }
}

/// Which buffer of a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

/// Old and new images shown side by side
#[derive(Debug, Clone)]
pub struct BufferPair {
    pub left: Buffer,
    pub right: Buffer,
}

impl BufferPair {
    pub fn new(left: Backing, right: Backing) -> Self {
        Self {
            left: Buffer::new(left),
            right: Buffer::new(right),
        }
    }

    /// Swap in freshly laid out content without recreating the buffers
    pub fn render(&mut self, rendered: &Rendered) {
        self.left.replace(rendered.left.clone());
        self.right.replace(rendered.right.clone());
    }

    pub fn side(&self, side: Side) -> &Buffer {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut Buffer {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    pub fn get_real_lines(&self, side: Side, file_index: Option<usize>) -> Vec<&str> {
        self.side(side).get_real_lines(file_index)
    }
}

/// Ours, worktree and theirs of a conflicted file, aligned on worktree lines
#[derive(Debug, Clone)]
pub struct BufferTriple {
    pub ours: Buffer,
    pub worktree: Buffer,
    pub theirs: Buffer,
}

/// How one side of a conflict diff relates to the worktree
#[derive(Default)]
struct SideLayout {
    /// Deleted lines keyed by the worktree line they precede
    deleted_before: BTreeMap<u32, Vec<String>>,
    /// Worktree lines this side adds
    added: BTreeMap<u32, String>,
    context: BTreeMap<u32, String>,
}

impl SideLayout {
    fn from_diff(file: &FilePair) -> Self {
        let mut layout = SideLayout::default();
        for hunk in &file.hunks {
            // an empty new side starts after line `new_start`
            let mut next_new = if hunk.new_count == 0 {
                hunk.new_start + 1
            } else {
                hunk.new_start
            };
            for line in &hunk.lines {
                match line.kind {
                    LineKind::Delete => layout
                        .deleted_before
                        .entry(next_new)
                        .or_default()
                        .push(line.text.clone()),
                    LineKind::Add | LineKind::Context => {
                        let number = line.new_lineno.unwrap_or(next_new);
                        let target = if line.kind == LineKind::Add {
                            &mut layout.added
                        } else {
                            &mut layout.context
                        };
                        target.insert(number, line.text.clone());
                        next_new = number + 1;
                    }
                }
            }
        }
        layout
    }

    fn worktree_line(&self, number: u32) -> Option<&String> {
        self.added.get(&number).or_else(|| self.context.get(&number))
    }

    fn last_line(&self) -> u32 {
        let added = self.added.keys().next_back().copied().unwrap_or(0);
        let context = self.context.keys().next_back().copied().unwrap_or(0);
        added.max(context)
    }
}

impl BufferTriple {
    /// Align `git diff --ours` and `git diff --theirs` for one file. Both
    /// diffs end at the worktree, so worktree line numbers key the rows.
    pub fn conflict(ours: &FilePair, theirs: &FilePair) -> Self {
        let ours_side = SideLayout::from_diff(ours);
        let theirs_side = SideLayout::from_diff(theirs);
        let last = ours_side.last_line().max(theirs_side.last_line());

        let mut ours_rows = Vec::new();
        let mut worktree_rows = Vec::new();
        let mut theirs_rows = Vec::new();
        let filler = || Row::new("", RowType::Filler, Some(0));

        for number in 1..=last + 1 {
            let ours_deleted = ours_side.deleted_before.get(&number);
            let theirs_deleted = theirs_side.deleted_before.get(&number);
            let removed = ours_deleted
                .map_or(0, Vec::len)
                .max(theirs_deleted.map_or(0, Vec::len));
            for k in 0..removed {
                let cell = |deleted: Option<&Vec<String>>| match deleted.and_then(|d| d.get(k)) {
                    Some(text) => Row::new(text.clone(), RowType::Delete, Some(0)),
                    None => filler(),
                };
                ours_rows.push(cell(ours_deleted));
                worktree_rows.push(filler());
                theirs_rows.push(cell(theirs_deleted));
            }

            let Some(text) = ours_side
                .worktree_line(number)
                .or_else(|| theirs_side.worktree_line(number))
            else {
                continue;
            };

            // a side with no hunks matches the worktree exactly
            let kept = |side: &SideLayout, file: &FilePair| {
                file.hunks.is_empty() || side.context.contains_key(&number)
            };
            let in_ours = kept(&ours_side, ours);
            let in_theirs = kept(&theirs_side, theirs);
            let side_row = |present: bool| {
                if present {
                    Row::new(text.clone(), RowType::Context, Some(0))
                } else {
                    filler()
                }
            };
            ours_rows.push(side_row(in_ours));
            theirs_rows.push(side_row(in_theirs));
            let kind = if in_ours && in_theirs {
                RowType::Context
            } else {
                RowType::Add
            };
            worktree_rows.push(Row::new(text.clone(), kind, Some(0)));
        }

        let path = ours.path();
        tracing::debug!(path, rows = worktree_rows.len(), "aligned conflict sides");

        let mut triple = Self {
            ours: Buffer::new(Backing::Blob {
                revision: format!(":2:{path}"),
            }),
            worktree: Buffer::new(Backing::Worktree),
            theirs: Buffer::new(Backing::Blob {
                revision: format!(":3:{path}"),
            }),
        };
        triple.ours.replace(ours_rows);
        triple.worktree.replace(worktree_rows);
        triple.theirs.replace(theirs_rows);
        triple
    }

    pub fn get_real_lines(&self) -> Vec<&str> {
        self.worktree.get_real_lines(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::diff::DiffSpec;
    use crate::linemap::{LayoutOptions, LineMapBuilder};
    use similar_asserts::assert_eq;

    const DIFF: &str = "diff --git a/a.txt b/a.txt
index 1..2 100644
--- a/a.txt
+++ b/a.txt
@@ -1,3 +1,3 @@
 one
-two
+TWO
+extra
 three
";

    fn pair() -> BufferPair {
        let spec = DiffSpec::parse("/repo", DIFF);
        let rendered = LineMapBuilder::new(LayoutOptions::default()).build(&spec);
        let mut pair = BufferPair::new(Backing::Index, Backing::Worktree);
        pair.render(&rendered);
        pair
    }

    #[test]
    fn real_lines_strip_filler_and_headers() {
        let pair = pair();
        assert_eq!(pair.get_real_lines(Side::Left, None), vec!["one", "two", "three"]);
        assert_eq!(
            pair.get_real_lines(Side::Right, Some(0)),
            vec!["one", "TWO", "extra", "three"]
        );
    }

    #[test]
    fn render_keeps_ids() {
        let mut pair = pair();
        let (left, right) = (pair.left.id(), pair.right.id());
        let spec = DiffSpec::parse("/repo", "");
        pair.render(&LineMapBuilder::new(LayoutOptions::default()).build(&spec));
        assert_eq!((pair.left.id(), pair.right.id()), (left, right));
        assert_ne!(left, right);
        assert_eq!(pair.left.version(), 2);
    }

    #[test]
    fn edit_replaces_rows_with_real_content() {
        let mut pair = pair();
        // rows: header, one, two/TWO, filler/extra, three
        pair.left.edit(3..4, vec!["inserted".to_string()]).unwrap();
        assert_eq!(
            pair.get_real_lines(Side::Left, Some(0)),
            vec!["one", "two", "inserted", "three"]
        );

        pair.right.edit(5..5, vec!["four".to_string()]).unwrap();
        assert_eq!(pair.right.rows()[5].file_index, Some(0));
        assert_eq!(pair.right.get_real_lines(None).last(), Some(&"four"));
    }

    #[test]
    fn edit_rejects_headers_ranges_and_blobs() {
        let mut pair = pair();
        assert!(matches!(
            pair.right.edit(0..2, vec![]),
            Err(EditError::HeaderRow { row: 0 })
        ));
        assert!(matches!(
            pair.right.edit(4..9, vec![]),
            Err(EditError::OutOfRange { len: 5, .. })
        ));

        let mut blob = Buffer::new(Backing::Blob {
            revision: "HEAD".to_string(),
        });
        assert!(matches!(
            blob.edit(0..0, vec!["x".to_string()]),
            Err(EditError::ReadOnly { .. })
        ));
    }

    #[test]
    fn conflict_sides_align_on_worktree_lines() {
        let ours = DiffSpec::parse(
            "/repo",
            "diff --git a/c.txt b/c.txt
--- a/c.txt
+++ b/c.txt
@@ -1,3 +1,7 @@
 top
+<<<<<<< ours
 mine
+=======
+theirs
+>>>>>>> theirs
 bottom
",
        );
        let theirs = DiffSpec::parse(
            "/repo",
            "diff --git a/c.txt b/c.txt
--- a/c.txt
+++ b/c.txt
@@ -1,3 +1,7 @@
 top
+<<<<<<< ours
+mine
+=======
 theirs
+>>>>>>> theirs
 bottom
",
        );
        let triple = BufferTriple::conflict(&ours.files[0], &theirs.files[0]);

        assert_eq!(
            triple.get_real_lines(),
            vec!["top", "<<<<<<< ours", "mine", "=======", "theirs", ">>>>>>> theirs", "bottom"]
        );
        assert_eq!(triple.ours.get_real_lines(None), vec!["top", "mine", "bottom"]);
        assert_eq!(triple.theirs.get_real_lines(None), vec!["top", "theirs", "bottom"]);
        assert_eq!(triple.ours.rows().len(), triple.theirs.rows().len());
        assert_eq!(triple.worktree.rows()[0].kind, RowType::Context);
        assert_eq!(triple.worktree.rows()[1].kind, RowType::Add);
        assert_eq!(
            triple.ours.backing(),
            &Backing::Blob {
                revision: ":2:c.txt".to_string()
            }
        );
    }

    #[test]
    fn conflict_keeps_deleted_lines_on_their_side() {
        let ours = DiffSpec::parse(
            "/repo",
            "diff --git a/d b/d\n--- a/d\n+++ b/d\n@@ -1,3 +1,2 @@\n a\n-gone\n b\n",
        );
        // their side is identical to the worktree
        let theirs = FilePair::untracked("d", b"", false);
        let triple = BufferTriple::conflict(&ours.files[0], &theirs);

        let ours_text: Vec<&str> = triple.ours.rows().iter().map(|r| r.text.as_str()).collect();
        assert_eq!(ours_text, vec!["a", "gone", "b"]);
        assert_eq!(triple.worktree.rows()[1].kind, RowType::Filler);
        assert_eq!(triple.get_real_lines(), vec!["a", "b"]);
    }
}
