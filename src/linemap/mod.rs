//! Side-by-side layout of a [`DiffSpec`].
//!
//! [`LineMapBuilder`] turns the parsed diff into aligned left/right rows and
//! a [`LineMap`] with one [`LineMapEntry`] per buffer row. Deletions and
//! additions within a block of changes are paired row by row; whichever side
//! runs out first is padded with filler rows that carry no content.

pub mod buffer;

use crate::diff::{DiffSpec, FilePair, Hunk, LineKind};

pub use buffer::{Backing, Buffer, BufferId, BufferPair, BufferTriple, EditError, Row, Side};

/// Text shown in place of an empty diff. Not addressable through the map.
pub const NO_CHANGES: &str = "(no changes)";

/// What occupies one side of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowType {
    Context,
    Add,
    Delete,
    /// Padding opposite an unpaired change
    Filler,
    /// File header or placeholder decoration
    Header,
}

impl RowType {
    /// Rows that hold file content
    pub fn is_real(self) -> bool {
        !matches!(self, RowType::Filler | RowType::Header)
    }

    pub fn is_change(self) -> bool {
        matches!(self, RowType::Add | RowType::Delete)
    }
}

impl From<LineKind> for RowType {
    fn from(kind: LineKind) -> Self {
        match kind {
            LineKind::Context => RowType::Context,
            LineKind::Add => RowType::Add,
            LineKind::Delete => RowType::Delete,
        }
    }
}

/// Where one buffer row comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMapEntry {
    pub buffer_row: usize,
    pub file_index: usize,
    pub hunk_index: Option<usize>,
    pub left_type: RowType,
    pub right_type: RowType,
    /// Index into the hunk's lines
    pub left_line: Option<usize>,
    pub right_line: Option<usize>,
    pub is_hunk_boundary: bool,
}

impl LineMapEntry {
    /// Indices of the changed hunk lines on this row
    pub fn changed_lines(&self) -> impl Iterator<Item = usize> {
        let left = self.left_line.filter(|_| self.left_type.is_change());
        let right = self.right_line.filter(|_| self.right_type.is_change());
        left.into_iter().chain(right)
    }
}

/// Row-indexed lookup from buffer rows to diff positions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMap {
    entries: Vec<LineMapEntry>,
    file_starts: Vec<usize>,
}

impl LineMap {
    pub fn get(&self, row: usize) -> Option<&LineMapEntry> {
        self.entries.get(row)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LineMapEntry] {
        &self.entries
    }

    /// First row of each file, in file order
    pub fn file_starts(&self) -> &[usize] {
        &self.file_starts
    }

    /// Rows belonging to `file_index`
    pub fn file_rows(&self, file_index: usize) -> std::ops::Range<usize> {
        let start = self.file_starts.get(file_index).copied().unwrap_or(self.len());
        let end = self
            .file_starts
            .get(file_index + 1)
            .copied()
            .unwrap_or(self.len());
        start..end
    }

    /// Next hunk start after `row`; `None` past the last hunk
    pub fn next_hunk(&self, row: usize) -> Option<usize> {
        self.entries
            .iter()
            .skip(row.saturating_add(1))
            .find(|entry| entry.is_hunk_boundary)
            .map(|entry| entry.buffer_row)
    }

    /// Previous hunk start before `row`; `None` before the first hunk
    pub fn prev_hunk(&self, row: usize) -> Option<usize> {
        self.entries
            .iter()
            .take(row.min(self.len()))
            .rev()
            .find(|entry| entry.is_hunk_boundary)
            .map(|entry| entry.buffer_row)
    }

    /// First row of the next file, wrapping to the first file
    pub fn next_file(&self, row: usize) -> Option<usize> {
        let count = self.file_starts.len();
        if count == 0 {
            return None;
        }
        let next = match self.get(row) {
            Some(entry) => (entry.file_index + 1) % count,
            None => 0,
        };
        Some(self.file_starts[next])
    }

    /// First row of the previous file, wrapping to the last file
    pub fn prev_file(&self, row: usize) -> Option<usize> {
        let count = self.file_starts.len();
        if count == 0 {
            return None;
        }
        let prev = match self.get(row) {
            Some(entry) => (entry.file_index + count - 1) % count,
            None => count - 1,
        };
        Some(self.file_starts[prev])
    }
}

/// Layout options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutOptions {
    /// Emit one header row per file
    pub file_headers: bool,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self { file_headers: true }
    }
}

/// Output of one layout pass: the map plus the text of both sides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendered {
    pub map: LineMap,
    pub left: Vec<Row>,
    pub right: Vec<Row>,
}

/// Lays out a [`DiffSpec`] as aligned rows
#[derive(Debug, Clone, Default)]
pub struct LineMapBuilder {
    options: LayoutOptions,
    rendered: Rendered,
}

impl LineMapBuilder {
    pub fn new(options: LayoutOptions) -> Self {
        Self {
            options,
            rendered: Rendered::default(),
        }
    }

    pub fn build(mut self, spec: &DiffSpec) -> Rendered {
        if spec.is_empty() {
            let placeholder = Row::new(NO_CHANGES, RowType::Header, None);
            self.rendered.left.push(placeholder.clone());
            self.rendered.right.push(placeholder);
            return self.rendered;
        }

        for (file_index, file) in spec.files.iter().enumerate() {
            self.rendered.map.file_starts.push(self.rendered.left.len());
            self.file(file_index, file);
        }
        self.rendered
    }

    fn file(&mut self, file_index: usize, file: &FilePair) {
        if self.options.file_headers || file.hunks.is_empty() {
            let (left, right) = header_text(file);
            self.push(
                file_index,
                None,
                (RowType::Header, Row::new(left, RowType::Header, Some(file_index))),
                (RowType::Header, Row::new(right, RowType::Header, Some(file_index))),
                (None, None),
            );
        }

        for (hunk_index, hunk) in file.hunks.iter().enumerate() {
            let first_row = self.rendered.left.len();
            self.hunk(file_index, hunk_index, hunk);
            if let Some(entry) = self.rendered.map.entries.get_mut(first_row) {
                entry.is_hunk_boundary = true;
            }
        }
    }

    fn hunk(&mut self, file_index: usize, hunk_index: usize, hunk: &Hunk) {
        let row = |kind: RowType, text: &str| Row::new(text, kind, Some(file_index));
        let filler = || (RowType::Filler, Row::new("", RowType::Filler, Some(file_index)));

        let mut i = 0;
        while i < hunk.lines.len() {
            let line = &hunk.lines[i];
            if line.kind == LineKind::Context {
                let kind = RowType::from(line.kind);
                self.push(
                    file_index,
                    Some(hunk_index),
                    (kind, row(kind, &line.text)),
                    (kind, row(kind, &line.text)),
                    (Some(i), Some(i)),
                );
                i += 1;
                continue;
            }

            // a block of consecutive changes
            let mut deletes = Vec::new();
            let mut adds = Vec::new();
            while let Some(line) = hunk.lines.get(i)
                && line.kind != LineKind::Context
            {
                match line.kind {
                    LineKind::Delete => deletes.push(i),
                    _ => adds.push(i),
                }
                i += 1;
            }

            for k in 0..deletes.len().max(adds.len()) {
                let left = deletes.get(k).copied();
                let right = adds.get(k).copied();
                let left_cell = match left {
                    Some(index) => (RowType::Delete, row(RowType::Delete, &hunk.lines[index].text)),
                    None => filler(),
                };
                let right_cell = match right {
                    Some(index) => (RowType::Add, row(RowType::Add, &hunk.lines[index].text)),
                    None => filler(),
                };
                self.push(file_index, Some(hunk_index), left_cell, right_cell, (left, right));
            }
        }
    }

    fn push(
        &mut self,
        file_index: usize,
        hunk_index: Option<usize>,
        (left_type, left_row): (RowType, Row),
        (right_type, right_row): (RowType, Row),
        (left_line, right_line): (Option<usize>, Option<usize>),
    ) {
        let buffer_row = self.rendered.left.len();
        self.rendered.map.entries.push(LineMapEntry {
            buffer_row,
            file_index,
            hunk_index,
            left_type,
            right_type,
            left_line,
            right_line,
            is_hunk_boundary: false,
        });
        self.rendered.left.push(left_row);
        self.rendered.right.push(right_row);
    }
}

fn header_text(file: &FilePair) -> (String, String) {
    let label = file.status.label();
    let left = format!("{label}: {}", file.old_path);
    let mut right = format!("{label}: {}", file.new_path);
    if file.binary {
        right.push_str(" (binary)");
    } else if let (Some(old), Some(new)) = (&file.old_mode, &file.new_mode)
        && old != new
    {
        right.push_str(&format!(" ({old} -> {new})"));
    }
    (left, right)
}
