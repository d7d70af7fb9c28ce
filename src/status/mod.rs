//! The status tree: sections of changed paths, expandable into hunks.
//!
//! A [`StatusTree`] is rebuilt wholesale from every [`StatusSnapshot`].
//! Entries are identified by [`EntryKey`] (section plus path), so the
//! cursor, expanded entries and folded sections survive a refresh even
//! when paths come and go around them.

pub mod machine;
pub mod porcelain;
mod snapshot;

pub use machine::{Generation, RefreshEffect, RefreshEvent, RefreshMachine, RefreshState};
pub use porcelain::{BranchInfo, PorcelainError};
pub use snapshot::{Commit, EntryKey, InProgress, Section, StatusEntry, StatusSnapshot};

use crate::diff::FilePair;
use crate::git::ProcessError;
use error_set::error_set;
use std::collections::HashSet;

error_set! {
    /// Errors from reading repository status
    StatusError := {
        PorcelainError(PorcelainError),
        ProcessError(ProcessError),
    }
}

/// What a tree row shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowKind {
    /// Branch, upstream and operation lines at the top
    Info,
    SectionHeader(Section),
    Entry(EntryKey),
    /// Binary or header-only detail of an expanded entry
    Detail(EntryKey),
    HunkHeader { key: EntryKey, hunk: usize },
    HunkLine { key: EntryKey, hunk: usize, line: usize },
    Commit(usize),
}

impl RowKind {
    /// The entry this row belongs to, if any
    pub fn owner(&self) -> Option<&EntryKey> {
        match self {
            RowKind::Entry(key)
            | RowKind::Detail(key)
            | RowKind::HunkHeader { key, .. }
            | RowKind::HunkLine { key, .. } => Some(key),
            RowKind::Info | RowKind::SectionHeader(_) | RowKind::Commit(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeRow {
    pub kind: RowKind,
    pub section: Option<Section>,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct StatusTree {
    snapshot: StatusSnapshot,
    rows: Vec<TreeRow>,
    expanded: HashSet<EntryKey>,
    folded: HashSet<Section>,
    cursor: usize,
}

impl StatusTree {
    pub fn new(snapshot: StatusSnapshot) -> Self {
        let mut tree = Self {
            snapshot,
            ..Self::default()
        };
        tree.rows = tree.layout();
        tree
    }

    pub fn snapshot(&self) -> &StatusSnapshot {
        &self.snapshot
    }

    pub fn rows(&self) -> &[TreeRow] {
        &self.rows
    }

    pub fn row(&self, row: usize) -> Option<&TreeRow> {
        self.rows.get(row)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, row: usize) {
        self.cursor = row.min(self.rows.len().saturating_sub(1));
    }

    pub fn entry(&self, key: &EntryKey) -> Option<&StatusEntry> {
        self.snapshot.entry(key)
    }

    /// The entry owning `row`
    pub fn entry_at(&self, row: usize) -> Option<&StatusEntry> {
        let key = self.rows.get(row)?.kind.owner()?;
        self.snapshot.entry(key)
    }

    /// Row of an entry's own line
    pub fn entry_row(&self, key: &EntryKey) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| matches!(&row.kind, RowKind::Entry(k) if k == key))
    }

    pub fn section_row(&self, section: Section) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.kind == RowKind::SectionHeader(section))
    }

    pub fn is_expanded(&self, key: &EntryKey) -> bool {
        self.expanded.contains(key)
    }

    pub fn expanded(&self) -> impl Iterator<Item = &EntryKey> {
        self.expanded.iter()
    }

    pub fn is_folded(&self, section: Section) -> bool {
        self.folded.contains(&section)
    }

    /// Attach hunks to an entry and show them.
    pub fn expand(&mut self, key: &EntryKey, diff: FilePair) {
        let Some(entry) = self.snapshot.entry_mut(key) else {
            return;
        };
        entry.diff = Some(diff);
        self.expanded.insert(key.clone());
        self.relayout_keeping(key);
    }

    pub fn collapse(&mut self, key: &EntryKey) {
        if self.expanded.remove(key) {
            self.relayout_keeping(key);
        }
    }

    pub fn toggle_fold(&mut self, section: Section) {
        if !self.folded.remove(&section) {
            self.folded.insert(section);
        }
        self.rows = self.layout();
        if let Some(row) = self.section_row(section) {
            self.cursor = row;
        } else {
            self.set_cursor(self.cursor);
        }
    }

    /// Replace the snapshot, carrying cursor, expansion and folding over.
    ///
    /// The cursor lands on the same entry (at the same offset inside it
    /// when that row still exists), else on the nearest earlier entry that
    /// survived, else on its section header, else on the first row.
    /// Expanded entries that vanished are forgotten.
    pub fn rebuild(&mut self, snapshot: StatusSnapshot) {
        let prior_rows = std::mem::take(&mut self.rows);
        let prior_cursor = self.cursor;

        self.snapshot = snapshot;
        let snapshot = &self.snapshot;
        self.expanded.retain(|key| snapshot.entry(key).is_some());
        self.rows = self.layout();
        self.cursor = self.restore_cursor(&prior_rows, prior_cursor);

        tracing::debug!(
            rows = self.rows.len(),
            expanded = self.expanded.len(),
            cursor = self.cursor,
            "rebuilt status tree"
        );
    }

    fn restore_cursor(&self, prior_rows: &[TreeRow], prior_cursor: usize) -> usize {
        let Some(prior) = prior_rows.get(prior_cursor) else {
            return 0;
        };

        let Some(key) = prior.kind.owner() else {
            // header, info or commit rows: same row if it is still there
            return self
                .rows
                .iter()
                .position(|row| row.kind == prior.kind && row.text == prior.text)
                .or_else(|| prior.section.and_then(|section| self.section_row(section)))
                .unwrap_or(0);
        };

        if let Some(row) = self.entry_row(key) {
            let prior_start = prior_rows[..=prior_cursor]
                .iter()
                .rposition(|row| matches!(&row.kind, RowKind::Entry(k) if k == key))
                .unwrap_or(prior_cursor);
            let offset = prior_cursor - prior_start;
            let target = row + offset;
            let same_owner = self
                .rows
                .get(target)
                .is_some_and(|candidate| candidate.kind.owner() == Some(key));
            return if same_owner { target } else { row };
        }

        prior_rows[..prior_cursor]
            .iter()
            .rev()
            .filter_map(|row| match &row.kind {
                RowKind::Entry(key) => self.entry_row(key),
                _ => None,
            })
            .next()
            .or_else(|| self.section_row(key.section))
            .unwrap_or(0)
    }

    fn relayout_keeping(&mut self, key: &EntryKey) {
        self.rows = self.layout();
        match self.entry_row(key) {
            Some(row) => self.cursor = row,
            None => self.set_cursor(self.cursor),
        }
    }

    fn layout(&self) -> Vec<TreeRow> {
        let mut rows = Vec::new();
        self.info_rows(&mut rows);

        for section in Section::ALL {
            if section == Section::RecentCommits {
                self.commit_rows(&mut rows);
                continue;
            }

            let entries: Vec<&StatusEntry> = self.snapshot.section(section).collect();
            if entries.is_empty() {
                continue;
            }
            rows.push(TreeRow {
                kind: RowKind::SectionHeader(section),
                section: Some(section),
                text: format!("{} ({})", section.title(), entries.len()),
            });
            if self.is_folded(section) {
                continue;
            }
            for entry in entries {
                self.entry_rows(entry, &mut rows);
            }
        }
        rows
    }

    fn info_rows(&self, rows: &mut Vec<TreeRow>) {
        let branch = &self.snapshot.branch;
        let mut push = |text: String| {
            rows.push(TreeRow {
                kind: RowKind::Info,
                section: None,
                text,
            })
        };

        let head = branch.head.as_deref().unwrap_or("(detached)");
        match self.snapshot.commits.first() {
            Some(commit) => push(format!("Head:     {head} {} {}", commit.hash, commit.subject)),
            None if branch.is_unborn() => push(format!("Head:     {head} (no commits yet)")),
            None => push(format!("Head:     {head}")),
        }

        if let Some(upstream) = &branch.upstream {
            let mut text = format!("Upstream: {upstream}");
            if branch.ahead > 0 || branch.behind > 0 {
                text.push_str(&format!(" [ahead {}, behind {}]", branch.ahead, branch.behind));
            }
            push(text);
        }
        if let Some(operation) = self.snapshot.operation {
            push(format!("In progress: {operation}"));
        }
    }

    fn entry_rows(&self, entry: &StatusEntry, rows: &mut Vec<TreeRow>) {
        let key = entry.key();
        let section = Some(entry.section);
        let path = match &entry.orig_path {
            Some(orig) => format!("{orig} -> {}", entry.path),
            None => entry.path.clone(),
        };
        let text = match entry.section {
            Section::Untracked => path,
            _ => format!("{:<15} {path}", entry.label()),
        };
        rows.push(TreeRow {
            kind: RowKind::Entry(key.clone()),
            section,
            text,
        });

        if !self.is_expanded(&key) {
            return;
        }
        let Some(diff) = &entry.diff else {
            return;
        };

        if diff.binary {
            rows.push(TreeRow {
                kind: RowKind::Detail(key.clone()),
                section,
                text: "(binary)".to_string(),
            });
        } else if diff.hunks.is_empty() && diff.has_meta_change() {
            let detail = match (&diff.old_mode, &diff.new_mode) {
                (Some(old), Some(new)) if old != new => format!("(mode {old} -> {new})"),
                _ => format!("({})", diff.status.label()),
            };
            rows.push(TreeRow {
                kind: RowKind::Detail(key.clone()),
                section,
                text: detail,
            });
        }

        for (hunk_index, hunk) in diff.hunks.iter().enumerate() {
            rows.push(TreeRow {
                kind: RowKind::HunkHeader {
                    key: key.clone(),
                    hunk: hunk_index,
                },
                section,
                text: hunk.header_line(),
            });
            for (line_index, line) in hunk.lines.iter().enumerate() {
                rows.push(TreeRow {
                    kind: RowKind::HunkLine {
                        key: key.clone(),
                        hunk: hunk_index,
                        line: line_index,
                    },
                    section,
                    text: format!("{}{}", line.kind.prefix(), line.text),
                });
            }
        }
    }

    fn commit_rows(&self, rows: &mut Vec<TreeRow>) {
        if self.snapshot.commits.is_empty() {
            return;
        }
        let section = Some(Section::RecentCommits);
        rows.push(TreeRow {
            kind: RowKind::SectionHeader(Section::RecentCommits),
            section,
            text: Section::RecentCommits.title().to_string(),
        });
        if self.is_folded(Section::RecentCommits) {
            return;
        }
        for (index, commit) in self.snapshot.commits.iter().enumerate() {
            rows.push(TreeRow {
                kind: RowKind::Commit(index),
                section,
                text: format!("{} {}", commit.hash, commit.subject),
            });
        }
    }
}

impl std::fmt::Display for StatusTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for row in &self.rows {
            writeln!(f, "{}", row.text)?;
        }
        Ok(())
    }
}
