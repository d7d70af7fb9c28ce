use super::StatusError;
use super::porcelain::{self, BranchInfo, Record, RecordKind};
use crate::diff::FilePair;
use crate::git::{GitExecutor, RepoState, git_args};
use std::fmt;
use std::path::Path;

/// Status sections, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    Untracked,
    Unstaged,
    Staged,
    Conflicted,
    RecentCommits,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::Untracked,
        Section::Unstaged,
        Section::Staged,
        Section::Conflicted,
        Section::RecentCommits,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Section::Untracked => "Untracked files",
            Section::Unstaged => "Unstaged changes",
            Section::Staged => "Staged changes",
            Section::Conflicted => "Unmerged changes",
            Section::RecentCommits => "Recent commits",
        }
    }
}

/// A multi-step operation git has left unfinished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InProgress {
    Merge,
    Rebase,
    CherryPick,
    Revert,
    Bisect,
}

impl fmt::Display for InProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InProgress::Merge => "merge",
            InProgress::Rebase => "rebase",
            InProgress::CherryPick => "cherry-pick",
            InProgress::Revert => "revert",
            InProgress::Bisect => "bisect",
        })
    }
}

/// Marker paths inside the git dir, checked in order
const MARKERS: [(&str, InProgress); 6] = [
    ("rebase-merge", InProgress::Rebase),
    ("rebase-apply", InProgress::Rebase),
    ("MERGE_HEAD", InProgress::Merge),
    ("CHERRY_PICK_HEAD", InProgress::CherryPick),
    ("REVERT_HEAD", InProgress::Revert),
    ("BISECT_LOG", InProgress::Bisect),
];

/// Identity of an entry across refreshes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub section: Section,
    pub path: String,
}

/// One path in one section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    /// Source path of a rename or copy
    pub orig_path: Option<String>,
    /// Two-letter porcelain code, `XY`
    pub code: [char; 2],
    pub section: Section,
    /// Hunks, present once the entry has been expanded
    pub diff: Option<FilePair>,
    /// Worktree mode as reported by git
    pub mode: Option<String>,
}

impl StatusEntry {
    pub fn key(&self) -> EntryKey {
        EntryKey {
            section: self.section,
            path: self.path.clone(),
        }
    }

    /// Status word shown before the path
    pub fn label(&self) -> &'static str {
        let [x, y] = self.code;
        let code = match self.section {
            Section::Conflicted => {
                return match (x, y) {
                    ('D', 'D') => "both deleted",
                    ('A', 'U') => "added by us",
                    ('U', 'D') => "deleted by them",
                    ('U', 'A') => "added by them",
                    ('D', 'U') => "deleted by us",
                    ('A', 'A') => "both added",
                    _ => "both modified",
                };
            }
            Section::Untracked => return "untracked",
            Section::Staged => x,
            Section::Unstaged | Section::RecentCommits => y,
        };
        match code {
            'M' => "modified",
            'A' => "new file",
            'D' => "deleted",
            'R' => "renamed",
            'C' => "copied",
            'T' => "type changed",
            _ => "changed",
        }
    }

    fn new(record: &Record, section: Section) -> Self {
        Self {
            path: record.path.clone(),
            orig_path: record.orig_path.clone(),
            code: [record.x, record.y],
            section,
            diff: None,
            mode: record.worktree_mode.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub hash: String,
    pub subject: String,
}

/// Everything one status refresh reads from git
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub branch: BranchInfo,
    pub operation: Option<InProgress>,
    /// Sorted by section, then path
    pub entries: Vec<StatusEntry>,
    pub commits: Vec<Commit>,
}

impl StatusSnapshot {
    /// Build from parsed records, splitting each path into its sections.
    pub fn from_records(branch: BranchInfo, records: &[Record]) -> Self {
        let mut entries = Vec::new();
        for record in records {
            match record.kind {
                RecordKind::Ignored => {}
                RecordKind::Untracked => entries.push(StatusEntry::new(record, Section::Untracked)),
                RecordKind::Unmerged => entries.push(StatusEntry::new(record, Section::Conflicted)),
                RecordKind::Ordinary | RecordKind::Renamed { .. } => {
                    if record.x != '.' {
                        entries.push(StatusEntry::new(record, Section::Staged));
                    }
                    if record.y != '.' {
                        entries.push(StatusEntry::new(record, Section::Unstaged));
                    }
                }
            }
        }
        entries.sort_by(|a, b| (a.section, &a.path).cmp(&(b.section, &b.path)));

        Self {
            branch,
            operation: None,
            entries,
            commits: Vec::new(),
        }
    }

    /// Read status, recent commits and operation markers concurrently.
    pub async fn fetch<E: GitExecutor>(
        repo: &RepoState<E>,
        recent_commits: usize,
    ) -> Result<Self, StatusError> {
        let status_args = git_args(&[
            "--no-optional-locks",
            "status",
            "--porcelain=v2",
            "--branch",
            "-z",
            "--untracked-files=all",
        ]);
        let count = recent_commits.to_string();
        let log_args = git_args(&["log", "-n", &count, "--format=%h%x1f%s%x1e"]);

        let (status, log, operation) = tokio::join!(
            repo.read(&status_args),
            async {
                if recent_commits == 0 {
                    None
                } else {
                    Some(repo.read(&log_args).await)
                }
            },
            in_progress(repo.git_dir())
        );

        let status = status?.into_stdout(&status_args)?;
        let parsed = porcelain::parse(&status)?;
        let mut snapshot = Self::from_records(parsed.branch, &parsed.records);
        snapshot.operation = operation;

        // log fails on an unborn branch; there is nothing to list then
        if !snapshot.branch.is_unborn()
            && let Some(log) = log
        {
            snapshot.commits = parse_log(&log?.into_stdout(&log_args)?);
        }

        tracing::debug!(
            entries = snapshot.entries.len(),
            commits = snapshot.commits.len(),
            operation = ?snapshot.operation,
            "read status"
        );
        Ok(snapshot)
    }

    pub fn section(&self, section: Section) -> impl Iterator<Item = &StatusEntry> {
        self.entries.iter().filter(move |entry| entry.section == section)
    }

    pub fn entry(&self, key: &EntryKey) -> Option<&StatusEntry> {
        self.entries
            .iter()
            .find(|entry| entry.section == key.section && entry.path == key.path)
    }

    pub fn entry_mut(&mut self, key: &EntryKey) -> Option<&mut StatusEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.section == key.section && entry.path == key.path)
    }
}

async fn in_progress(git_dir: &Path) -> Option<InProgress> {
    for (marker, operation) in MARKERS {
        if tokio::fs::try_exists(git_dir.join(marker))
            .await
            .unwrap_or(false)
        {
            return Some(operation);
        }
    }
    None
}

fn parse_log(output: &str) -> Vec<Commit> {
    output
        .split('\x1e')
        .map(|record| record.trim_start_matches('\n'))
        .filter_map(|record| record.split_once('\x1f'))
        .map(|(hash, subject)| Commit {
            hash: hash.to_string(),
            subject: subject.to_string(),
        })
        .collect()
}
