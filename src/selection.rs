//! Command-line selection syntax.
//!
//! `FILE[:REFS]` names changed lines of one file in a diff. Without `REFS`
//! the whole file is selected; otherwise `REFS` is a comma-separated list of:
//!
//! - `N` - addition at new line N
//! - `-N` - deletion of old line N
//! - `N..M` - additions N through M (inclusive)
//! - `-N..-M` - deletions N through M (inclusive)
//! - `hN` - every change of the Nth hunk (1-based)
//!
//! ```
//! use git_stagehand::selection::{FileSelection, LineRef};
//! use std::num::NonZeroU32;
//!
//! let selection: FileSelection = "src/lib.rs:10..12,-4,h2".parse().unwrap();
//! assert_eq!(selection.file, "src/lib.rs");
//! assert_eq!(selection.refs[2], LineRef::Hunk(NonZeroU32::new(2).unwrap()));
//! ```

use crate::diff::{DiffSpec, LineKind};
use crate::patch::{LinePicks, SelectionError};
use error_set::error_set;
use std::num::NonZeroU32;
use std::str::FromStr;

error_set! {
    /// Errors from parsing or resolving `FILE[:REFS]`
    SelectorError := {
        /// File name portion before the colon is empty or whitespace
        #[display("Invalid selection '{input}': file name cannot be empty")]
        EmptyFileName { input: String },
        /// Colon given but no references after it
        #[display("No line references provided in '{input}'")]
        EmptyRefs { input: String },
        #[display("Invalid line number '{value}'")]
        InvalidLineNumber { value: String },
        #[display("Invalid range {start}..{end}: start must be <= end")]
        InvalidRange { start: u32, end: u32 },
        #[display("Deletion range must use '-' on both ends, got '{value}'")]
        InvalidDeleteRef { value: String },
        #[display("{file} has no changes in this diff")]
        NotInDiff { file: String },
        SelectionError(SelectionError),
    }
}

/// One reference to changed lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRef {
    /// Addition at new line number
    Add(NonZeroU32),
    /// Addition range (inclusive start and end)
    AddRange(NonZeroU32, NonZeroU32),
    /// Deletion at old line number
    Delete(NonZeroU32),
    /// Deletion range (inclusive start and end)
    DeleteRange(NonZeroU32, NonZeroU32),
    /// A whole hunk, 1-based
    Hunk(NonZeroU32),
}

impl LineRef {
    fn matches(&self, kind: LineKind, old: Option<u32>, new: Option<u32>) -> bool {
        let within = |n: Option<u32>, start: NonZeroU32, end: NonZeroU32| {
            n.is_some_and(|n| (start.get()..=end.get()).contains(&n))
        };
        match (*self, kind) {
            (LineRef::Add(n), LineKind::Add) => within(new, n, n),
            (LineRef::AddRange(start, end), LineKind::Add) => within(new, start, end),
            (LineRef::Delete(n), LineKind::Delete) => within(old, n, n),
            (LineRef::DeleteRange(start, end), LineKind::Delete) => within(old, start, end),
            _ => false,
        }
    }
}

/// Parsed `FILE[:REFS]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSelection {
    pub file: String,
    /// Empty for the whole file
    pub refs: Vec<LineRef>,
}

impl FromStr for FileSelection {
    type Err = SelectorError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (file, refs) = match input.rsplit_once(':') {
            Some((file, refs)) => (file.trim(), Some(refs)),
            None => (input.trim(), None),
        };
        if file.is_empty() {
            return Err(SelectorError::EmptyFileName {
                input: input.to_string(),
            });
        }

        let refs = match refs {
            Some(refs) => parse_line_refs(refs, input)?,
            None => Vec::new(),
        };
        Ok(FileSelection {
            file: file.to_string(),
            refs,
        })
    }
}

impl FileSelection {
    /// Resolve against a diff to the changed lines it names
    pub fn resolve(&self, spec: &DiffSpec) -> Result<LinePicks, SelectorError> {
        let file_index = spec.position(&self.file).ok_or_else(|| SelectorError::NotInDiff {
            file: self.file.clone(),
        })?;
        let file = &spec.files[file_index];
        if self.refs.is_empty() {
            return Ok(LinePicks::file(file_index, file));
        }

        let mut picks = LinePicks::new(file_index);
        for reference in &self.refs {
            if let LineRef::Hunk(number) = reference {
                let hunk_index = number.get() as usize - 1;
                let hunk = file.hunks.get(hunk_index).ok_or_else(|| {
                    SelectionError::NoSuchHunk {
                        path: self.file.clone(),
                        hunk: number.get() as usize,
                    }
                })?;
                for line_index in hunk.change_indices() {
                    picks.insert(hunk_index, line_index);
                }
                continue;
            }

            for (hunk_index, hunk) in file.hunks.iter().enumerate() {
                for (line_index, line) in hunk.lines.iter().enumerate() {
                    if reference.matches(line.kind, line.old_lineno, line.new_lineno) {
                        picks.insert(hunk_index, line_index);
                    }
                }
            }
        }
        Ok(picks)
    }
}

/// Parse the line references part (after the colon)
fn parse_line_refs(refs: &str, input: &str) -> Result<Vec<LineRef>, SelectorError> {
    let refs: Vec<LineRef> = refs
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_single_ref)
        .collect::<Result<_, _>>()?;

    if refs.is_empty() {
        return Err(SelectorError::EmptyRefs {
            input: input.to_string(),
        });
    }
    Ok(refs)
}

fn parse_single_ref(input: &str) -> Result<LineRef, SelectorError> {
    if let Some(hunk) = input.strip_prefix('h') {
        return Ok(LineRef::Hunk(parse_number(hunk)?));
    }

    let Some((start, end)) = input.split_once("..") else {
        return Ok(match input.strip_prefix('-') {
            Some(number) => LineRef::Delete(parse_number(number)?),
            None => LineRef::Add(parse_number(input)?),
        });
    };

    match (start.strip_prefix('-'), end.strip_prefix('-')) {
        (Some(start), Some(end)) => {
            let (start, end) = ordered(parse_number(start)?, parse_number(end)?)?;
            Ok(LineRef::DeleteRange(start, end))
        }
        (None, None) => {
            let (start, end) = ordered(parse_number(start)?, parse_number(end)?)?;
            Ok(LineRef::AddRange(start, end))
        }
        _ => Err(SelectorError::InvalidDeleteRef {
            value: input.to_string(),
        }),
    }
}

fn ordered(
    start: NonZeroU32,
    end: NonZeroU32,
) -> Result<(NonZeroU32, NonZeroU32), SelectorError> {
    if start > end {
        return Err(SelectorError::InvalidRange {
            start: start.get(),
            end: end.get(),
        });
    }
    Ok((start, end))
}

fn parse_number(input: &str) -> Result<NonZeroU32, SelectorError> {
    input
        .parse::<NonZeroU32>()
        .map_err(|_| SelectorError::InvalidLineNumber {
            value: input.to_string(),
        })
}
