//! `git status --porcelain=v2 --branch -z` records.

use error_set::error_set;
use nom::{
    IResult, Parser,
    bytes::complete::tag,
    character::complete::u32 as decimal,
    sequence::preceded,
};

error_set! {
    /// Status output that does not follow porcelain v2
    PorcelainError := {
        #[display("Malformed status record '{record}'")]
        MalformedRecord { record: String },
        #[display("Rename record for {path} lacks its original path")]
        MissingOrigPath { path: String },
    }
}

/// Branch header lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchInfo {
    /// `None` on an unborn branch
    pub oid: Option<String>,
    /// `None` when HEAD is detached
    pub head: Option<String>,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
}

impl BranchInfo {
    pub fn is_unborn(&self) -> bool {
        self.oid.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Ordinary,
    /// Rename or copy, with git's score such as `R100`
    Renamed { score: String },
    Unmerged,
    Untracked,
    Ignored,
}

/// One changed path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordKind,
    /// Index status, `.` when unchanged
    pub x: char,
    /// Worktree status, `.` when unchanged
    pub y: char,
    pub path: String,
    pub orig_path: Option<String>,
    /// Worktree file mode, when reported
    pub worktree_mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Porcelain {
    pub branch: BranchInfo,
    pub records: Vec<Record>,
}

fn ahead_behind(input: &str) -> IResult<&str, (u32, u32)> {
    (
        preceded(tag("+"), decimal),
        preceded(tag(" -"), decimal),
    )
        .parse(input)
}

/// Parse NUL-separated porcelain v2 output.
pub fn parse(output: &str) -> Result<Porcelain, PorcelainError> {
    let mut porcelain = Porcelain::default();
    let mut fields = output.split('\0').filter(|record| !record.is_empty());

    while let Some(record) = fields.next() {
        let malformed = || PorcelainError::MalformedRecord {
            record: record.to_string(),
        };

        if let Some(header) = record.strip_prefix("# ") {
            branch_header(&mut porcelain.branch, header).ok_or_else(malformed)?;
            continue;
        }

        let (kind, rest) = record.split_once(' ').ok_or_else(malformed)?;
        let parsed = match kind {
            "1" => {
                let parts: Vec<&str> = rest.splitn(8, ' ').collect();
                let [xy, _sub, _m_head, _m_index, m_worktree, _h_head, _h_index, path] =
                    parts[..]
                else {
                    return Err(malformed());
                };
                changed(RecordKind::Ordinary, xy, path, Some(m_worktree)).ok_or_else(malformed)?
            }
            "2" => {
                let parts: Vec<&str> = rest.splitn(9, ' ').collect();
                let [xy, _sub, _m_head, _m_index, m_worktree, _h_head, _h_index, score, path] =
                    parts[..]
                else {
                    return Err(malformed());
                };
                let mut parsed = changed(
                    RecordKind::Renamed {
                        score: score.to_string(),
                    },
                    xy,
                    path,
                    Some(m_worktree),
                )
                .ok_or_else(malformed)?;
                let orig = fields.next().ok_or_else(|| PorcelainError::MissingOrigPath {
                    path: path.to_string(),
                })?;
                parsed.orig_path = Some(orig.to_string());
                parsed
            }
            "u" => {
                let parts: Vec<&str> = rest.splitn(10, ' ').collect();
                let [xy, _sub, _m1, _m2, _m3, m_worktree, _h1, _h2, _h3, path] = parts[..] else {
                    return Err(malformed());
                };
                changed(RecordKind::Unmerged, xy, path, Some(m_worktree)).ok_or_else(malformed)?
            }
            "?" => untracked(RecordKind::Untracked, '?', rest),
            "!" => untracked(RecordKind::Ignored, '!', rest),
            _ => return Err(malformed()),
        };
        porcelain.records.push(parsed);
    }

    Ok(porcelain)
}

fn branch_header(branch: &mut BranchInfo, header: &str) -> Option<()> {
    let (key, value) = header.split_once(' ')?;
    match key {
        "branch.oid" => branch.oid = (value != "(initial)").then(|| value.to_string()),
        "branch.head" => branch.head = (value != "(detached)").then(|| value.to_string()),
        "branch.upstream" => branch.upstream = Some(value.to_string()),
        "branch.ab" => {
            let (_, (ahead, behind)) = ahead_behind(value).ok()?;
            branch.ahead = ahead;
            branch.behind = behind;
        }
        // other headers (stash counts) carry nothing we track
        _ => {}
    }
    Some(())
}

fn changed(kind: RecordKind, xy: &str, path: &str, mode: Option<&str>) -> Option<Record> {
    let mut codes = xy.chars();
    let (x, y) = (codes.next()?, codes.next()?);
    if codes.next().is_some() || path.is_empty() {
        return None;
    }
    Some(Record {
        kind,
        x,
        y,
        path: path.to_string(),
        orig_path: None,
        worktree_mode: mode.map(str::to_string),
    })
}

fn untracked(kind: RecordKind, code: char, path: &str) -> Record {
    Record {
        kind,
        x: code,
        y: code,
        path: path.to_string(),
        orig_path: None,
        worktree_mode: None,
    }
}
