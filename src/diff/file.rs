use super::ParseError;
use super::hunk::{Hunk, Line, LineKind};
use std::fmt;

/// How a file changed between the two images of a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    Added,
    Deleted,
    Modified,
    Renamed,
    Copied,
    TypeChanged,
}

impl FileStatus {
    /// Single-letter code as used by `git status`
    pub fn code(self) -> char {
        match self {
            FileStatus::Added => 'A',
            FileStatus::Deleted => 'D',
            FileStatus::Modified => 'M',
            FileStatus::Renamed => 'R',
            FileStatus::Copied => 'C',
            FileStatus::TypeChanged => 'T',
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FileStatus::Added => "new file",
            FileStatus::Deleted => "deleted",
            FileStatus::Modified => "modified",
            FileStatus::Renamed => "renamed",
            FileStatus::Copied => "copied",
            FileStatus::TypeChanged => "type changed",
        }
    }
}

/// Everything the diff says about one file: header, paths, modes and hunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    pub old_path: String,
    pub new_path: String,
    pub status: FileStatus,
    /// Header lines from `diff --git` through `+++`, verbatim
    pub header: Vec<String>,
    pub old_mode: Option<String>,
    pub new_mode: Option<String>,
    pub similarity: Option<u8>,
    pub binary: bool,
    pub hunks: Vec<Hunk>,
}

impl FilePair {
    /// Interpret the header lines of one file block.
    pub(crate) fn from_header(header: Vec<String>, line: usize) -> Result<Self, ParseError> {
        let mut old_path: Option<String> = None;
        let mut new_path: Option<String> = None;
        let mut git_paths: Option<(String, String)> = None;
        let mut status = FileStatus::Modified;
        let mut old_mode = None;
        let mut new_mode = None;
        let mut similarity = None;
        let mut binary = false;
        let mut old_is_null = false;
        let mut new_is_null = false;

        for text in &header {
            if let Some(rest) = text.strip_prefix("diff --git ") {
                git_paths = split_git_paths(rest);
            } else if let Some(mode) = text.strip_prefix("old mode ") {
                old_mode = Some(mode.to_string());
            } else if let Some(mode) = text.strip_prefix("new mode ") {
                new_mode = Some(mode.to_string());
            } else if let Some(mode) = text.strip_prefix("deleted file mode ") {
                status = FileStatus::Deleted;
                old_mode = Some(mode.to_string());
            } else if let Some(mode) = text.strip_prefix("new file mode ") {
                status = FileStatus::Added;
                new_mode = Some(mode.to_string());
            } else if let Some(path) = text.strip_prefix("rename from ") {
                status = FileStatus::Renamed;
                old_path = Some(unquote(path));
            } else if let Some(path) = text.strip_prefix("rename to ") {
                new_path = Some(unquote(path));
            } else if let Some(path) = text.strip_prefix("copy from ") {
                status = FileStatus::Copied;
                old_path = Some(unquote(path));
            } else if let Some(path) = text.strip_prefix("copy to ") {
                new_path = Some(unquote(path));
            } else if let Some(score) = text.strip_prefix("similarity index ") {
                similarity = score.trim_end_matches('%').parse().ok();
            } else if let Some(rest) = text.strip_prefix("index ") {
                if let Some((_, mode)) = rest.split_once(' ') {
                    old_mode.get_or_insert_with(|| mode.to_string());
                    new_mode.get_or_insert_with(|| mode.to_string());
                }
            } else if text.starts_with("Binary files ") || text == "GIT binary patch" {
                binary = true;
            } else if let Some(path) = text.strip_prefix("--- ") {
                match header_path(path, "a/") {
                    Some(path) => old_path = old_path.or(Some(path)),
                    None => old_is_null = true,
                }
            } else if let Some(path) = text.strip_prefix("+++ ") {
                match header_path(path, "b/") {
                    Some(path) => new_path = new_path.or(Some(path)),
                    None => new_is_null = true,
                }
            }
        }

        if old_is_null && status == FileStatus::Modified {
            status = FileStatus::Added;
        }
        if new_is_null && status == FileStatus::Modified {
            status = FileStatus::Deleted;
        }
        if status == FileStatus::Modified
            && let (Some(old), Some(new)) = (&old_mode, &new_mode)
            && file_type(old) != file_type(new)
        {
            status = FileStatus::TypeChanged;
        }

        let (git_old, git_new) = git_paths.unzip();
        let old_path = old_path.or(git_old);
        let new_path = new_path.or(git_new);
        let (old_path, new_path) = match (old_path, new_path) {
            (Some(old), Some(new)) => (old, new),
            (Some(old), None) => (old.clone(), old),
            (None, Some(new)) => (new.clone(), new),
            (None, None) => return Err(ParseError::MissingPath { line }),
        };

        Ok(FilePair {
            old_path,
            new_path,
            status,
            header,
            old_mode,
            new_mode,
            similarity,
            binary,
            hunks: Vec::new(),
        })
    }

    /// Synthesize the diff of an untracked file: one all-insertion hunk.
    pub fn untracked(path: &str, content: &[u8], executable: bool) -> Self {
        let mode = if executable { "100755" } else { "100644" };
        let mut header = vec![
            format!("diff --git {} {}", quote_path("a/", path), quote_path("b/", path)),
            format!("new file mode {mode}"),
        ];

        let sniff = &content[..content.len().min(8000)];
        let binary = sniff.contains(&0);
        let mut hunks = Vec::new();

        if binary {
            header.push(format!(
                "Binary files /dev/null and {} differ",
                quote_path("b/", path)
            ));
        } else if !content.is_empty() {
            header.push("--- /dev/null".to_string());
            header.push(format!("+++ {}", header_name("b/", path)));

            let text = String::from_utf8_lossy(content);
            let mut lines: Vec<Line> = split_lines(&text)
                .into_iter()
                .enumerate()
                .map(|(i, text)| Line::add(text, i as u32 + 1))
                .collect();
            if !text.ends_with('\n')
                && let Some(last) = lines.last_mut()
            {
                last.missing_newline = true;
            }
            hunks.push(Hunk::with_lines(0, 1, lines));
        }

        FilePair {
            old_path: path.to_string(),
            new_path: path.to_string(),
            status: FileStatus::Added,
            header,
            old_mode: None,
            new_mode: Some(mode.to_string()),
            similarity: None,
            binary,
            hunks,
        }
    }

    /// The path this file has after the change (before it, for deletions)
    pub fn path(&self) -> &str {
        match self.status {
            FileStatus::Deleted => &self.old_path,
            _ => &self.new_path,
        }
    }

    pub fn changed_lines(&self) -> usize {
        self.hunks.iter().map(Hunk::changed_lines).sum()
    }

    /// Whether the old (or new) image ends without a trailing newline
    pub fn missing_final_newline(&self, new_side: bool) -> bool {
        let Some(hunk) = self.hunks.last() else {
            return false;
        };
        hunk.lines
            .iter()
            .rev()
            .find(|line| match line.kind {
                LineKind::Context => true,
                LineKind::Add => new_side,
                LineKind::Delete => !new_side,
            })
            .is_some_and(|line| line.missing_newline)
    }

    /// Mode, rename or copy information that a header-only patch carries
    pub fn has_meta_change(&self) -> bool {
        matches!(
            self.status,
            FileStatus::Renamed | FileStatus::Copied | FileStatus::TypeChanged
        ) || matches!((&self.old_mode, &self.new_mode), (Some(old), Some(new)) if old != new)
            || (self.hunks.is_empty()
                && matches!(self.status, FileStatus::Added | FileStatus::Deleted))
    }
}

impl fmt::Display for FilePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.header {
            writeln!(f, "{line}")?;
        }
        for hunk in &self.hunks {
            write!(f, "{hunk}")?;
        }
        Ok(())
    }
}

/// Split text into lines on `\n` only, keeping any `\r`.
pub fn split_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.last().is_some_and(|last| last.is_empty()) {
        lines.pop();
    }
    lines
}

fn file_type(mode: &str) -> &str {
    mode.get(..mode.len().saturating_sub(3)).unwrap_or(mode)
}

/// Path from a `---`/`+++` line, `None` for `/dev/null`
fn header_path(raw: &str, prefix: &str) -> Option<String> {
    let name = if raw.starts_with('"') {
        unquote(raw)
    } else {
        // git appends a tab to names containing spaces
        raw.split('\t').next().unwrap_or(raw).to_string()
    };
    if name == "/dev/null" {
        return None;
    }
    Some(name.strip_prefix(prefix).map(str::to_string).unwrap_or(name))
}

/// Split `a/<old> b/<new>` from a `diff --git` line
fn split_git_paths(rest: &str) -> Option<(String, String)> {
    if rest.starts_with('"') {
        let (first, remainder) = take_quoted(rest)?;
        let second = remainder.trim_start();
        let second = if second.starts_with('"') {
            take_quoted(second)?.0
        } else {
            second.to_string()
        };
        return Some((strip(&first, "a/"), strip(&second, "b/")));
    }

    if let Some(pos) = rest.find(" \"") {
        let second = take_quoted(&rest[pos + 1..])?.0;
        return Some((strip(&rest[..pos], "a/"), strip(&second, "b/")));
    }

    // Without quoting, prefer the split where both halves name the same path.
    let candidates: Vec<usize> = rest.match_indices(" b/").map(|(i, _)| i).collect();
    let symmetric = candidates
        .iter()
        .copied()
        .find(|&i| rest[..i].strip_prefix("a/") == Some(&rest[i + 3..]));
    let split = symmetric.or_else(|| candidates.first().copied())?;
    Some((strip(&rest[..split], "a/"), rest[split + 3..].to_string()))
}

fn strip(path: &str, prefix: &str) -> String {
    path.strip_prefix(prefix).unwrap_or(path).to_string()
}

/// Read one C-quoted token, returning it unquoted plus the remaining input
fn take_quoted(input: &str) -> Option<(String, &str)> {
    let body = input.strip_prefix('"')?;
    let mut escaped = false;
    for (i, ch) in body.char_indices() {
        match ch {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => {
                let token = &input[..i + 2];
                return Some((unquote(token), &body[i + 1..]));
            }
            _ => escaped = false,
        }
    }
    None
}

/// Undo git's C-style path quoting. Unquoted input is returned as is.
pub fn unquote(raw: &str) -> String {
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return raw.to_string();
    };

    let mut bytes = Vec::with_capacity(inner.len());
    let mut chars = inner.bytes().peekable();
    while let Some(byte) = chars.next() {
        if byte != b'\\' {
            bytes.push(byte);
            continue;
        }
        match chars.next() {
            Some(b'n') => bytes.push(b'\n'),
            Some(b't') => bytes.push(b'\t'),
            Some(b'r') => bytes.push(b'\r'),
            Some(b'a') => bytes.push(0x07),
            Some(b'b') => bytes.push(0x08),
            Some(b'f') => bytes.push(0x0c),
            Some(b'v') => bytes.push(0x0b),
            Some(digit @ b'0'..=b'7') => {
                let mut value = u32::from(digit - b'0');
                for _ in 0..2 {
                    match chars.peek() {
                        Some(next @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(next - b'0');
                            chars.next();
                        }
                        _ => break,
                    }
                }
                bytes.push((value & 0xff) as u8);
            }
            Some(other) => bytes.push(other),
            None => bytes.push(b'\\'),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Quote `prefix + path` the way git does for header lines
pub fn quote_path(prefix: &str, path: &str) -> String {
    let needs_quotes = path
        .chars()
        .any(|ch| ch == '"' || ch == '\\' || ch.is_ascii_control());
    if !needs_quotes {
        return format!("{prefix}{path}");
    }

    let mut quoted = String::from("\"");
    quoted.push_str(prefix);
    for ch in path.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            ch if ch.is_ascii_control() => quoted.push_str(&format!("\\{:03o}", ch as u32)),
            ch => quoted.push(ch),
        }
    }
    quoted.push('"');
    quoted
}

/// Name as written after `---`/`+++`, with git's trailing tab for spaces
pub fn header_name(prefix: &str, path: &str) -> String {
    let quoted = quote_path(prefix, path);
    if !quoted.starts_with('"') && path.contains(' ') {
        format!("{quoted}\t")
    } else {
        quoted
    }
}
