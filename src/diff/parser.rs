use super::file::{FilePair, split_lines};
use super::hunk::{Hunk, HunkHeader, Line};
use super::{DiffSpec, ParseError};
use std::path::PathBuf;

impl DiffSpec {
    /// Parse raw `git diff` output.
    ///
    /// A malformed file block is recorded in [`DiffSpec::errors`] and skipped;
    /// parsing resumes at the next `diff --git` line.
    pub fn parse(root: impl Into<PathBuf>, text: &str) -> Self {
        let lines = split_lines(text);
        let mut spec = DiffSpec::from_files(root, Vec::new());
        let mut cursor = Cursor { lines: &lines, pos: 0 };

        while let Some(line) = cursor.peek() {
            if line.starts_with("diff --cc ") || line.starts_with("diff --combined ") {
                spec.errors.push(ParseError::CombinedDiff {
                    line: cursor.line_number(),
                });
                cursor.resync(cursor.pos);
            } else if cursor.at_block_start() {
                let start = cursor.pos;
                match cursor.file_block() {
                    Ok(file) => spec.files.push(file),
                    Err(error) => {
                        tracing::warn!(%error, start = start + 1, "skipping malformed diff block");
                        spec.errors.push(error);
                        cursor.resync(start);
                    }
                }
            } else {
                cursor.pos += 1;
            }
        }

        spec
    }
}

struct Cursor<'a> {
    lines: &'a [&'a str],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    fn line_number(&self) -> usize {
        self.pos + 1
    }

    fn at_block_start(&self) -> bool {
        match self.peek() {
            Some(line) if line.starts_with("diff --git ") => true,
            Some(line) if line.starts_with("--- ") => self
                .lines
                .get(self.pos + 1)
                .is_some_and(|next| next.starts_with("+++ ")),
            _ => false,
        }
    }

    /// Skip to the first `diff --git` line after `from`, or the end.
    fn resync(&mut self, from: usize) {
        self.pos = from + 1;
        while let Some(line) = self.peek() {
            if line.starts_with("diff --git ") {
                break;
            }
            self.pos += 1;
        }
    }

    fn file_block(&mut self) -> Result<FilePair, ParseError> {
        let start = self.line_number();
        let header = self.header();
        let mut file = FilePair::from_header(header, start)?;

        while let Some(line) = self.peek() {
            if !line.starts_with("@@") {
                break;
            }
            file.hunks.push(self.hunk()?);
        }

        Ok(file)
    }

    /// Header lines up to the first hunk or the next file
    fn header(&mut self) -> Vec<String> {
        let mut header = Vec::new();

        if let Some(first) = self.peek()
            && !first.starts_with("diff --git ")
        {
            // bare `---`/`+++` pair without a git header
            header.extend(self.lines[self.pos..self.pos + 2].iter().map(|l| l.to_string()));
            self.pos += 2;
            return header;
        }

        while let Some(line) = self.peek() {
            let is_next_file = !header.is_empty() && line.starts_with("diff --git ");
            if is_next_file || line.starts_with("@@") || line.is_empty() {
                break;
            }
            header.push(line.to_string());
            self.pos += 1;
        }
        header
    }

    /// One hunk, its body consumed by the header's line counts
    fn hunk(&mut self) -> Result<Hunk, ParseError> {
        let line_number = self.line_number();
        let text = self.peek().unwrap_or_default();
        let header = HunkHeader::parse(text).ok_or_else(|| ParseError::BadHunkHeader {
            line: line_number,
            header: text.to_string(),
        })?;
        self.pos += 1;

        let mut hunk = Hunk::from_header(header);
        let mut old_left = hunk.old_count;
        let mut new_left = hunk.new_count;
        let mut old_no = hunk.old_start;
        let mut new_no = hunk.new_start;

        while old_left > 0 || new_left > 0 {
            let Some(line) = self.peek() else {
                return Err(ParseError::TruncatedHunk {
                    line: self.line_number(),
                    missing: old_left.max(new_left),
                });
            };

            let unexpected = || ParseError::UnexpectedLine {
                line: self.line_number(),
                text: line.to_string(),
            };

            let body = match line.chars().next() {
                // an empty line is an empty context line with its space stripped
                None => Some(""),
                Some(' ') => Some(&line[1..]),
                _ => None,
            };

            if let Some(body) = body {
                if old_left == 0 || new_left == 0 {
                    return Err(unexpected());
                }
                hunk.lines.push(Line::context(body, old_no, new_no));
                old_left -= 1;
                new_left -= 1;
                old_no += 1;
                new_no += 1;
            } else if let Some(body) = line.strip_prefix('-') {
                if old_left == 0 {
                    return Err(unexpected());
                }
                hunk.lines.push(Line::delete(body, old_no));
                old_left -= 1;
                old_no += 1;
            } else if let Some(body) = line.strip_prefix('+') {
                if new_left == 0 {
                    return Err(unexpected());
                }
                hunk.lines.push(Line::add(body, new_no));
                new_left -= 1;
                new_no += 1;
            } else if line.starts_with('\\') {
                match hunk.lines.last_mut() {
                    Some(last) => last.missing_newline = true,
                    None => return Err(unexpected()),
                }
            } else {
                return Err(unexpected());
            }
            self.pos += 1;
        }

        // the marker for the hunk's final line follows the counted body
        if self.peek().is_some_and(|line| line.starts_with('\\'))
            && let Some(last) = hunk.lines.last_mut()
        {
            last.missing_newline = true;
            self.pos += 1;
        }

        Ok(hunk)
    }
}
