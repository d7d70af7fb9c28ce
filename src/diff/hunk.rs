use nom::{
    IResult, Parser,
    bytes::complete::tag,
    character::complete::u32 as decimal,
    combinator::{opt, rest},
    sequence::preceded,
};
use std::fmt;

/// Marker git emits after a line that lacks a trailing newline
pub const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// Which image(s) of the file a diff line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineKind {
    Context,
    Add,
    Delete,
}

impl LineKind {
    pub fn prefix(self) -> char {
        match self {
            LineKind::Context => ' ',
            LineKind::Add => '+',
            LineKind::Delete => '-',
        }
    }

    pub fn is_change(self) -> bool {
        !matches!(self, LineKind::Context)
    }
}

/// A single line of a hunk body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub kind: LineKind,
    /// Content without the prefix character; a trailing `\r` is kept.
    pub text: String,
    pub old_lineno: Option<u32>,
    pub new_lineno: Option<u32>,
    /// Followed by `\ No newline at end of file`
    pub missing_newline: bool,
}

impl Line {
    pub fn context(text: impl Into<String>, old_lineno: u32, new_lineno: u32) -> Self {
        Self {
            kind: LineKind::Context,
            text: text.into(),
            old_lineno: Some(old_lineno),
            new_lineno: Some(new_lineno),
            missing_newline: false,
        }
    }

    pub fn add(text: impl Into<String>, new_lineno: u32) -> Self {
        Self {
            kind: LineKind::Add,
            text: text.into(),
            old_lineno: None,
            new_lineno: Some(new_lineno),
            missing_newline: false,
        }
    }

    pub fn delete(text: impl Into<String>, old_lineno: u32) -> Self {
        Self {
            kind: LineKind::Delete,
            text: text.into(),
            old_lineno: Some(old_lineno),
            new_lineno: None,
            missing_newline: false,
        }
    }

    pub fn without_newline(mut self) -> Self {
        self.missing_newline = true;
        self
    }
}

/// The `@@ -a,b +c,d @@ heading` line of a hunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkHeader {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    pub heading: String,
}

impl HunkHeader {
    /// Parse a hunk header line. Omitted counts default to 1.
    pub fn parse(line: &str) -> Option<Self> {
        header(line).ok().map(|(_, parsed)| parsed)
    }
}

fn range(input: &str) -> IResult<&str, (u32, u32)> {
    (decimal, opt(preceded(tag(","), decimal)))
        .map(|(start, count)| (start, count.unwrap_or(1)))
        .parse(input)
}

fn header(input: &str) -> IResult<&str, HunkHeader> {
    (tag("@@ -"), range, tag(" +"), range, tag(" @@"), rest)
        .map(
            |(_, (old_start, old_count), _, (new_start, new_count), _, heading): (
                &str,
                (u32, u32),
                &str,
                (u32, u32),
                &str,
                &str,
            )| HunkHeader {
                old_start,
                old_count,
                new_start,
                new_count,
                heading: heading.strip_prefix(' ').unwrap_or(heading).to_string(),
            },
        )
        .parse(input)
}

/// A contiguous diff block under one `@@` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    /// Function context git prints after the closing `@@`
    pub heading: String,
    pub lines: Vec<Line>,
}

impl Hunk {
    /// An empty hunk carrying the header's ranges; the body is filled by the parser.
    pub fn from_header(header: HunkHeader) -> Self {
        Self {
            old_start: header.old_start,
            old_count: header.old_count,
            new_start: header.new_start,
            new_count: header.new_count,
            heading: header.heading,
            lines: Vec::new(),
        }
    }

    /// Build a hunk from body lines, deriving the counts from them.
    pub fn with_lines(old_start: u32, new_start: u32, lines: Vec<Line>) -> Self {
        let old_count = lines
            .iter()
            .filter(|line| line.kind != LineKind::Add)
            .count() as u32;
        let new_count = lines
            .iter()
            .filter(|line| line.kind != LineKind::Delete)
            .count() as u32;
        Self {
            old_start,
            old_count,
            new_start,
            new_count,
            heading: String::new(),
            lines,
        }
    }

    /// The `@@ ... @@` line, heading included
    pub fn header_line(&self) -> String {
        let mut line = format!(
            "@@ -{} +{} @@",
            range_text(self.old_start, self.old_count),
            range_text(self.new_start, self.new_count)
        );
        if !self.heading.is_empty() {
            line.push(' ');
            line.push_str(&self.heading);
        }
        line
    }

    pub fn changed_lines(&self) -> usize {
        self.lines.iter().filter(|line| line.kind.is_change()).count()
    }

    /// Indices of the added and deleted lines, in body order
    pub fn change_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.kind.is_change())
            .map(|(index, _)| index)
    }

    /// True when the header counts agree with the body
    pub fn is_consistent(&self) -> bool {
        let old = self
            .lines
            .iter()
            .filter(|line| line.kind != LineKind::Add)
            .count() as u32;
        let new = self
            .lines
            .iter()
            .filter(|line| line.kind != LineKind::Delete)
            .count() as u32;
        old == self.old_count && new == self.new_count
    }
}

fn range_text(start: u32, count: u32) -> String {
    match count {
        1 => start.to_string(),
        n => format!("{start},{n}"),
    }
}

impl fmt::Display for Hunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.header_line())?;
        for line in &self.lines {
            writeln!(f, "{}{}", line.kind.prefix(), line.text)?;
            if line.missing_newline {
                writeln!(f, "{NO_NEWLINE_MARKER}")?;
            }
        }

        Ok(())
    }
}
