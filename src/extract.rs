//! Fenced code block extraction.
//!
//! `extract_blocks` returns a lazy iterator over a document's code blocks in
//! document order. Malformed regions (nested or unclosed fences) come out as
//! `ExtractError` items so a caller can log them and keep going.
use crate::document::Document;
use serde::Serialize;
use std::ops::Range;

const DEFAULT_LANGUAGE: &str = "text";
const SKIP_MARKER: &str = "snipcheck:skip";

/// One fenced code block. `index` counts successfully extracted blocks only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeBlock {
    pub document: String,
    pub index: usize,
    pub language: String,
    pub info: String,
    pub body: String,
    pub span: Range<usize>,
    /// 1-based line of the opening fence.
    pub line: usize,
    pub skip: bool,
}

impl CodeBlock {
    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty()
    }

    /// Info-string words after the language tag.
    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.info.split_whitespace().skip(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("{document}:{line}: nested code fence at line {nested_line}; block skipped")]
    NestedFence {
        document: String,
        line: usize,
        nested_line: usize,
    },
    #[error("{document}:{line}: code fence is never closed; block skipped")]
    Unterminated { document: String, line: usize },
}

/// Start a fresh pass over the document's code blocks.
pub fn extract_blocks(document: &Document) -> Blocks<'_> {
    Blocks {
        document,
        pos: 0,
        line: 1,
        next_index: 0,
        pending_skip: false,
    }
}

/// Extract all well-formed blocks, logging and dropping malformed regions.
pub fn collect_blocks(document: &Document) -> Vec<CodeBlock> {
    extract_blocks(document)
        .filter_map(|item| match item {
            Ok(block) => Some(block),
            Err(err) => {
                tracing::warn!(%err, "skipping malformed code block");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    document: &'a Document,
    pos: usize,
    line: usize,
    next_index: usize,
    pending_skip: bool,
}

struct Line<'a> {
    text: &'a str,
    start: usize,
    end: usize,
    number: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fence<'a> {
    marker: char,
    len: usize,
    info: &'a str,
}

impl<'a> Blocks<'a> {
    fn next_line(&mut self) -> Option<Line<'a>> {
        let text = self.document.text.as_str();
        if self.pos >= text.len() {
            return None;
        }
        let rest = &text[self.pos..];
        let (raw, consumed) = match rest.find('\n') {
            Some(idx) => (&rest[..idx], idx + 1),
            None => (rest, rest.len()),
        };
        let line = Line {
            text: raw.strip_suffix('\r').unwrap_or(raw),
            start: self.pos,
            end: self.pos + consumed,
            number: self.line,
        };
        self.pos += consumed;
        self.line += 1;
        Some(line)
    }

    fn read_block(
        &mut self,
        open: Line<'a>,
        fence: Fence<'a>,
        skip: bool,
    ) -> Result<CodeBlock, ExtractError> {
        let mut body = String::new();
        let mut depth = 0usize;
        let mut nested_line = None;

        while let Some(line) = self.next_line() {
            let inner = parse_fence(line.text).filter(|inner| inner.marker == fence.marker);
            if let Some(inner) = inner {
                if !inner.info.is_empty() {
                    depth += 1;
                    nested_line.get_or_insert(line.number);
                    continue;
                }
                if depth > 0 {
                    depth -= 1;
                    continue;
                }
                if inner.len >= fence.len {
                    if let Some(nested_line) = nested_line {
                        return Err(ExtractError::NestedFence {
                            document: self.document.id.clone(),
                            line: open.number,
                            nested_line,
                        });
                    }
                    let index = self.next_index;
                    self.next_index += 1;
                    return Ok(CodeBlock {
                        document: self.document.id.clone(),
                        index,
                        language: language_tag(fence.info),
                        info: fence.info.to_string(),
                        body,
                        span: open.start..line.end,
                        line: open.number,
                        skip,
                    });
                }
            }
            body.push_str(line.text);
            body.push('\n');
        }

        Err(match nested_line {
            Some(nested_line) => ExtractError::NestedFence {
                document: self.document.id.clone(),
                line: open.number,
                nested_line,
            },
            None => ExtractError::Unterminated {
                document: self.document.id.clone(),
                line: open.number,
            },
        })
    }
}

impl Iterator for Blocks<'_> {
    type Item = Result<CodeBlock, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.next_line()?;
            if is_skip_marker(line.text) {
                self.pending_skip = true;
                continue;
            }
            let Some(fence) = parse_fence(line.text) else {
                if !line.text.trim().is_empty() {
                    self.pending_skip = false;
                }
                continue;
            };
            let skip = std::mem::take(&mut self.pending_skip);
            return Some(self.read_block(line, fence, skip));
        }
    }
}

fn parse_fence(line: &str) -> Option<Fence<'_>> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let marker = rest.chars().next().filter(|ch| *ch == '`' || *ch == '~')?;
    let len = rest.len() - rest.trim_start_matches(marker).len();
    if len < 3 {
        return None;
    }
    let info = rest[len..].trim();
    if marker == '`' && info.contains('`') {
        return None;
    }
    Some(Fence { marker, len, info })
}

fn language_tag(info: &str) -> String {
    info.split_whitespace()
        .next()
        .map(|tag| tag.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
}

fn is_skip_marker(line: &str) -> bool {
    line.trim()
        .strip_prefix("<!--")
        .and_then(|rest| rest.strip_suffix("-->"))
        .map(|inner| inner.trim() == SKIP_MARKER)
        .unwrap_or(false)
}
