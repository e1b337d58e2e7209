//! Key-path editing of OpenFOAM dictionary text.
//!
//! Entries are addressed by dotted paths (`PIMPLE.nOuterCorrectors`,
//! `relaxationFactors.fields.p`). Edits replace only the value text of an
//! entry, so comments, layout and unrelated entries survive byte for byte.
//! Path segments cannot contain `.`.

use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DictError {
    #[error("malformed dictionary at byte {position}: {reason}")]
    Malformed { position: usize, reason: String },

    #[error("no block '{path}'")]
    MissingBlock { path: String },

    #[error("'{path}' is a block, not an entry")]
    NotAnEntry { path: String },
}

#[derive(Debug, Clone)]
struct EntrySpan {
    path: String,
    parent: String,
    value: Range<usize>,
    end: usize,
}

#[derive(Debug, Clone)]
struct BlockSpan {
    path: String,
    parent: String,
    open: usize,
    close: usize,
}

#[derive(Debug, Default)]
struct Layout {
    entries: Vec<EntrySpan>,
    blocks: Vec<BlockSpan>,
}

impl Layout {
    fn entry(&self, path: &str) -> Option<&EntrySpan> {
        self.entries.iter().rev().find(|e| e.path == path)
    }

    fn block(&self, path: &str) -> Option<&BlockSpan> {
        self.blocks.iter().rev().find(|b| b.path == path)
    }

    /// Byte offset just past the last statement directly inside `parent`.
    fn children_end(&self, parent: &str) -> Option<usize> {
        let entries = self
            .entries
            .iter()
            .filter(|e| e.parent == parent)
            .map(|e| e.end);
        let blocks = self
            .blocks
            .iter()
            .filter(|b| b.parent == parent)
            .map(|b| b.close + 1);
        entries.chain(blocks).max()
    }
}

struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            src: text.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn malformed(&self, reason: &str) -> DictError {
        DictError::Malformed {
            position: self.pos,
            reason: reason.to_string(),
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == b'\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), DictError> {
        let start = self.pos;
        self.pos += 2;
        while self.pos + 1 < self.src.len() {
            if self.src[self.pos] == b'*' && self.src[self.pos + 1] == b'/' {
                self.pos += 2;
                return Ok(());
            }
            self.pos += 1;
        }
        self.pos = start;
        Err(self.malformed("unterminated comment"))
    }

    fn skip_string(&mut self) -> Result<(), DictError> {
        let start = self.pos;
        self.pos += 1;
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                b'\\' => self.pos += 1,
                b'"' => return Ok(()),
                _ => {}
            }
        }
        self.pos = start;
        Err(self.malformed("unterminated string"))
    }

    /// Skip a `#{ ... #}` verbatim block.
    fn skip_verbatim(&mut self) -> Result<(), DictError> {
        let start = self.pos;
        self.pos += 2;
        while self.pos + 1 < self.src.len() {
            if self.src[self.pos] == b'#' && self.src[self.pos + 1] == b'}' {
                self.pos += 2;
                return Ok(());
            }
            self.pos += 1;
        }
        self.pos = start;
        Err(self.malformed("unterminated verbatim block"))
    }

    fn skip_trivia(&mut self) -> Result<(), DictError> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_ascii_whitespace() => self.pos += 1,
                (Some(b'/'), Some(b'/')) => self.skip_line(),
                (Some(b'/'), Some(b'*')) => self.skip_block_comment()?,
                _ => return Ok(()),
            }
        }
    }

    fn read_keyword(&mut self) -> Result<String, DictError> {
        if self.peek() == Some(b'"') {
            let start = self.pos;
            self.skip_string()?;
            return Ok(String::from_utf8_lossy(&self.src[start + 1..self.pos - 1]).into_owned());
        }
        let start = self.pos;
        while let Some(c) = self.peek() {
            let comment = c == b'/' && matches!(self.peek_at(1), Some(b'/' | b'*'));
            if c.is_ascii_whitespace() || matches!(c, b'{' | b'}' | b';' | b'"') || comment {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.malformed("expected keyword"));
        }
        Ok(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
    }

    /// Advance to the `;` ending a value, or to a `}` closing the enclosing
    /// block, or to end of input. Returns that position.
    fn scan_value(&mut self) -> Result<usize, DictError> {
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                b'"' => self.skip_string()?,
                b'/' if self.peek_at(1) == Some(b'/') => self.skip_line(),
                b'/' if self.peek_at(1) == Some(b'*') => self.skip_block_comment()?,
                b'#' if self.peek_at(1) == Some(b'{') => self.skip_verbatim()?,
                b'(' | b'[' | b'{' => {
                    depth += 1;
                    self.pos += 1;
                }
                b'}' if depth == 0 => return Ok(self.pos),
                b')' | b']' | b'}' => {
                    depth = depth.saturating_sub(1);
                    self.pos += 1;
                }
                b';' if depth == 0 => return Ok(self.pos),
                _ => self.pos += 1,
            }
        }
        Ok(self.pos)
    }
}

fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('.') {
        Some((parent, key)) => (parent, key),
        None => ("", path),
    }
}

fn depth(parent: &str) -> usize {
    if parent.is_empty() {
        0
    } else {
        parent.split('.').count()
    }
}

fn scan(text: &str) -> Result<Layout, DictError> {
    let mut sc = Scanner::new(text);
    let mut layout = Layout::default();
    // (path, parent path, open brace offset)
    let mut stack: Vec<(String, String, usize)> = Vec::new();

    loop {
        sc.skip_trivia()?;
        let Some(c) = sc.peek() else {
            break;
        };
        match c {
            b'}' => {
                let Some((path, parent, open)) = stack.pop() else {
                    return Err(sc.malformed("unmatched '}'"));
                };
                layout.blocks.push(BlockSpan {
                    parent,
                    path,
                    open,
                    close: sc.pos,
                });
                sc.pos += 1;
            }
            b';' => sc.pos += 1,
            b'#' if sc.peek_at(1) == Some(b'{') => sc.skip_verbatim()?,
            b'#' => sc.skip_line(),
            b'{' => return Err(sc.malformed("block without keyword")),
            _ => {
                let key = sc.read_keyword()?;
                let parent = stack.last().map(|(p, _, _)| p.clone()).unwrap_or_default();
                let path = join(&parent, &key);
                sc.skip_trivia()?;
                if sc.peek() == Some(b'{') {
                    stack.push((path, parent, sc.pos));
                    sc.pos += 1;
                } else {
                    let value_start = sc.pos;
                    let value_end = sc.scan_value()?;
                    let trimmed = value_start
                        + text[value_start..value_end].trim_end().len();
                    if sc.peek() == Some(b';') {
                        sc.pos += 1;
                    }
                    layout.entries.push(EntrySpan {
                        path,
                        parent,
                        value: value_start..trimmed,
                        end: sc.pos,
                    });
                }
            }
        }
    }

    if let Some((path, _, open)) = stack.last() {
        return Err(DictError::Malformed {
            position: *open,
            reason: format!("block '{path}' is never closed"),
        });
    }
    Ok(layout)
}

/// Value text of the entry at `path` (last definition wins).
pub fn get_entry(text: &str, path: &str) -> Result<Option<String>, DictError> {
    let layout = scan(text)?;
    Ok(layout
        .entry(path)
        .map(|entry| text[entry.value.clone()].to_string()))
}

/// Set the entry at `path` to `value`.
///
/// An existing entry has its value replaced in place; a dimensioned value
/// (`[0 2 -1 0 0 0 0] 1.5e-05`) keeps its dimensions when `value` has none.
/// A missing entry is appended after the last statement of its block.
///
/// # Errors
///
/// [`DictError::MissingBlock`] when the enclosing block does not exist.
pub fn set_entry(text: &str, path: &str, value: &str) -> Result<String, DictError> {
    let layout = scan(text)?;

    if let Some(entry) = layout.entry(path) {
        let old = &text[entry.value.clone()];
        let new_value = keep_dimensions(old, value);
        let needs_space = entry.value.is_empty()
            && text[..entry.value.start]
                .chars()
                .next_back()
                .is_some_and(|c| !c.is_whitespace());

        let mut out = String::with_capacity(text.len() + new_value.len());
        out.push_str(&text[..entry.value.start]);
        if needs_space {
            out.push(' ');
        }
        out.push_str(&new_value);
        out.push_str(&text[entry.value.end..]);
        return Ok(out);
    }

    if layout.block(path).is_some() {
        return Err(DictError::NotAnEntry {
            path: path.to_string(),
        });
    }

    let (parent, key) = split_path(path);
    let at = insertion_point(text, &layout, parent)?;
    let indent = "    ".repeat(depth(parent));
    let width = 16usize.saturating_sub(indent.len()).max(key.len() + 1);
    let line = format!("\n{indent}{key:<width$}{value};");
    Ok(splice(text, at, &line))
}

/// Create the block at `path`, and any missing ancestors, if absent.
pub fn ensure_block(text: &str, path: &str) -> Result<String, DictError> {
    let layout = scan(text)?;
    if layout.block(path).is_some() {
        return Ok(text.to_string());
    }
    if layout.entry(path).is_some() {
        return Err(DictError::Malformed {
            position: 0,
            reason: format!("'{path}' is an entry, not a block"),
        });
    }

    let (parent, key) = split_path(path);
    let text = if parent.is_empty() {
        text.to_string()
    } else {
        ensure_block(text, parent)?
    };
    let layout = scan(&text)?;
    let at = insertion_point(&text, &layout, parent)?;
    let indent = "    ".repeat(depth(parent));
    let block = format!("\n{indent}{key}\n{indent}{{\n{indent}}}");
    Ok(splice(&text, at, &block))
}

fn insertion_point(text: &str, layout: &Layout, parent: &str) -> Result<usize, DictError> {
    if parent.is_empty() {
        return Ok(layout.children_end("").unwrap_or(text.trim_end().len()));
    }
    let block = layout.block(parent).ok_or_else(|| DictError::MissingBlock {
        path: parent.to_string(),
    })?;
    Ok(layout
        .children_end(parent)
        .filter(|end| *end <= block.close)
        .unwrap_or(block.open + 1))
}

fn splice(text: &str, at: usize, insert: &str) -> String {
    let mut out = String::with_capacity(text.len() + insert.len());
    out.push_str(&text[..at]);
    out.push_str(insert);
    out.push_str(&text[at..]);
    out
}

fn keep_dimensions(old: &str, new: &str) -> String {
    if new.contains('[') {
        return new.to_string();
    }
    match (old.find('['), old.rfind(']')) {
        (Some(open), Some(close)) if open < close => format!("{} {new}", &old[..=close]),
        _ => new.to_string(),
    }
}

/// Wrap `body` in a standard dictionary header for `object`.
pub fn foam_file(object: &str, body: &str) -> String {
    format!(
        "FoamFile\n\
         {{\n    \
         version     2.0;\n    \
         format      ascii;\n    \
         class       dictionary;\n    \
         object      {object};\n\
         }}\n\
         // * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * * //\n\n\
         {body}\n\
         // ************************************************************************* //\n"
    )
}
