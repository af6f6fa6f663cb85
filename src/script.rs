//! Script source supply: non-blank lines handed out on demand.

use std::fs;
use std::path::Path;

use crate::error::ScriptError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text {
        text: String,
        /// 1-based line number in the original source.
        number: usize,
        /// Byte offset of the line within the original source.
        offset: usize,
    },
    /// The supply is exhausted.
    Eof,
}

#[derive(Debug, Clone)]
struct SourceLine {
    text: String,
    number: usize,
    offset: usize,
}

#[derive(Debug, Clone)]
pub struct ScriptSource {
    name: Option<String>,
    text: String,
    lines: Vec<SourceLine>,
    cursor: usize,
    exhausted: bool,
}

impl ScriptSource {
    /// Reads the whole file up front; an unreadable file fails before any
    /// line is handed out.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ScriptError::Open {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), bytes = text.len(), "script loaded");
        Ok(Self::build(Some(path.display().to_string()), text))
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::build(None, text.into())
    }

    fn build(name: Option<String>, text: String) -> Self {
        let mut lines = Vec::new();
        let mut offset = 0;
        for (index, raw) in text.split_inclusive('\n').enumerate() {
            let line = raw.trim_end_matches(['\n', '\r']);
            if !line.trim().is_empty() {
                lines.push(SourceLine {
                    text: line.to_string(),
                    number: index + 1,
                    offset,
                });
            }
            offset += raw.len();
        }
        Self {
            name,
            text,
            lines,
            cursor: 0,
            exhausted: false,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Full original text, for rendering diagnostics.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Next non-blank line, then [`Line::Eof`] once. Asking again after
    /// `Eof` is an overflow.
    pub fn next_line(&mut self) -> Result<Line, ScriptError> {
        if self.exhausted {
            return Err(ScriptError::Overflow);
        }
        match self.lines.get(self.cursor) {
            Some(line) => {
                self.cursor += 1;
                Ok(Line::Text {
                    text: line.text.clone(),
                    number: line.number,
                    offset: line.offset,
                })
            }
            None => {
                self.exhausted = true;
                Ok(Line::Eof)
            }
        }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        self.exhausted = false;
    }
}
