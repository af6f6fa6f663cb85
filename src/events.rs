//! Diagnostic log sink.
//!
//! Every fatal or warning diagnostic handed to [`EventLog::record`] is kept
//! for the end-of-run report and mirrored to `tracing`. Recording never fails
//! and never needs acknowledging.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::{Diagnostic, Severity};

#[derive(Debug, Clone)]
pub struct Event {
    pub diagnostic: Diagnostic,
    /// 1-based script line the diagnostic came from, when known.
    pub line: Option<usize>,
    /// Byte offset of that line within the whole script.
    pub offset: usize,
}

#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps `diagnostic` if it is a fatal error or a warning.
    pub fn record(&mut self, diagnostic: &Diagnostic, line: Option<usize>, offset: usize) {
        match diagnostic.severity {
            Severity::Fatal => {
                tracing::error!(code = ?diagnostic.code, line, detail = diagnostic.detail.as_deref(), "fatal")
            }
            Severity::Warning => {
                tracing::warn!(code = ?diagnostic.code, line, detail = diagnostic.detail.as_deref(), "warning")
            }
            Severity::Normal => return,
        }
        self.events.push(Event {
            diagnostic: diagnostic.clone(),
            line,
            offset,
        });
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn fatal_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| event.diagnostic.is_fatal())
            .count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn write_report(&self, out: &mut impl Write) -> io::Result<()> {
        if self.events.is_empty() {
            return writeln!(out, "No Events");
        }
        for (i, event) in self.events.iter().enumerate() {
            let diagnostic = &event.diagnostic;
            writeln!(out, "Count:{}", i + 1)?;
            writeln!(out, "Code:{:?}", diagnostic.code)?;
            match diagnostic.severity {
                Severity::Fatal => writeln!(out, "Priority:Fatal")?,
                Severity::Warning => writeln!(out, "Priority:Warning")?,
                Severity::Normal => {}
            }
            if let Some(line) = event.line {
                writeln!(out, "Line:{}", line)?;
            }
            if let Some(detail) = diagnostic.detail.as_deref().filter(|d| !d.is_empty()) {
                writeln!(out, "Detail:{}", detail)?;
            }
        }
        Ok(())
    }

    /// Truncates `path` and writes the report into it.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_report(&mut out)?;
        out.flush()
    }
}
