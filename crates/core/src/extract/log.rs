//! Run-scoped log buffer.
//!
//! Every line is kept as `[LEVL] message key="value"` and mirrored to
//! `tracing`. Error lines are also collected as run errors.

use std::fmt::{Display, Write};

use tracing::Level;

/// A key and its display value.
pub type Field<'a> = (&'a str, &'a dyn Display);

/// Log lines and errors collected during one extraction.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    context: Vec<(String, String)>,
    lines: Vec<String>,
    errors: Vec<String>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field written on every following line.
    pub fn with_field(&mut self, key: &str, value: impl Display) {
        self.context.push((key.to_string(), value.to_string()));
    }

    /// Record one line.
    pub fn log(&mut self, level: Level, msg: &str, fields: &[Field<'_>]) {
        let mut line = String::from(msg);
        for (key, value) in fields {
            let _ = write!(line, " {}={:?}", key, value.to_string());
        }
        for (key, value) in &self.context {
            let _ = write!(line, " {}={:?}", key, value);
        }

        match level {
            Level::ERROR => tracing::error!("{}", line),
            Level::WARN => tracing::warn!("{}", line),
            Level::INFO => tracing::info!("{}", line),
            Level::DEBUG => tracing::debug!("{}", line),
            Level::TRACE => tracing::trace!("{}", line),
        }

        let prefix: String = level.as_str().chars().take(4).collect();
        self.lines.push(format!("[{}] {}", prefix, line));
        if level == Level::ERROR {
            self.errors.push(line);
        }
    }

    pub fn debug(&mut self, msg: &str, fields: &[Field<'_>]) {
        self.log(Level::DEBUG, msg, fields);
    }

    pub fn info(&mut self, msg: &str, fields: &[Field<'_>]) {
        self.log(Level::INFO, msg, fields);
    }

    pub fn warn(&mut self, msg: &str, fields: &[Field<'_>]) {
        self.log(Level::WARN, msg, fields);
    }

    pub fn error(&mut self, msg: &str, fields: &[Field<'_>]) {
        self.log(Level::ERROR, msg, fields);
    }

    /// Record an error without writing a log line.
    pub fn push_error(&mut self, error: impl Display) {
        self.errors.push(error.to_string());
    }

    /// Append lines already formatted and traced elsewhere.
    pub fn append_lines(&mut self, lines: impl IntoIterator<Item = String>) {
        self.lines.extend(lines);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}
