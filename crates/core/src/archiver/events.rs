//! Archiver progress events.

use std::fmt;

use parking_lot::Mutex;

/// Something that happened while archiving. Events are advisory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A document starts being archived.
    StartHtml { uri: String },
    /// A resource is fetched, or taken from the cache.
    FetchUrl { uri: String, parent: String, cached: bool },
    /// A reference is left as is (empty, `data:`, fragment, not http(s), or loop).
    Skip { uri: String },
    /// A resource could not be archived.
    Error { error: String, uri: String },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::StartHtml { uri } => write!(f, "start archive {uri}"),
            Event::FetchUrl { uri, parent, cached: true } => write!(f, "{uri} (cached) (from {parent})"),
            Event::FetchUrl { uri, parent, cached: false } => write!(f, "{uri} (from {parent})"),
            Event::Skip { uri } => write!(f, "skip {uri}"),
            Event::Error { error, uri } => write!(f, "{uri}: {error}"),
        }
    }
}

/// Receives archiver events.
pub trait EventSink: Send + Sync {
    fn send(&self, event: &Event);
}

fn trace(event: &Event) {
    match event {
        Event::StartHtml { uri } => tracing::info!(uri = %uri, "start archive"),
        Event::FetchUrl { uri, parent, cached } => tracing::debug!(uri = %uri, parent = %parent, cached, "fetch"),
        Event::Skip { uri } => tracing::debug!(uri = %uri, "skip"),
        Event::Error { error, uri } => tracing::warn!(uri = %uri, error = %error, "archive error"),
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEvents;

impl EventSink for TracingEvents {
    fn send(&self, event: &Event) {
        trace(event);
    }
}

/// Forwards events to `tracing` and keeps them as log lines.
#[derive(Debug, Default)]
pub struct EventLog {
    lines: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines recorded so far, formatted like run log lines.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Number of error events.
    pub fn errors(&self) -> usize {
        self.lines.lock().iter().filter(|l| l.starts_with("[WARN]")).count()
    }
}

impl EventSink for EventLog {
    fn send(&self, event: &Event) {
        trace(event);
        let level = match event {
            Event::Error { .. } => "WARN",
            Event::StartHtml { .. } => "INFO",
            _ => "DEBU",
        };
        self.lines.lock().push(format!("[{level}] archiver: {event}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_event_log() {
        let log = EventLog::new();
        log.send(&Event::StartHtml { uri: "https://example.net/".into() });
        log.send(&Event::FetchUrl {
            uri: "https://example.net/a.png".into(),
            parent: "https://example.net/".into(),
            cached: true,
        });
        log.send(&Event::Error { error: "not an image".into(), uri: "https://example.net/b.png".into() });

        assert_eq!(
            log.lines(),
            vec![
                "[INFO] archiver: start archive https://example.net/",
                "[DEBU] archiver: https://example.net/a.png (cached) (from https://example.net/)",
                "[WARN] archiver: https://example.net/b.png: not an image",
            ]
        );
        assert_eq!(log.errors(), 1);
    }
}
