//! Timestamped record of what ran where

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::info;

use crate::id::ThreadId;
use crate::runtime::{Context, lock};

/// One journal line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Time since the journal was created
    pub at: Duration,
    pub thread: ThreadId,
    pub thread_name: String,
    pub source: String,
    pub event: String,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>8.3}s] {:<14} {:<8} {}",
            self.at.as_secs_f64(),
            self.thread_name,
            self.source,
            self.event
        )
    }
}

/// Append-only log shared by every thread in a scenario
#[derive(Debug, Clone)]
pub struct Journal {
    origin: Instant,
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

impl Journal {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record `event` as seen by code running with `ctx`
    pub fn record(&self, ctx: &Context, source: &str, event: impl Into<String>) {
        let event = event.into();
        let thread_name = ctx
            .handle()
            .map(|h| h.name().to_string())
            .unwrap_or_else(|| "foreign".to_string());
        info!(thread = %ctx.thread(), name = %thread_name, source, event = %event, "journal");
        lock(&self.entries).push(Entry {
            at: self.origin.elapsed(),
            thread: ctx.thread(),
            thread_name,
            source: source.to_string(),
            event,
        });
    }

    pub fn entries(&self) -> Vec<Entry> {
        lock(&self.entries).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the first entry whose event starts with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        lock(&self.entries).iter().position(|e| e.event.starts_with(prefix))
    }

    /// First entry whose event starts with `prefix`
    pub fn find(&self, prefix: &str) -> Option<Entry> {
        lock(&self.entries).iter().find(|e| e.event.starts_with(prefix)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EventLoop;

    #[test]
    fn test_record_names_thread() {
        let journal = Journal::new();
        let event_loop = EventLoop::new(ThreadId::next(), "main");
        journal.record(&event_loop.context(), "window", "opened");
        journal.record(&Context::foreign(), "button", "pressed");

        let entries = journal.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].thread_name, "main");
        assert_eq!(entries[1].thread_name, "foreign");
        assert!(entries[1].thread.is_foreign());
        assert!(entries[0].at <= entries[1].at);
    }

    #[test]
    fn test_position_and_find_match_prefix() {
        let journal = Journal::new();
        let ctx = Context::foreign();
        journal.record(&ctx, "worker", "run_it (starting)");
        journal.record(&ctx, "worker", "run_it (finished)");

        assert_eq!(journal.position("run_it (finished"), Some(1));
        assert_eq!(journal.find("run_it").map(|e| e.event), Some("run_it (starting)".to_string()));
        assert!(journal.position("missing").is_none());
    }

    #[test]
    fn test_entry_display() {
        let entry = Entry {
            at: Duration::from_millis(1500),
            thread: ThreadId::from_raw(2),
            thread_name: "worker".to_string(),
            source: "worker".to_string(),
            event: "starting".to_string(),
        };
        let line = entry.to_string();
        assert!(line.contains("1.500s"));
        assert!(line.ends_with("starting"));
    }
}
