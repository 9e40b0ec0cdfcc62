//! Activity feed: append-only JSONL, pruned to a retention
//! window at process startup. Advisory, not durable — lost writes are
//! acceptable, so appends use a direct open/append rather than the
//! write-to-temp-then-rename discipline reserved for shared mutable state.

use std::io::Write;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::fsutil::write_atomic;
use crate::paths::Layout;
use crate::registry::model::now_millis;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEvent {
    pub ts: i64,
    pub agent: String,
    pub kind: String,
    #[serde(flatten)]
    pub extra: Value,
}

impl FeedEvent {
    pub fn new(agent: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            ts: now_millis(),
            agent: agent.into(),
            kind: kind.into(),
            extra: Value::Object(Default::default()),
        }
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = extra;
        self
    }
}

pub struct Feed {
    layout: Layout,
}

impl Feed {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Append one event. Failures are absorbed ("I/O... silently
    /// absorbed where non-fatal (feed, cache, status updates)").
    pub fn append(&self, event: &FeedEvent) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        let path = self.layout.feed_file();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(&path);
        match file {
            Ok(mut f) => {
                let _ = writeln!(f, "{line}");
            }
            Err(e) => warn!(error = %e, "feed append failed, dropping event"),
        }
    }

    /// Read every parseable event currently on disk, in file order.
    pub fn read_all(&self) -> Vec<FeedEvent> {
        let Ok(text) = std::fs::read_to_string(self.layout.feed_file()) else {
            return Vec::new();
        };
        text.lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Truncate the on-disk feed to the most recent `retention` events,
    /// called once at process startup.
    pub fn prune_startup(&self, retention: usize) {
        let mut events = self.read_all();
        if events.len() <= retention {
            return;
        }
        let drop = events.len() - retention;
        events.drain(0..drop);
        let mut body = Vec::new();
        for event in &events {
            if let Ok(line) = serde_json::to_string(event) {
                body.extend_from_slice(line.as_bytes());
                body.push(b'\n');
            }
        }
        let _ = write_atomic(&self.layout.feed_file(), &body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let feed = Feed::new(Layout::new(dir.path()));
        feed.append(&FeedEvent::new("Atlas", "join"));
        feed.append(&FeedEvent::new("Atlas", "edit"));
        let events = feed.read_all();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, "edit");
    }

    #[test]
    fn prune_keeps_most_recent_n() {
        let dir = tempdir().unwrap();
        let feed = Feed::new(Layout::new(dir.path()));
        for i in 0..10 {
            feed.append(&FeedEvent::new("Atlas", format!("event-{i}")));
        }
        feed.prune_startup(3);
        let events = feed.read_all();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, "event-7");
        assert_eq!(events[2].kind, "event-9");
    }

    #[test]
    fn prune_is_noop_under_retention() {
        let dir = tempdir().unwrap();
        let feed = Feed::new(Layout::new(dir.path()));
        feed.append(&FeedEvent::new("Atlas", "join"));
        feed.prune_startup(50);
        assert_eq!(feed.read_all().len(), 1);
    }
}
