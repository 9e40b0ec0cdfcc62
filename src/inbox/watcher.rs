// SPDX-License-Identifier: MIT
//! Debounced inbox watcher: file-system watch semantics vary by platform,
//! so every fired event batch is treated as a hint that triggers a full
//! directory rescan rather than a source of truth about exactly what
//! changed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_full::notify::Watcher;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::storage::InboxStore;

const DEBOUNCE: Duration = Duration::from_millis(50);
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const MAX_OPEN_ATTEMPTS: u32 = 6;

/// Delivery sink invoked once per message, in send order, during a
/// processing pass.
pub trait Deliver: Send + Sync {
    fn deliver(&self, message: super::model::MailMessage);
}

/// Drains `owner`'s inbox once: lists messages in sorted order, delivers
/// each, and deletes the file regardless of delivery outcome. A file that
/// failed to read or parse is deleted without a delivery call, so a poison
/// message is dropped after this one attempt instead of being re-read on
/// every future pass.
pub fn process_once(store: &InboxStore, owner: &str, sink: &dyn Deliver) {
    for (path, msg) in store.list_sorted(owner) {
        match msg {
            Some(msg) => sink.deliver(msg),
            None => warn!(path = %path.display(), "dropping unparseable inbox message"),
        }
        store.delete(&path);
    }
}

/// Runs a debounced watch of `owner`'s inbox directory, invoking a full
/// rescan-and-deliver pass on every coalesced batch of filesystem events.
/// Concurrent passes are serialized by an in-process flag: a pass that
/// arrives while one is already running is folded into a single pending
/// re-run once the current pass finishes.
pub struct InboxWatcher {
    shutdown: mpsc::Sender<()>,
}

impl InboxWatcher {
    pub fn spawn(store: Arc<InboxStore>, owner: String, watch_path: PathBuf, sink: Arc<dyn Deliver>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (event_tx, mut event_rx) = mpsc::channel::<()>(64);
        let processing = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicBool::new(false));

        let watch_owner = owner.clone();
        std::thread::spawn(move || run_watcher_thread(watch_owner, watch_path, event_tx));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    event = event_rx.recv() => {
                        if event.is_none() {
                            break;
                        }
                        run_pass_coalesced(&store, &owner, sink.as_ref(), &processing, &pending).await;
                    }
                }
            }
        });

        Self { shutdown: shutdown_tx }
    }

    pub async fn stop(&self) {
        let _ = self.shutdown.send(()).await;
    }
}

async fn run_pass_coalesced(
    store: &InboxStore,
    owner: &str,
    sink: &dyn Deliver,
    processing: &AtomicBool,
    pending: &AtomicBool,
) {
    if processing.swap(true, Ordering::AcqRel) {
        pending.store(true, Ordering::Release);
        return;
    }
    loop {
        process_once(store, owner, sink);
        pending.store(false, Ordering::Release);
        processing.store(false, Ordering::Release);
        if !pending.swap(false, Ordering::AcqRel) {
            break;
        }
        processing.store(true, Ordering::Release);
    }
}

/// Runs on a dedicated OS thread: opens a debounced watch with exponential
/// backoff on failure, and forwards one hint per coalesced batch.
fn run_watcher_thread(owner: String, watch_path: PathBuf, event_tx: mpsc::Sender<()>) {
    let mut backoff = BACKOFF_BASE;
    for attempt in 0..MAX_OPEN_ATTEMPTS {
        let tx = event_tx.clone();
        let handler = move |result: DebounceEventResult| {
            if result.is_ok() {
                let _ = tx.blocking_send(());
            }
        };
        let _ = std::fs::create_dir_all(&watch_path);
        match new_debouncer(DEBOUNCE, None, handler) {
            Ok(mut debouncer) => {
                if debouncer
                    .watcher()
                    .watch(&watch_path, notify_debouncer_full::notify::RecursiveMode::NonRecursive)
                    .is_ok()
                {
                    // Park this thread for the debouncer's lifetime; dropping
                    // it tears down the OS watch.
                    loop {
                        std::thread::sleep(Duration::from_secs(3600));
                    }
                }
                warn!(attempt, path = %watch_path.display(), "failed to watch inbox directory");
            }
            Err(e) => warn!(attempt, error = %e, "failed to open debouncer"),
        }
        std::thread::sleep(backoff);
        backoff = (backoff * 2).min(BACKOFF_CAP);
    }
    debug!(owner, "giving up on watcher after exhausting retry budget; relying on explicit flushes");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbox::storage::InboxStore;
    use crate::paths::Layout;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct CollectingSink {
        messages: StdMutex<Vec<String>>,
    }

    impl Deliver for CollectingSink {
        fn deliver(&self, message: super::super::model::MailMessage) {
            self.messages.lock().unwrap().push(message.text);
        }
    }

    #[test]
    fn process_once_delivers_and_deletes() {
        let dir = tempdir().unwrap();
        let store = InboxStore::new(Layout::new(dir.path()));
        store.send("Sender", "Owner", "one", None).unwrap();
        store.send("Sender", "Owner", "two", None).unwrap();

        let sink = CollectingSink { messages: StdMutex::new(Vec::new()) };
        process_once(&store, "Owner", &sink);

        assert_eq!(*sink.messages.lock().unwrap(), vec!["one", "two"]);
        assert!(store.list_sorted("Owner").is_empty());
    }

    #[test]
    fn process_once_drops_poison_message_after_one_attempt() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let store = InboxStore::new(layout.clone());
        std::fs::create_dir_all(layout.inbox_dir("Owner")).unwrap();
        std::fs::write(layout.inbox_dir("Owner").join("bad.json"), b"not json").unwrap();

        let sink = CollectingSink { messages: StdMutex::new(Vec::new()) };
        process_once(&store, "Owner", &sink);

        assert!(sink.messages.lock().unwrap().is_empty());
        assert!(store.list_sorted("Owner").is_empty(), "poison file must be deleted after one attempt");
    }
}
