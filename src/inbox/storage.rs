// SPDX-License-Identifier: MIT
//! Inbox file I/O: one file per message, lexicographically
//! sortable filenames so a directory listing recovers send order.

use crate::fsutil::timestamped_filename;
use crate::paths::Layout;
use crate::registry::model::now_millis;

use super::model::MailMessage;

pub struct InboxStore {
    layout: Layout,
}

impl InboxStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Write one message file to `to`'s inbox directory. Direct write, not
    /// atomic rename — this is a single-writer file ("Direct
    /// writes are acceptable only for single-writer files... inbox
    /// messages").
    pub fn send(&self, from: &str, to: &str, text: &str, reply_to: Option<String>) -> std::io::Result<MailMessage> {
        let msg = MailMessage {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            text: text.to_string(),
            timestamp: now_millis(),
            reply_to,
        };
        let dir = self.layout.inbox_dir(to);
        std::fs::create_dir_all(&dir)?;
        let filename = timestamped_filename("json");
        let body = serde_json::to_vec(&msg).expect("MailMessage always serializes");
        std::fs::write(dir.join(filename), body)?;
        Ok(msg)
    }

    /// List message files for `owner` in sorted (send) order. A file that
    /// fails to read or parse is still returned (as `None`) rather than
    /// silently dropped, so the caller can delete it after a single failed
    /// attempt instead of re-reading a poison message on every pass.
    pub fn list_sorted(&self, owner: &str) -> Vec<(std::path::PathBuf, Option<MailMessage>)> {
        let dir = self.layout.inbox_dir(owner);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut paths: Vec<_> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter(|p| p.file_name().and_then(|n| n.to_str()).map(|n| !n.starts_with('.')).unwrap_or(false))
            .collect();
        paths.sort();

        paths
            .into_iter()
            .map(|path| {
                let msg = std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|text| serde_json::from_str::<MailMessage>(&text).ok());
                (path, msg)
            })
            .collect()
    }

    pub fn delete(&self, path: &std::path::Path) {
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn send_and_list_preserves_order() {
        let dir = tempdir().unwrap();
        let store = InboxStore::new(Layout::new(dir.path()));
        store.send("Sender", "Owner", "first", None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        store.send("Sender", "Owner", "second", None).unwrap();

        let listed = store.list_sorted("Owner");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].1.as_ref().unwrap().text, "first");
        assert_eq!(listed[1].1.as_ref().unwrap().text, "second");
    }

    #[test]
    fn delete_removes_message_file() {
        let dir = tempdir().unwrap();
        let store = InboxStore::new(Layout::new(dir.path()));
        store.send("Sender", "Owner", "hi", None).unwrap();
        let listed = store.list_sorted("Owner");
        store.delete(&listed[0].0);
        assert!(store.list_sorted("Owner").is_empty());
    }

    #[test]
    fn list_sorted_surfaces_unparseable_file_path() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let store = InboxStore::new(layout.clone());
        std::fs::create_dir_all(layout.inbox_dir("Owner")).unwrap();
        std::fs::write(layout.inbox_dir("Owner").join("0001-poison.json"), b"not json").unwrap();

        let listed = store.list_sorted("Owner");
        assert_eq!(listed.len(), 1);
        assert!(listed[0].1.is_none());
    }

    #[test]
    fn ignores_rename_marker_file() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let store = InboxStore::new(layout.clone());
        std::fs::create_dir_all(layout.inbox_dir("Owner")).unwrap();
        std::fs::write(layout.rename_marker("Owner"), b"").unwrap();
        store.send("Sender", "Owner", "hi", None).unwrap();
        assert_eq!(store.list_sorted("Owner").len(), 1);
    }
}
