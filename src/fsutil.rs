//! Shared atomic-write helpers.
//!
//! Every shared JSON file (registrations, claims, completions, plan/task
//! files) is written via write-to-temp-then-rename so a reader never
//! observes a half-written file. Single-writer files (an agent's own
//! registration, inbox messages) may write directly

use std::path::Path;

use rand::Rng;

/// Write `contents` to `path` atomically: write to a sibling temp file, then
/// rename over the destination. `rename` is atomic on the same filesystem on
/// both POSIX and Windows, so readers see either the old or the new content,
/// never a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let suffix: u32 = rand::thread_rng().gen();
    let tmp = parent.join(format!(
        ".{}.tmp{:08x}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("write"),
        suffix
    ));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

/// Generate a lexicographically-sortable filename stem: millisecond
/// timestamp followed by a random suffix, so concurrent writers in the same
/// directory almost never collide and readers recover send order by sorting
/// filenames.
pub fn timestamped_filename(ext: &str) -> String {
    let ts = chrono::Utc::now().timestamp_millis();
    let rand_suffix: u32 = rand::thread_rng().gen_range(0..0xFFFF_FFFFu32);
    format!("{ts:016x}-{rand_suffix:08x}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomic_creates_parent_and_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("f.json");
        write_atomic(&path, b"{\"a\":1}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn write_atomic_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn timestamped_filenames_sort_with_time() {
        let a = timestamped_filename("json");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = timestamped_filename("json");
        assert!(a < b);
    }
}
