//! Advisory lock guarding `claims.json`/`completions.json`, acquired via
//! exclusive file create. A lock is stale if its mtime is older than 10s
//! **and** the PID it names is dead. Acquisition retries 50 times at 100ms
//! before giving up.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::SwarmError;
use crate::liveness::is_alive;

const STALE_AGE: Duration = Duration::from_secs(10);
const RETRY_COUNT: u32 = 50;
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize, Deserialize)]
struct LockPayload {
    pid: u32,
}

/// RAII guard: the lock file is removed when dropped.
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn is_stale(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return true;
    };
    let Ok(modified) = metadata.modified() else {
        return true;
    };
    let age = SystemTime::now().duration_since(modified).unwrap_or_default();
    if age < STALE_AGE {
        return false;
    }
    let Ok(text) = std::fs::read_to_string(path) else {
        return true;
    };
    match serde_json::from_str::<LockPayload>(&text) {
        Ok(payload) => !is_alive(payload.pid),
        Err(_) => true,
    }
}

/// Acquire the lock at `path`, forcibly removing it first if it is found
/// stale, and retrying up to [`RETRY_COUNT`] times at [`RETRY_INTERVAL`].
pub fn acquire(path: &Path) -> Result<LockGuard, SwarmError> {
    let payload = serde_json::to_vec(&LockPayload { pid: std::process::id() }).unwrap();

    for attempt in 0..=RETRY_COUNT {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::OpenOptions::new().create_new(true).write(true).open(path) {
            Ok(mut file) => {
                use std::io::Write;
                let _ = file.write_all(&payload);
                return Ok(LockGuard { path: path.to_path_buf() });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if is_stale(path) {
                    let _ = std::fs::remove_file(path);
                    continue;
                }
            }
            Err(_) => {}
        }
        if attempt < RETRY_COUNT {
            std::thread::sleep(RETRY_INTERVAL);
        }
    }
    Err(SwarmError::LockFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_and_drop_releases_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("swarm.lock");
        {
            let _guard = acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("swarm.lock");
        let dead_payload = serde_json::to_vec(&LockPayload { pid: 4_194_304 }).unwrap();
        std::fs::write(&path, &dead_payload).unwrap();
        // Backdate the mtime past the staleness threshold.
        let old = SystemTime::now() - Duration::from_secs(20);
        filetime_set(&path, old);

        let guard = acquire(&path).unwrap();
        drop(guard);
    }

    fn filetime_set(path: &Path, time: SystemTime) {
        let ft = time.duration_since(SystemTime::UNIX_EPOCH).unwrap();
        let file = std::fs::File::open(path).unwrap();
        let times = std::fs::FileTimes::new().set_modified(SystemTime::UNIX_EPOCH + ft);
        let _ = file.set_times(times);
    }
}
