//! Best-effort git branch lookup.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

/// Returns the current branch name for `cwd`, or `None` if `git` is missing,
/// the directory is not a repo, HEAD is detached in an unparseable way, or
/// the subprocess does not finish within the timeout.
pub fn current_branch(cwd: &Path) -> Option<String> {
    let mut child = std::process::Command::new("git")
        .arg("rev-parse")
        .arg("--abbrev-ref")
        .arg("HEAD")
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;

    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(2);
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    return None;
                }
                let mut out = String::new();
                use std::io::Read;
                child.stdout.take()?.read_to_string(&mut out).ok()?;
                let branch = out.trim();
                return if branch.is_empty() || branch == "HEAD" {
                    None
                } else {
                    Some(branch.to_string())
                };
            }
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(_) => return None,
        }
    }
}
