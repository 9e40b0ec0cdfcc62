//! Process liveness probe.
//!
//! Every staleness check in the registry, reservations, and swarm claims
//! funnels through [`is_alive`]. On Unix this sends signal 0 via `libc::kill`,
//! which does not deliver a signal but reports whether the target PID exists
//! and is reachable. Any error other than "no such process" (e.g. permission
//! denied on a PID owned by another user) conservatively reports the process
//! as alive, so a transient or permissions failure never evicts a live agent.
//!
//! Signal 0 alone is not enough: a crashed-but-unreaped child reports as
//! existing even though it will never do anything again. On Linux, a
//! process that `kill(pid, 0)` sees is additionally checked against
//! `/proc/<pid>/stat`'s state field and treated as dead if it is `Z`
//! (zombie).

/// Returns true iff the OS reports process `pid` exists and, on Linux, is
/// not a zombie.
///
/// On non-Unix targets this always returns `true`: there is no cheap
/// zero-signal probe available, and conservatively assuming liveness is
/// safer than spuriously evicting live agents.
pub fn is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        if rc != 0 {
            // ESRCH: no such process. Anything else (EPERM, ...) is treated as alive.
            return std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH);
        }
        #[cfg(target_os = "linux")]
        {
            return !is_zombie(pid);
        }
        #[cfg(not(target_os = "linux"))]
        {
            return true;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Reads `/proc/<pid>/stat` and checks the process state field for `Z`
/// (zombie). The `comm` field can itself contain parentheses, so the state
/// is found after the *last* `)` rather than the first.
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    match stat.rfind(')') {
        Some(idx) => stat[idx + 1..].trim_start().starts_with('Z'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn bogus_pid_is_dead() {
        // Beyond the Linux PID range; guaranteed not to exist.
        assert!(!is_alive(4_194_304));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn zombie_child_is_dead() {
        let mut child = std::process::Command::new("true").spawn().expect("spawn /bin/true");
        let pid = child.id();
        // Give the child time to exit; without `wait()` it stays a zombie.
        for _ in 0..50 {
            if is_zombie(pid) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert!(!is_alive(pid));
        let _ = child.wait();
    }
}
