//! Presence registry.
//!
//! Every mutation performs a full check-then-write sequence guarded by the
//! filesystem's atomic create/rename, rather than an in-process lock, since
//! the actual race is cross-process.

pub mod model;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::CoordinationError;
use crate::fsutil::write_atomic;
use crate::liveness::is_alive;
use crate::name::{validate, CandidateNames};
use crate::paths::Layout;

pub use model::{Registration, Reservation, SessionCounters};

const CACHE_TTL: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct CacheKey {
    self_name: Option<String>,
    scope_cwd: Option<String>,
}

struct CacheEntry {
    key: CacheKey,
    fetched_at: Instant,
    agents: Vec<Registration>,
}

/// Outcome of a listing pass: the live agents observed, plus the names of
/// any dead-PID records that were evicted during this pass. The caller,
/// typically the `Coordinator`, is responsible for logging a `leave` event
/// per eviction, since `Feed` depends on `Registry` and not the other way
/// around.
pub struct ListOutcome {
    pub agents: Vec<Registration>,
    pub evicted: Vec<String>,
}

/// Outcome of [`Registry::lookup_checked`].
pub enum LookupResult {
    Found(Registration),
    Malformed,
    Absent,
}

pub struct Registry {
    layout: Layout,
    cache: Mutex<Option<CacheEntry>>,
}

impl Registry {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            cache: Mutex::new(None),
        }
    }

    fn invalidate_cache(&self) {
        *self.cache.lock().unwrap() = None;
    }

    fn read_record(&self, name: &str) -> Option<Registration> {
        let path = self.layout.registration_file(name);
        let text = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn write_record(&self, reg: &Registration) -> std::io::Result<()> {
        let path = self.layout.registration_file(&reg.name);
        let body = serde_json::to_vec_pretty(reg).expect("Registration always serializes");
        write_atomic(&path, &body)
    }

    /// Attempt to claim `name` for (`pid`, `session_id`, `cwd`) by writing a
    /// fresh record, then reading it back to confirm this process actually
    /// won the race.
    fn try_claim(&self, name: &str, pid: u32, session_id: &str, cwd: &str) -> Result<Registration, CoordinationError> {
        self.try_claim_record(Registration::new(name, pid, session_id, cwd))
    }

    /// Write `reg` as-is, then read it back to confirm this process
    /// actually won the race. Unlike `try_claim`, the caller supplies the
    /// full record, so migrating a record to a new name (rename) preserves
    /// every field instead of resetting to a fresh registration.
    fn try_claim_record(&self, reg: Registration) -> Result<Registration, CoordinationError> {
        let name = reg.name.clone();
        let pid = reg.pid;
        let session_id = reg.session_id.clone();
        self.write_record(&reg).map_err(|_| CoordinationError::RaceLost)?;
        match self.read_record(&name) {
            Some(observed) if observed.pid == pid && observed.session_id == session_id => Ok(observed),
            _ => {
                // Someone else overwrote the file between our write and
                // read-back. Clean up only if it's still ours.
                if let Some(current) = self.read_record(&name) {
                    if current.pid == pid {
                        let _ = std::fs::remove_file(self.layout.registration_file(&name));
                    }
                }
                Err(CoordinationError::RaceLost)
            }
        }
    }

    /// Join the mesh. `requested_name` takes the explicit-name path (spec
    /// §4.2: live collision fails, dead collision overwrites); otherwise
    /// `base_name` walks the `base`, `base2`, ... candidate sequence.
    pub fn join(
        &self,
        requested_name: Option<&str>,
        base_name: &str,
        pid: u32,
        session_id: &str,
        cwd: &str,
    ) -> Result<Registration, CoordinationError> {
        let result = if let Some(explicit) = requested_name {
            validate(explicit)?;
            if let Some(existing) = self.read_record(explicit) {
                if is_alive(existing.pid) {
                    return Err(CoordinationError::NameTaken(explicit.to_string()));
                }
                info!(name = %explicit, dead_pid = existing.pid, "overwriting dead registration");
            }
            self.try_claim(explicit, pid, session_id, cwd)
        } else {
            validate(base_name)?;
            let mut last_err = CoordinationError::NameTaken(base_name.to_string());
            let mut result = None;
            for attempt in 0..3 {
                for candidate in CandidateNames::new(base_name) {
                    if let Some(existing) = self.read_record(&candidate) {
                        if is_alive(existing.pid) {
                            continue;
                        }
                    }
                    match self.try_claim(&candidate, pid, session_id, cwd) {
                        Ok(reg) => {
                            result = Some(Ok(reg));
                            break;
                        }
                        Err(e) => last_err = e,
                    }
                }
                if result.is_some() {
                    break;
                }
                debug!(attempt, base = base_name, "join race lost, retrying candidate scan");
            }
            result.unwrap_or(Err(last_err))
        };

        if result.is_ok() {
            self.invalidate_cache();
        }
        result
    }

    /// Persist reservations, spec, session counters, activity, and status
    /// for the caller's own record.
    pub fn update_activity(&self, reg: &mut Registration) -> std::io::Result<()> {
        reg.touch();
        self.write_record(reg)?;
        self.invalidate_cache();
        Ok(())
    }

    /// Rename: drain is the caller's responsibility via the injected
    /// callback (the `Inbox` depends on `Registry`, not vice versa, per the
    /// dependency order), so `rename` here assumes the inbox has already
    /// been drained and only performs the record swap + directory move.
    pub fn rename(&self, current: &Registration, new_name: &str) -> Result<Registration, CoordinationError> {
        if new_name == current.name {
            return Err(CoordinationError::SameName);
        }
        validate(new_name)?;
        if let Some(existing) = self.read_record(new_name) {
            if is_alive(existing.pid) {
                return Err(CoordinationError::NameTaken(new_name.to_string()));
            }
        }

        let mut renamed = current.clone();
        renamed.name = new_name.to_string();
        let claimed = self.try_claim_record(renamed)?;

        let _ = std::fs::remove_file(self.layout.registration_file(&current.name));
        self.invalidate_cache();

        let old_inbox = self.layout.inbox_dir(&current.name);
        let new_inbox = self.layout.inbox_dir(new_name);
        let _ = std::fs::create_dir_all(&new_inbox);
        if old_inbox.exists() {
            let _ = std::fs::remove_dir(&old_inbox);
        }

        Ok(claimed)
    }

    pub fn leave(&self, name: &str) {
        let _ = std::fs::remove_file(self.layout.registration_file(name));
        let inbox = self.layout.inbox_dir(name);
        let _ = std::fs::remove_dir(&inbox);
        self.invalidate_cache();
    }

    pub fn lookup(&self, name: &str) -> Option<Registration> {
        self.read_record(name)
    }

    /// Like `lookup`, but distinguishes a missing registration from a
    /// present-but-unparseable one, so a caller can tell "no such agent"
    /// apart from "that agent's record is corrupt".
    pub fn lookup_checked(&self, name: &str) -> LookupResult {
        let path = self.layout.registration_file(name);
        match std::fs::read_to_string(&path) {
            Err(_) => LookupResult::Absent,
            Ok(text) => match serde_json::from_str(&text) {
                Ok(reg) => LookupResult::Found(reg),
                Err(_) => LookupResult::Malformed,
            },
        }
    }

    /// List live agents, evicting dead-PID records. Results are cached for
    /// one second keyed by (self_name, scope_cwd); any mutation invalidates
    /// the whole cache rather than patching it in place.
    pub fn list_active_agents(&self, self_name: Option<&str>, scope_cwd: Option<&str>) -> ListOutcome {
        {
            let guard = self.cache.lock().unwrap();
            if let Some(entry) = guard.as_ref() {
                let same_key = entry.key.self_name.as_deref() == self_name
                    && entry.key.scope_cwd.as_deref() == scope_cwd;
                if same_key && entry.fetched_at.elapsed() < CACHE_TTL {
                    return ListOutcome {
                        agents: entry.agents.clone(),
                        evicted: Vec::new(),
                    };
                }
            }
        }

        let dir = self.layout.registry_dir();
        let mut agents = Vec::new();
        let mut evicted = Vec::new();

        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Ok(text) = std::fs::read_to_string(&path) else {
                    continue;
                };
                let Ok(reg) = serde_json::from_str::<Registration>(&text) else {
                    warn!(path = %path.display(), "skipping unparseable registration");
                    continue;
                };
                if !is_alive(reg.pid) {
                    let _ = std::fs::remove_file(&path);
                    evicted.push(reg.name.clone());
                    continue;
                }
                if let Some(me) = self_name {
                    if reg.name == me {
                        continue;
                    }
                }
                if let Some(cwd) = scope_cwd {
                    if reg.cwd != cwd {
                        continue;
                    }
                }
                agents.push(reg);
            }
        }

        *self.cache.lock().unwrap() = Some(CacheEntry {
            key: CacheKey {
                self_name: self_name.map(String::from),
                scope_cwd: scope_cwd.map(String::from),
            },
            fetched_at: Instant::now(),
            agents: agents.clone(),
        });

        ListOutcome { agents, evicted }
    }
}
