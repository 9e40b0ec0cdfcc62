//! Swarm claims: atomic single-claim-per-agent task assignment
//! over a pair of JSON files guarded by an advisory lock.

pub mod lock;
pub mod model;

use tracing::debug;

use crate::error::{ClaimLocation, SwarmError};
use crate::fsutil::write_atomic;
use crate::liveness::is_alive;
use crate::paths::Layout;
use crate::registry::Registry;

pub use model::{Claim, Completion};
use model::RecordMap;

pub struct SwarmStore {
    layout: Layout,
}

impl SwarmStore {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    fn load<T: serde::de::DeserializeOwned + Default>(&self, path: &std::path::Path) -> RecordMap<T> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    fn save<T: serde::Serialize>(&self, path: &std::path::Path, map: &RecordMap<T>) -> std::io::Result<()> {
        let body = serde_json::to_vec_pretty(map).expect("claim/completion maps always serialize");
        write_atomic(path, &body)
    }

    /// Removes stale claims: dead PID, no matching registration, or a
    /// registration whose session differs (agent restarted). Returns
    /// whether anything was removed, so the caller can decide to persist
    /// the cleaned structure even when the triggering mutation itself fails
    ///.
    fn cleanup_stale(&self, claims: &mut RecordMap<Claim>, registry: &Registry) -> bool {
        let mut changed = false;
        let mut empty_specs = Vec::new();
        for (spec, bucket) in claims.iter_mut() {
            let mut stale_tasks = Vec::new();
            for (task_id, claim) in bucket.iter() {
                let stale = !is_alive(claim.pid)
                    || match registry.lookup(&claim.agent) {
                        None => true,
                        Some(reg) => reg.session_id != claim.session_id,
                    };
                if stale {
                    stale_tasks.push(task_id.clone());
                }
            }
            for task_id in stale_tasks {
                debug!(spec, task_id, "purging stale claim");
                bucket.remove(&task_id);
                changed = true;
            }
            if bucket.is_empty() {
                empty_specs.push(spec.clone());
            }
        }
        for spec in empty_specs {
            claims.remove(&spec);
        }
        changed
    }

    fn find_agent_claim(&self, claims: &RecordMap<Claim>, agent: &str) -> Option<ClaimLocation> {
        for (spec, bucket) in claims.iter() {
            for (task_id, claim) in bucket.iter() {
                if claim.agent == agent {
                    return Some(ClaimLocation {
                        spec: spec.clone(),
                        task_id: task_id.clone(),
                    });
                }
            }
        }
        None
    }

    pub fn claim(
        &self,
        registry: &Registry,
        spec: &str,
        task_id: &str,
        agent: &str,
        session_id: &str,
        pid: u32,
        reason: Option<String>,
    ) -> Result<Claim, SwarmError> {
        let _guard = lock::acquire(&self.layout.swarm_lock())?;
        let mut claims = self.load::<Claim>(&self.layout.claims_file());
        let dirty = self.cleanup_stale(&mut claims, registry);

        let result = if let Some(existing) = self.find_agent_claim(&claims, agent) {
            Err(SwarmError::AlreadyHaveClaim { existing })
        } else if model::get(&claims, spec, task_id).is_some() {
            Err(SwarmError::AlreadyClaimed {
                spec: spec.to_string(),
                task_id: task_id.to_string(),
            })
        } else {
            let claim = Claim::new(agent, session_id, pid, reason);
            model::insert(&mut claims, spec, task_id, claim.clone());
            Ok(claim)
        };

        if dirty || result.is_ok() {
            let _ = self.save(&self.layout.claims_file(), &claims);
        }
        result
    }

    pub fn unclaim(&self, registry: &Registry, spec: &str, task_id: &str, agent: &str) -> Result<(), SwarmError> {
        let _guard = lock::acquire(&self.layout.swarm_lock())?;
        let mut claims = self.load::<Claim>(&self.layout.claims_file());
        let dirty = self.cleanup_stale(&mut claims, registry);

        let result = match model::get(&claims, spec, task_id) {
            None => Err(SwarmError::NotClaimed {
                spec: spec.to_string(),
                task_id: task_id.to_string(),
            }),
            Some(claim) if claim.agent != agent => Err(SwarmError::NotYourClaim {
                spec: spec.to_string(),
                task_id: task_id.to_string(),
            }),
            Some(_) => {
                model::remove(&mut claims, spec, task_id);
                Ok(())
            }
        };

        if dirty || result.is_ok() {
            let _ = self.save(&self.layout.claims_file(), &claims);
        }
        result
    }

    /// Completes a task. Writes the completion record **before** removing
    /// the claim, so a failure between the two steps leaves a
    /// cleanable stale claim but never loses the completion.
    pub fn complete(
        &self,
        registry: &Registry,
        spec: &str,
        task_id: &str,
        agent: &str,
        notes: Option<String>,
    ) -> Result<Completion, SwarmError> {
        let _guard = lock::acquire(&self.layout.swarm_lock())?;
        let mut claims = self.load::<Claim>(&self.layout.claims_file());
        let dirty = self.cleanup_stale(&mut claims, registry);
        let mut completions = self.load::<Completion>(&self.layout.completions_file());

        if model::get(&completions, spec, task_id).is_some() {
            if dirty {
                let _ = self.save(&self.layout.claims_file(), &claims);
            }
            return Err(SwarmError::AlreadyCompleted {
                spec: spec.to_string(),
                task_id: task_id.to_string(),
            });
        }

        let result = match model::get(&claims, spec, task_id) {
            None => Err(SwarmError::NotClaimed {
                spec: spec.to_string(),
                task_id: task_id.to_string(),
            }),
            Some(claim) if claim.agent != agent => Err(SwarmError::NotYourClaim {
                spec: spec.to_string(),
                task_id: task_id.to_string(),
            }),
            Some(_) => {
                let completion = Completion::new(agent, notes);
                model::insert(&mut completions, spec, task_id, completion.clone());
                let _ = self.save(&self.layout.completions_file(), &completions);
                model::remove(&mut claims, spec, task_id);
                let _ = self.save(&self.layout.claims_file(), &claims);
                Ok(completion)
            }
        };

        if dirty && result.is_err() {
            let _ = self.save(&self.layout.claims_file(), &claims);
        }
        result
    }

    pub fn completion(&self, spec: &str, task_id: &str) -> Option<Completion> {
        let completions = self.load::<Completion>(&self.layout.completions_file());
        model::get(&completions, spec, task_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::Layout;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, SwarmStore, Registry) {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let store = SwarmStore::new(layout.clone());
        let registry = Registry::new(layout);
        (dir, store, registry)
    }

    #[test]
    fn claim_then_second_claim_on_same_task_fails() {
        let (_d, store, registry) = setup();
        registry.join(Some("A"), "A", std::process::id(), "s1", "/repo").unwrap();
        registry.join(Some("B"), "B", std::process::id(), "s2", "/repo").unwrap();

        store.claim(&registry, "spec.md", "T-1", "A", "s1", std::process::id(), None).unwrap();
        let err = store
            .claim(&registry, "spec.md", "T-1", "B", "s2", std::process::id(), None)
            .unwrap_err();
        assert_eq!(
            err,
            SwarmError::AlreadyClaimed { spec: "spec.md".into(), task_id: "T-1".into() }
        );
    }

    #[test]
    fn single_claim_rule_blocks_second_claim_by_same_agent() {
        let (_d, store, registry) = setup();
        registry.join(Some("A"), "A", std::process::id(), "s1", "/repo").unwrap();
        store.claim(&registry, "spec.md", "T-1", "A", "s1", std::process::id(), None).unwrap();

        let err = store
            .claim(&registry, "spec.md", "T-2", "A", "s1", std::process::id(), None)
            .unwrap_err();
        assert_eq!(
            err,
            SwarmError::AlreadyHaveClaim {
                existing: ClaimLocation { spec: "spec.md".into(), task_id: "T-1".into() }
            }
        );
    }

    #[test]
    fn complete_writes_completion_and_removes_claim() {
        let (_d, store, registry) = setup();
        registry.join(Some("A"), "A", std::process::id(), "s1", "/repo").unwrap();
        store.claim(&registry, "spec.md", "T-7", "A", "s1", std::process::id(), None).unwrap();

        store.complete(&registry, "spec.md", "T-7", "A", Some("work done".into())).unwrap();
        assert!(store.completion("spec.md", "T-7").is_some());

        // Reclaiming a completed task reports already_completed, not already_claimed.
        let err = store
            .claim(&registry, "spec.md", "T-7", "A", "s1", std::process::id(), None)
            .unwrap_err();
        assert_eq!(
            err,
            SwarmError::AlreadyCompleted { spec: "spec.md".into(), task_id: "T-7".into() }
        );
    }

    #[test]
    fn unclaim_by_non_owner_fails() {
        let (_d, store, registry) = setup();
        registry.join(Some("A"), "A", std::process::id(), "s1", "/repo").unwrap();
        registry.join(Some("B"), "B", std::process::id(), "s2", "/repo").unwrap();
        store.claim(&registry, "spec.md", "T-1", "A", "s1", std::process::id(), None).unwrap();

        let err = store.unclaim(&registry, "spec.md", "T-1", "B").unwrap_err();
        assert_eq!(
            err,
            SwarmError::NotYourClaim { spec: "spec.md".into(), task_id: "T-1".into() }
        );
    }

    #[test]
    fn cleanup_purges_dead_pid_claims() {
        let (dir, store, registry) = setup();
        let layout = Layout::new(dir.path());
        let mut claims: RecordMap<Claim> = RecordMap::new();
        model::insert(&mut claims, "spec.md", "T-1", Claim::new("Ghost", "s-old", 4_194_304, None));
        store.save(&layout.claims_file(), &claims).unwrap();

        registry.join(Some("A"), "A", std::process::id(), "s1", "/repo").unwrap();
        let claim = store.claim(&registry, "spec.md", "T-1", "A", "s1", std::process::id(), None).unwrap();
        assert_eq!(claim.agent, "A");
    }

    #[test]
    fn concurrent_claims_on_same_task_serialize_to_one_winner() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let registry = Registry::new(layout.clone());
        for i in 0..5 {
            registry
                .join(Some(&format!("Agent{i}")), &format!("Agent{i}"), std::process::id(), &format!("s{i}"), "/repo")
                .unwrap();
        }

        let barrier = Arc::new(Barrier::new(5));
        let successes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let layout = layout.clone();
                let barrier = Arc::clone(&barrier);
                let successes = Arc::clone(&successes);
                thread::spawn(move || {
                    let store = SwarmStore::new(layout.clone());
                    let registry = Registry::new(layout);
                    barrier.wait();
                    if store
                        .claim(&registry, "spec.md", "T-race", &format!("Agent{i}"), &format!("s{i}"), std::process::id(), None)
                        .is_ok()
                    {
                        successes.lock().unwrap().push(i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(successes.lock().unwrap().len(), 1);
    }
}
