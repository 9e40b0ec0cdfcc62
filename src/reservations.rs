//! Path-pattern reservations.
//!
//! A reservation lives on its owning agent's registration record, so this
//! module is a thin query layer over `Registry::list_active_agents` rather
//! than its own storage — there is nothing to persist beyond what the
//! registry already holds.

use crate::error::ReservationError;
use crate::registry::{Registration, Registry};

/// One conflicting reservation, enough detail for the integrating tool to
/// name the blocking agent.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub agent: String,
    pub pattern: String,
    pub cwd: String,
    pub git_branch: Option<String>,
}

/// True if `pattern` matches `path`: exact equality, or `pattern` denotes a
/// directory that is a strict prefix of `path`.
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    if pattern == path {
        return true;
    }
    let prefix = pattern.strip_suffix('/').unwrap_or(pattern);
    path.starts_with(prefix) && path[prefix.len()..].starts_with('/')
}

/// Scans peers' records (excluding `self_name`) for reservations whose
/// pattern matches `path`. Read operations should ignore the result; write
/// operations should turn any conflict into [`ReservationError::Conflict`].
pub fn check_conflict(registry: &Registry, self_name: &str, path: &str) -> Vec<Conflict> {
    let outcome = registry.list_active_agents(Some(self_name), None);
    outcome
        .agents
        .iter()
        .flat_map(|agent: &Registration| {
            agent
                .reservations
                .iter()
                .filter(|res| pattern_matches(&res.pattern, path))
                .map(|res| Conflict {
                    agent: agent.name.clone(),
                    pattern: res.pattern.clone(),
                    cwd: agent.cwd.clone(),
                    git_branch: agent.git_branch.clone(),
                })
        })
        .collect()
}

/// Convenience for a write/edit probe: the first conflict becomes an error.
pub fn check_conflict_for_write(
    registry: &Registry,
    self_name: &str,
    path: &str,
) -> Result<(), ReservationError> {
    match check_conflict(registry, self_name, path).into_iter().next() {
        Some(c) => Err(ReservationError::Conflict {
            path: path.to_string(),
            agent: c.agent,
            pattern: c.pattern,
            cwd: c.cwd,
            git_branch: c.git_branch,
        }),
        None => Ok(()),
    }
}
