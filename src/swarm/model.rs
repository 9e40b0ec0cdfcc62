//! Claim/completion data model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::registry::model::now_millis;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claim {
    pub agent: String,
    pub session_id: String,
    pub pid: u32,
    pub claimed_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Claim {
    pub fn new(agent: impl Into<String>, session_id: impl Into<String>, pid: u32, reason: Option<String>) -> Self {
        Self {
            agent: agent.into(),
            session_id: session_id.into(),
            pid,
            claimed_at: now_millis(),
            reason,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Completion {
    pub completed_by: String,
    pub completed_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Completion {
    pub fn new(completed_by: impl Into<String>, notes: Option<String>) -> Self {
        Self {
            completed_by: completed_by.into(),
            completed_at: now_millis(),
            notes,
        }
    }
}

/// `specPath -> taskId -> record`, the on-disk shape of both `claims.json`
/// and `completions.json`.
pub type RecordMap<T> = BTreeMap<String, BTreeMap<String, T>>;

pub fn get<'a, T>(map: &'a RecordMap<T>, spec: &str, task_id: &str) -> Option<&'a T> {
    map.get(spec).and_then(|bucket| bucket.get(task_id))
}

pub fn insert<T>(map: &mut RecordMap<T>, spec: &str, task_id: &str, value: T) {
    map.entry(spec.to_string()).or_default().insert(task_id.to_string(), value);
}

/// Removes the entry, also dropping the outer bucket if it becomes empty.
pub fn remove<T>(map: &mut RecordMap<T>, spec: &str, task_id: &str) {
    if let Some(bucket) = map.get_mut(spec) {
        bucket.remove(task_id);
        if bucket.is_empty() {
            map.remove(spec);
        }
    }
}
