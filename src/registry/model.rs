//! Registry data model: one record per live agent registration.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionCounters {
    #[serde(default)]
    pub tool_calls: u64,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub files_modified: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub pattern: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub name: String,
    pub pid: u32,
    pub session_id: String,
    pub cwd: String,
    pub model: Option<String>,
    pub started_at: i64,
    pub git_branch: Option<String>,
    pub spec: Option<String>,
    pub is_human: bool,
    #[serde(default)]
    pub session: SessionCounters,
    pub activity: i64,
    #[serde(default)]
    pub reservations: Vec<Reservation>,
    pub status_message: Option<String>,
}

impl Registration {
    pub fn new(name: impl Into<String>, pid: u32, session_id: impl Into<String>, cwd: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            name: name.into(),
            pid,
            session_id: session_id.into(),
            cwd: cwd.into(),
            model: None,
            started_at: now,
            git_branch: None,
            spec: None,
            is_human: false,
            session: SessionCounters::default(),
            activity: now,
            reservations: Vec::new(),
            status_message: None,
        }
    }

    pub fn touch(&mut self) {
        self.activity = now_millis();
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
