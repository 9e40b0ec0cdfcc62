//! Plan/task/verdict data model for the Crew DAG scheduler.

use serde::{Deserialize, Serialize};

use crate::registry::model::now_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Ship,
    NeedsWork,
    MajorRethink,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub verdict: Verdict,
    pub summary: String,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub attempt_count: u32,
    pub last_review: Option<ReviewVerdict>,
    pub blocked_reason: Option<String>,
    pub summary: Option<String>,
    /// Markdown task specification body, stored alongside the JSON record
    /// in `tasks/<id>.md`.
    #[serde(skip)]
    pub body: String,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, depends_on: Vec<String>, body: String) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: TaskStatus::Todo,
            depends_on,
            assigned_to: None,
            attempt_count: 0,
            last_review: None,
            blocked_reason: None,
            summary: None,
            body,
        }
    }

    /// `done` requires `summary`; `blocked` requires `blockedReason`.
    pub fn invariant_holds(&self) -> bool {
        match self.status {
            TaskStatus::Done => self.summary.is_some(),
            TaskStatus::Blocked => self.blocked_reason.is_some(),
            _ => true,
        }
    }

    pub fn reset(&mut self) {
        self.status = TaskStatus::Todo;
        self.attempt_count = 0;
        self.assigned_to = None;
        self.summary = None;
        self.last_review = None;
        self.blocked_reason = None;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanProgress {
    pub total: usize,
    pub done: usize,
    pub blocked: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub prd_path: String,
    pub created_at: i64,
    pub progress: PlanProgress,
    /// Plan narrative stored in `plan.md`.
    #[serde(skip)]
    pub body: String,
}

impl Plan {
    pub fn new(prd_path: impl Into<String>, body: String) -> Self {
        Self {
            prd_path: prd_path.into(),
            created_at: now_millis(),
            progress: PlanProgress { total: 0, done: 0, blocked: 0 },
            body,
        }
    }
}
