//! Crew on-disk I/O: plan, tasks, and block contexts as
//! individual files under a per-project `crew` directory.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CrewError;
use crate::fsutil::write_atomic;
use crate::paths::CrewLayout;

use super::model::{Plan, PlanProgress, Task, TaskStatus};

pub struct CrewStore {
    layout: CrewLayout,
}

#[derive(Serialize, Deserialize)]
struct TaskRecord {
    id: String,
    title: String,
    status: TaskStatus,
    #[serde(default)]
    depends_on: Vec<String>,
    assigned_to: Option<String>,
    #[serde(default)]
    attempt_count: u32,
    last_review: Option<super::model::ReviewVerdict>,
    blocked_reason: Option<String>,
    summary: Option<String>,
}

impl From<&Task> for TaskRecord {
    fn from(t: &Task) -> Self {
        Self {
            id: t.id.clone(),
            title: t.title.clone(),
            status: t.status,
            depends_on: t.depends_on.clone(),
            assigned_to: t.assigned_to.clone(),
            attempt_count: t.attempt_count,
            last_review: t.last_review.clone(),
            blocked_reason: t.blocked_reason.clone(),
            summary: t.summary.clone(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PlanRecord {
    prd_path: String,
    created_at: i64,
    progress: PlanProgress,
}

impl CrewStore {
    pub fn new(layout: CrewLayout) -> Self {
        Self { layout }
    }

    pub fn load_plan(&self) -> Result<Plan, CrewError> {
        let text = std::fs::read_to_string(self.layout.plan_json()).map_err(|_| CrewError::NoPlan)?;
        let record: PlanRecord = serde_json::from_str(&text).map_err(|_| CrewError::NoPlan)?;
        let body = std::fs::read_to_string(self.layout.plan_md()).unwrap_or_default();
        Ok(Plan {
            prd_path: record.prd_path,
            created_at: record.created_at,
            progress: record.progress,
            body,
        })
    }

    pub fn save_plan(&self, plan: &Plan) -> std::io::Result<()> {
        let record = PlanRecord {
            prd_path: plan.prd_path.clone(),
            created_at: plan.created_at,
            progress: plan.progress.clone(),
        };
        write_atomic(&self.layout.plan_json(), serde_json::to_vec_pretty(&record).unwrap().as_slice())?;
        std::fs::write(self.layout.plan_md(), &plan.body)
    }

    pub fn load_task(&self, id: &str) -> Option<Task> {
        let text = std::fs::read_to_string(self.layout.task_json(id)).ok()?;
        let record: TaskRecord = serde_json::from_str(&text).ok()?;
        let body = std::fs::read_to_string(self.layout.task_md(id)).unwrap_or_default();
        Some(Task {
            id: record.id,
            title: record.title,
            status: record.status,
            depends_on: record.depends_on,
            assigned_to: record.assigned_to,
            attempt_count: record.attempt_count,
            last_review: record.last_review,
            blocked_reason: record.blocked_reason,
            summary: record.summary,
            body,
        })
    }

    pub fn save_task(&self, task: &Task) -> std::io::Result<()> {
        let record = TaskRecord::from(task);
        write_atomic(&self.layout.task_json(&task.id), serde_json::to_vec_pretty(&record).unwrap().as_slice())?;
        std::fs::write(self.layout.task_md(&task.id), &task.body)
    }

    pub fn load_all_tasks(&self) -> Vec<Task> {
        let mut tasks = Vec::new();
        let Ok(entries) = std::fs::read_dir(self.layout.tasks_dir()) else {
            return tasks;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Some(task) = self.load_task(stem) {
                    tasks.push(task);
                }
            }
        }
        tasks.sort_by_key(|t| task_sequence(&t.id));
        tasks
    }

    /// Allocates the next `task-<N>` id, N monotonically increasing across
    /// the plan's lifetime.
    pub fn next_task_id(&self) -> String {
        let max = self
            .load_all_tasks()
            .iter()
            .map(|t| task_sequence(&t.id))
            .max()
            .unwrap_or(0);
        format!("task-{}", max + 1)
    }

    pub fn save_block(&self, task_id: &str, reason: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(self.layout.blocks_dir())?;
        std::fs::write(self.layout.block_md(task_id), reason)
    }
}

fn task_sequence(id: &str) -> u32 {
    id.strip_prefix("task-").and_then(|n| n.parse().ok()).unwrap_or(0)
}

static JSON_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```json\s*(\{.*?\}|\[.*?\])\s*```").unwrap());

#[derive(Deserialize)]
struct PlannerTask {
    title: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    body: String,
}

/// Parses a planner collaborator's raw markdown output into task drafts,
/// preferring an embedded structured JSON block and falling back to a
/// markdown heading regex so the planner's prose format can evolve without
/// breaking downstream consumers.
pub fn parse_planner_output(raw: &str) -> Vec<(String, Vec<String>, String)> {
    if let Some(caps) = JSON_BLOCK.captures(raw) {
        if let Ok(tasks) = serde_json::from_str::<Vec<PlannerTask>>(&caps[1]) {
            return tasks
                .into_iter()
                .map(|t| (t.title, t.depends_on, t.body))
                .collect();
        }
    }

    let mut tasks = Vec::new();
    for block in raw.split("\n## ").skip(if raw.starts_with("## ") { 0 } else { 1 }) {
        let mut lines = block.lines();
        let Some(title_line) = lines.next() else { continue };
        let title = title_line.trim_start_matches("## ").trim().to_string();
        if title.is_empty() {
            continue;
        }
        let mut depends_on = Vec::new();
        let mut body_lines = Vec::new();
        for line in lines {
            if let Some(rest) = line.trim().strip_prefix("Depends on:") {
                depends_on = rest.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            } else {
                body_lines.push(line);
            }
        }
        tasks.push((title, depends_on, body_lines.join("\n").trim().to_string()));
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_task_round_trips() {
        let dir = tempdir().unwrap();
        let store = CrewStore::new(CrewLayout::new(dir.path()));
        let mut task = Task::new("task-1", "Do the thing", vec![], "spec body".into());
        task.status = TaskStatus::Done;
        task.summary = Some("done".into());
        store.save_task(&task).unwrap();

        let loaded = store.load_task("task-1").unwrap();
        assert_eq!(loaded.title, "Do the thing");
        assert_eq!(loaded.body, "spec body");
        assert_eq!(loaded.status, TaskStatus::Done);
    }

    #[test]
    fn next_task_id_increments() {
        let dir = tempdir().unwrap();
        let store = CrewStore::new(CrewLayout::new(dir.path()));
        assert_eq!(store.next_task_id(), "task-1");
        store.save_task(&Task::new("task-1", "A", vec![], String::new())).unwrap();
        assert_eq!(store.next_task_id(), "task-2");
        store.save_task(&Task::new("task-5", "B", vec![], String::new())).unwrap();
        assert_eq!(store.next_task_id(), "task-6");
    }

    #[test]
    fn parse_planner_output_prefers_json_block() {
        let raw = "intro\n```json\n[{\"title\": \"Build\", \"depends_on\": [], \"body\": \"do it\"}]\n```\n";
        let tasks = parse_planner_output(raw);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].0, "Build");
    }

    #[test]
    fn parse_planner_output_falls_back_to_markdown() {
        let raw = "## Set up CI\nWire up github actions.\nDepends on: task-1, task-2\n\n## Write docs\nDraft the README.\n";
        let tasks = parse_planner_output(raw);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].0, "Set up CI");
        assert_eq!(tasks[0].1, vec!["task-1", "task-2"]);
        assert_eq!(tasks[1].0, "Write docs");
        assert!(tasks[1].1.is_empty());
    }
}
