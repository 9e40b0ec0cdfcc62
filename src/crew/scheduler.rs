//! DAG wave scheduler.
//!
//! The wave itself is the unit that bounds concurrency — `run_wave` never
//! spawns more worker threads than `workers` and never returns until every
//! spawned worker in the wave has terminated, so no separate concurrency
//! lock is needed.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::config::CrewConfig;
use crate::error::CrewError;

use super::model::{ReviewVerdict, Task, TaskStatus, Verdict};
use super::store::CrewStore;

/// Outcome a worker collaborator reports for one task attempt; abnormal
/// termination is folded into `Failed`.
pub enum WorkerOutcome {
    Done { summary: String },
    Blocked { reason: String },
    Failed,
}

/// Injected worker interface, so the scheduler never spawns worker sessions
/// itself.
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, task: &Task, retry_issues: &[String]) -> WorkerOutcome;
}

pub trait Reviewer: Send + Sync {
    fn review(&self, task: &Task) -> ReviewVerdict;
}

#[derive(Debug, Default)]
pub struct WaveReport {
    pub started: Vec<String>,
    pub done: Vec<String>,
    pub blocked: Vec<String>,
    pub retried: Vec<String>,
}

/// Tasks whose status is `todo` and all of whose `dependsOn` are `done`,
/// ordered ascending by numeric task id.
pub fn ready_set(tasks: &[Task]) -> Vec<String> {
    let done: HashSet<&str> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Done)
        .map(|t| t.id.as_str())
        .collect();

    let mut ready: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Todo && t.depends_on.iter().all(|d| done.contains(d.as_str())))
        .collect();
    ready.sort_by_key(|t| task_sequence(&t.id));
    ready.into_iter().map(|t| t.id.clone()).collect()
}

fn task_sequence(id: &str) -> u32 {
    id.strip_prefix("task-").and_then(|n| n.parse().ok()).unwrap_or(u32::MAX)
}

/// Checks the DAG invariants every plan must hold before a wave runs:
/// every `dependsOn` id refers to a task that exists, and the dependency
/// graph has no cycles.
pub fn validate_plan(tasks: &[Task]) -> Result<(), CrewError> {
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    for task in tasks {
        for dep in &task.depends_on {
            if !by_id.contains_key(dep.as_str()) {
                return Err(CrewError::UnknownTask(dep.clone()));
            }
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a Task>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Result<(), CrewError> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let cycle_start = stack.iter().position(|&s| s == id).unwrap_or(0);
                let mut cycle: Vec<&str> = stack[cycle_start..].to_vec();
                cycle.push(id);
                return Err(CrewError::CycleDetected(cycle.join(" -> ")));
            }
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        stack.push(id);
        if let Some(task) = by_id.get(id) {
            for dep in &task.depends_on {
                visit(dep.as_str(), by_id, marks, stack)?;
            }
        }
        stack.pop();
        marks.insert(id, Mark::Done);
        Ok(())
    }

    for task in tasks {
        let mut stack = Vec::new();
        visit(task.id.as_str(), &by_id, &mut marks, &mut stack)?;
    }
    Ok(())
}

pub struct Scheduler {
    store: CrewStore,
    config: CrewConfig,
    review_iterations: HashMap<String, u32>,
}

impl Scheduler {
    pub fn new(store: CrewStore, config: CrewConfig) -> Self {
        Self { store, config, review_iterations: HashMap::new() }
    }

    fn find<'a>(tasks: &'a mut [Task], id: &str) -> &'a mut Task {
        tasks.iter_mut().find(|t| t.id == id).expect("task id came from this same tasks slice")
    }

    /// Runs exactly one wave: selects up to `workers` ready tasks, spawns a
    /// worker thread per task, and blocks until all have terminated.
    ///
    /// `ready_set` only ever selects tasks whose dependencies are already
    /// done, so a task with an unmet dependency is silently skipped here
    /// rather than reported — call [`Scheduler::run_task`] to run one task
    /// directly and surface `DependencyUnmet`/`AttemptsExceeded` instead.
    pub fn run_wave(&mut self, worker: &(dyn Worker), reviewer: Option<&(dyn Reviewer)>) -> Result<WaveReport, CrewError> {
        let mut tasks = self.store.load_all_tasks();
        validate_plan(&tasks)?;
        let ready = ready_set(&tasks);
        let selected: Vec<String> = ready.into_iter().take(self.config.concurrency.workers as usize).collect();

        let mut report = WaveReport::default();
        if selected.is_empty() {
            return Ok(report);
        }

        for id in &selected {
            let task = Self::find(&mut tasks, id);
            task.status = TaskStatus::InProgress;
            task.assigned_to = Some(worker.name().to_string());
            task.attempt_count += 1;
            self.store.save_task(task).ok();
            report.started.push(id.clone());
        }

        let outcomes: Vec<(String, WorkerOutcome)> = std::thread::scope(|scope| {
            let handles: Vec<_> = selected
                .iter()
                .map(|id| {
                    let task = tasks.iter().find(|t| &t.id == id).unwrap();
                    let issues = task.last_review.clone().map(|r| r.issues).unwrap_or_default();
                    let task_snapshot = task.clone();
                    scope.spawn(move || (task_snapshot.id.clone(), worker.run(&task_snapshot, &issues)))
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("worker thread panicked")).collect()
        });

        for (id, outcome) in outcomes {
            self.apply_outcome(&id, outcome, &mut tasks, reviewer, &mut report);
        }

        Ok(report)
    }

    /// Runs a single named task directly, bypassing wave selection. Unlike
    /// `run_wave`, an unmet dependency or an exhausted attempt budget is
    /// reported as an error instead of the task just never being chosen.
    pub fn run_task(
        &mut self,
        task_id: &str,
        worker: &(dyn Worker),
        reviewer: Option<&(dyn Reviewer)>,
    ) -> Result<WaveReport, CrewError> {
        let mut tasks = self.store.load_all_tasks();
        validate_plan(&tasks)?;

        let done: HashSet<&str> =
            tasks.iter().filter(|t| t.status == TaskStatus::Done).map(|t| t.id.as_str()).collect();
        {
            let task = tasks.iter().find(|t| t.id == task_id).ok_or_else(|| CrewError::UnknownTask(task_id.to_string()))?;
            if let Some(dep) = task.depends_on.iter().find(|d| !done.contains(d.as_str())) {
                return Err(CrewError::DependencyUnmet { task: task_id.to_string(), dependency: dep.clone() });
            }
            if task.attempt_count >= self.config.work.max_attempts_per_task {
                return Err(CrewError::AttemptsExceeded(task_id.to_string()));
            }
        }

        let task = Self::find(&mut tasks, task_id);
        task.status = TaskStatus::InProgress;
        task.assigned_to = Some(worker.name().to_string());
        task.attempt_count += 1;
        self.store.save_task(task).ok();

        let issues = task.last_review.clone().map(|r| r.issues).unwrap_or_default();
        let outcome = worker.run(&task.clone(), &issues);

        let mut report = WaveReport::default();
        report.started.push(task_id.to_string());
        self.apply_outcome(task_id, outcome, &mut tasks, reviewer, &mut report);
        Ok(report)
    }

    /// Applies one worker's outcome to its task, runs the review step for a
    /// `Done` outcome, and persists the result. Shared by `run_wave` (one
    /// call per task in the wave) and `run_task` (a single direct call).
    fn apply_outcome(
        &mut self,
        id: &str,
        outcome: WorkerOutcome,
        tasks: &mut [Task],
        reviewer: Option<&(dyn Reviewer)>,
        report: &mut WaveReport,
    ) {
        let max_attempts = self.config.work.max_attempts_per_task;
        let task = Self::find(tasks, id);
        match outcome {
            WorkerOutcome::Done { summary } => {
                task.summary = Some(summary);
                task.status = TaskStatus::Done;
                self.apply_review(task, reviewer, report);
            }
            WorkerOutcome::Blocked { reason } => {
                task.status = TaskStatus::Blocked;
                task.blocked_reason = Some(reason);
                report.blocked.push(id.to_string());
            }
            WorkerOutcome::Failed => {
                if task.attempt_count < max_attempts {
                    task.status = TaskStatus::Todo;
                    report.retried.push(id.to_string());
                } else {
                    task.status = TaskStatus::Blocked;
                    task.blocked_reason = Some("exceeded max attempts".to_string());
                    report.blocked.push(id.to_string());
                }
            }
        }
        debug_assert!(task.invariant_holds(), "task {id} left in a status inconsistent with its recorded fields");
        if task.status == TaskStatus::Blocked {
            if let Some(reason) = task.blocked_reason.clone() {
                let _ = self.store.save_block(id, &reason);
            }
        }
        self.store.save_task(task).ok();
    }

    /// After a worker marks a task `done`, runs the optional review step,
    /// bounded by `review.maxIterations`.
    fn apply_review(&mut self, task: &mut Task, reviewer: Option<&(dyn Reviewer)>, report: &mut WaveReport) {
        let Some(reviewer) = reviewer.filter(|_| self.config.review.enabled) else {
            report.done.push(task.id.clone());
            return;
        };

        let iterations = self.review_iterations.entry(task.id.clone()).or_insert(0);
        if *iterations >= self.config.review.max_iterations {
            report.done.push(task.id.clone());
            return;
        }
        *iterations += 1;

        let verdict = reviewer.review(task);
        task.last_review = Some(verdict.clone());
        match verdict.verdict {
            Verdict::Ship => {
                report.done.push(task.id.clone());
            }
            Verdict::NeedsWork => {
                task.status = TaskStatus::Todo;
                task.summary = None;
                report.retried.push(task.id.clone());
            }
            Verdict::MajorRethink => {
                task.status = TaskStatus::Blocked;
                task.blocked_reason = Some(verdict.summary.clone());
                report.blocked.push(task.id.clone());
            }
        }
    }

    /// Repeatedly runs waves until no `todo` tasks remain, no remaining
    /// tasks are ready, or `maxWaves` is reached.
    pub fn run_autonomous(
        &mut self,
        worker: &(dyn Worker),
        reviewer: Option<&(dyn Reviewer)>,
    ) -> Result<Vec<WaveReport>, CrewError> {
        let mut reports = Vec::new();
        for wave in 0..self.config.work.max_waves {
            let tasks = self.store.load_all_tasks();
            validate_plan(&tasks)?;
            if !tasks.iter().any(|t| t.status == TaskStatus::Todo) {
                info!(wave, "autonomous run complete: no todo tasks remain");
                break;
            }
            if ready_set(&tasks).is_empty() {
                info!(wave, "autonomous run stalled: no ready tasks");
                break;
            }
            if self.config.work.stop_on_block && tasks.iter().any(|t| t.status == TaskStatus::Blocked) {
                warn!(wave, "stopping autonomous run: a task is blocked and stop_on_block is set");
                break;
            }
            reports.push(self.run_wave(worker, reviewer)?);
        }
        Ok(reports)
    }

    /// Resets `task_id` to `todo`, clearing attempt/assignment/review state.
    /// With `cascade`, also resets every transitive dependent, preserving
    /// all `dependsOn` edges.
    pub fn reset(&mut self, task_id: &str, cascade: bool) {
        let mut tasks = self.store.load_all_tasks();
        let mut to_reset = HashSet::new();
        to_reset.insert(task_id.to_string());

        if cascade {
            loop {
                let mut grew = false;
                for task in &tasks {
                    if to_reset.contains(&task.id) {
                        continue;
                    }
                    if task.depends_on.iter().any(|d| to_reset.contains(d)) {
                        to_reset.insert(task.id.clone());
                        grew = true;
                    }
                }
                if !grew {
                    break;
                }
            }
        }

        for task in tasks.iter_mut() {
            if to_reset.contains(&task.id) {
                task.reset();
                self.store.save_task(task).ok();
            }
        }
        self.review_iterations.retain(|id, _| !to_reset.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrewConfig;
    use crate::paths::CrewLayout;
    use tempfile::tempdir;

    struct AlwaysDone;
    impl Worker for AlwaysDone {
        fn name(&self) -> &str {
            "always-done"
        }

        fn run(&self, task: &Task, _retry_issues: &[String]) -> WorkerOutcome {
            WorkerOutcome::Done { summary: format!("finished {}", task.id) }
        }
    }

    struct FailN(std::sync::Mutex<HashMap<String, u32>>, u32);
    impl Worker for FailN {
        fn name(&self) -> &str {
            "fail-n"
        }

        fn run(&self, task: &Task, _retry_issues: &[String]) -> WorkerOutcome {
            let mut counts = self.0.lock().unwrap();
            let count = counts.entry(task.id.clone()).or_insert(0);
            *count += 1;
            if *count <= self.1 {
                WorkerOutcome::Failed
            } else {
                WorkerOutcome::Done { summary: "eventually succeeded".into() }
            }
        }
    }

    fn setup() -> (tempfile::TempDir, CrewStore) {
        let dir = tempdir().unwrap();
        let store = CrewStore::new(CrewLayout::new(dir.path()));
        (dir, store)
    }

    #[test]
    fn ready_set_respects_dependencies_and_ordering() {
        let t1 = Task::new("task-1", "A", vec![], String::new());
        let mut t2 = Task::new("task-2", "B", vec!["task-1".into()], String::new());
        t2.status = TaskStatus::Todo;
        let t3 = Task::new("task-10", "C", vec![], String::new());
        let ready = ready_set(&[t1, t2, t3]);
        assert_eq!(ready, vec!["task-1", "task-10"]);
    }

    #[test]
    fn wave_completes_ready_tasks() {
        let (_d, store) = setup();
        store.save_task(&Task::new("task-1", "A", vec![], String::new())).unwrap();
        let mut config = CrewConfig::default();
        config.concurrency.workers = 2;
        let mut scheduler = Scheduler::new(store, config);

        let report = scheduler.run_wave(&AlwaysDone, None).unwrap();
        assert_eq!(report.done, vec!["task-1"]);
    }

    #[test]
    fn failed_task_retries_then_blocks_after_max_attempts() {
        let (_d, store) = setup();
        store.save_task(&Task::new("task-1", "A", vec![], String::new())).unwrap();
        let mut config = CrewConfig::default();
        config.concurrency.workers = 1;
        config.work.max_attempts_per_task = 2;
        let worker = FailN(std::sync::Mutex::new(HashMap::new()), 99);
        let mut scheduler = Scheduler::new(store, config);

        let r1 = scheduler.run_wave(&worker, None).unwrap();
        assert_eq!(r1.retried, vec!["task-1"]);
        let r2 = scheduler.run_wave(&worker, None).unwrap();
        assert_eq!(r2.blocked, vec!["task-1".to_string()]);
    }

    #[test]
    fn task_never_enters_in_progress_with_unmet_dependency() {
        let (_d, store) = setup();
        store.save_task(&Task::new("task-1", "A", vec![], String::new())).unwrap();
        store.save_task(&Task::new("task-2", "B", vec!["task-1".into()], String::new())).unwrap();
        let mut config = CrewConfig::default();
        config.concurrency.workers = 5;
        let mut scheduler = Scheduler::new(store, config);

        let report = scheduler.run_wave(&AlwaysDone, None).unwrap();
        // Only task-1 is ready; task-2's dependency isn't done yet.
        assert_eq!(report.started, vec!["task-1"]);
    }

    #[test]
    fn run_task_reports_unknown_task() {
        let (_d, store) = setup();
        let mut scheduler = Scheduler::new(store, CrewConfig::default());
        let err = scheduler.run_task("task-404", &AlwaysDone, None).unwrap_err();
        assert_eq!(err, CrewError::UnknownTask("task-404".to_string()));
    }

    #[test]
    fn run_task_reports_dependency_unmet() {
        let (_d, store) = setup();
        store.save_task(&Task::new("task-1", "A", vec![], String::new())).unwrap();
        store.save_task(&Task::new("task-2", "B", vec!["task-1".into()], String::new())).unwrap();
        let mut scheduler = Scheduler::new(store, CrewConfig::default());

        let err = scheduler.run_task("task-2", &AlwaysDone, None).unwrap_err();
        assert_eq!(err, CrewError::DependencyUnmet { task: "task-2".to_string(), dependency: "task-1".to_string() });
    }

    #[test]
    fn run_task_reports_attempts_exceeded() {
        let (_d, store) = setup();
        let mut task = Task::new("task-1", "A", vec![], String::new());
        task.attempt_count = 2;
        store.save_task(&task).unwrap();
        let mut config = CrewConfig::default();
        config.work.max_attempts_per_task = 2;
        let mut scheduler = Scheduler::new(store, config);

        let err = scheduler.run_task("task-1", &AlwaysDone, None).unwrap_err();
        assert_eq!(err, CrewError::AttemptsExceeded("task-1".to_string()));
    }

    #[test]
    fn run_task_assigns_worker_name_and_completes() {
        let (_d, store) = setup();
        store.save_task(&Task::new("task-1", "A", vec![], String::new())).unwrap();
        let mut scheduler = Scheduler::new(store, CrewConfig::default());

        let report = scheduler.run_task("task-1", &AlwaysDone, None).unwrap();
        assert_eq!(report.done, vec!["task-1"]);
        let task = scheduler.store.load_task("task-1").unwrap();
        assert_eq!(task.assigned_to.as_deref(), Some("always-done"));
    }

    #[test]
    fn validate_plan_rejects_unknown_dependency() {
        let t1 = Task::new("task-1", "A", vec!["task-9".into()], String::new());
        let err = validate_plan(&[t1]).unwrap_err();
        assert_eq!(err, CrewError::UnknownTask("task-9".to_string()));
    }

    #[test]
    fn validate_plan_rejects_cycle() {
        let t1 = Task::new("task-1", "A", vec!["task-2".into()], String::new());
        let t2 = Task::new("task-2", "B", vec!["task-1".into()], String::new());
        let err = validate_plan(&[t1, t2]).unwrap_err();
        assert!(matches!(err, CrewError::CycleDetected(_)));
    }

    #[test]
    fn validate_plan_accepts_well_formed_dag() {
        let t1 = Task::new("task-1", "A", vec![], String::new());
        let t2 = Task::new("task-2", "B", vec!["task-1".into()], String::new());
        assert!(validate_plan(&[t1, t2]).is_ok());
    }

    #[test]
    fn reset_with_cascade_resets_transitive_dependents_only() {
        let (_d, store) = setup();
        let mut t1 = Task::new("task-1", "A", vec![], String::new());
        t1.status = TaskStatus::Done;
        t1.summary = Some("done".into());
        let mut t2 = Task::new("task-2", "B", vec!["task-1".into()], String::new());
        t2.status = TaskStatus::Done;
        t2.summary = Some("done".into());
        let mut t3 = Task::new("task-3", "C", vec!["task-2".into()], String::new());
        t3.status = TaskStatus::Done;
        t3.summary = Some("done".into());
        let unrelated = Task::new("task-4", "D", vec![], String::new());
        store.save_task(&t1).unwrap();
        store.save_task(&t2).unwrap();
        store.save_task(&t3).unwrap();
        store.save_task(&unrelated).unwrap();

        let mut scheduler = Scheduler::new(store, CrewConfig::default());
        scheduler.reset("task-1", true);

        let tasks = scheduler.store.load_all_tasks();
        let by_id: HashMap<_, _> = tasks.iter().map(|t| (t.id.clone(), t)).collect();
        assert_eq!(by_id["task-1"].status, TaskStatus::Todo);
        assert_eq!(by_id["task-2"].status, TaskStatus::Todo);
        assert_eq!(by_id["task-3"].status, TaskStatus::Todo);
        assert_eq!(by_id["task-4"].status, TaskStatus::Done);
    }

    #[test]
    fn review_ship_confirms_done_needs_work_reverts_to_todo() {
        struct ShipOnce(std::sync::Mutex<bool>);
        impl Reviewer for ShipOnce {
            fn review(&self, _task: &Task) -> ReviewVerdict {
                let mut shipped = self.0.lock().unwrap();
                if *shipped {
                    ReviewVerdict { verdict: Verdict::Ship, summary: "ok".into(), issues: vec![], suggestions: vec![] }
                } else {
                    *shipped = true;
                    ReviewVerdict { verdict: Verdict::NeedsWork, summary: "fix it".into(), issues: vec!["bug".into()], suggestions: vec![] }
                }
            }
        }

        let (_d, store) = setup();
        store.save_task(&Task::new("task-1", "A", vec![], String::new())).unwrap();
        let mut config = CrewConfig::default();
        config.concurrency.workers = 1;
        let reviewer = ShipOnce(std::sync::Mutex::new(false));
        let mut scheduler = Scheduler::new(store, config);

        let r1 = scheduler.run_wave(&AlwaysDone, Some(&reviewer)).unwrap();
        assert_eq!(r1.retried, vec!["task-1"]);
        let r2 = scheduler.run_wave(&AlwaysDone, Some(&reviewer)).unwrap();
        assert_eq!(r2.done, vec!["task-1"]);
    }
}
