//! On-disk layout resolution.
//!
//! `Layout` resolves every path the coordination core touches from a single
//! base directory, centralizing platform path decisions in one place instead
//! of scattering `PathBuf::join` calls through the codebase.

use std::path::{Path, PathBuf};

/// Paths rooted at `<user>/.pi/agent/messenger/`.
#[derive(Debug, Clone)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Resolve the default base directory: `$PI_HOME` if set (used by tests
    /// and by anyone running multiple meshes on one host), else
    /// `~/.pi/agent/messenger`.
    pub fn resolve_default() -> Self {
        if let Ok(home) = std::env::var("PI_HOME") {
            return Self::new(PathBuf::from(home).join("agent").join("messenger"));
        }
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        Self::new(home.join(".pi").join("agent").join("messenger"))
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.base.join("registry")
    }

    pub fn registration_file(&self, name: &str) -> PathBuf {
        self.registry_dir().join(format!("{name}.json"))
    }

    pub fn inbox_root(&self) -> PathBuf {
        self.base.join("inbox")
    }

    pub fn inbox_dir(&self, name: &str) -> PathBuf {
        self.inbox_root().join(name)
    }

    pub fn rename_marker(&self, name: &str) -> PathBuf {
        self.inbox_dir(name).join(".rename-lock")
    }

    pub fn feed_file(&self) -> PathBuf {
        self.base.join("feed.jsonl")
    }

    pub fn claims_file(&self) -> PathBuf {
        self.base.join("claims.json")
    }

    pub fn completions_file(&self) -> PathBuf {
        self.base.join("completions.json")
    }

    pub fn swarm_lock(&self) -> PathBuf {
        self.base.join("swarm.lock")
    }

    pub fn user_config_file(&self) -> PathBuf {
        self.base.join("config.toml")
    }
}

/// Per-project Crew layout, rooted at `<cwd>/.pi/messenger/crew/`.
#[derive(Debug, Clone)]
pub struct CrewLayout {
    root: PathBuf,
}

impl CrewLayout {
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            root: project_dir
                .as_ref()
                .join(".pi")
                .join("messenger")
                .join("crew"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn plan_json(&self) -> PathBuf {
        self.root.join("plan.json")
    }

    pub fn plan_md(&self) -> PathBuf {
        self.root.join("plan.md")
    }

    pub fn planning_progress(&self) -> PathBuf {
        self.root.join("planning-progress.md")
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    pub fn task_json(&self, id: &str) -> PathBuf {
        self.tasks_dir().join(format!("{id}.json"))
    }

    pub fn task_md(&self, id: &str) -> PathBuf {
        self.tasks_dir().join(format!("{id}.md"))
    }

    pub fn blocks_dir(&self) -> PathBuf {
        self.root.join("blocks")
    }

    pub fn block_md(&self, id: &str) -> PathBuf {
        self.blocks_dir().join(format!("{id}.md"))
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    pub fn config_json(&self) -> PathBuf {
        self.root.join("config.json")
    }
}
