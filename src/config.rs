//! Layered configuration: defaults ← user config ← project config, merged
//! field by field rather than replaced wholesale at each layer.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::paths::{CrewLayout, Layout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    Full,
    Minimal,
    None,
}

impl Default for ContextMode {
    fn default() -> Self {
        ContextMode::Full
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameTheme {
    Adjectives,
    Plain,
}

impl Default for NameTheme {
    fn default() -> Self {
        NameTheme::Adjectives
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub workers: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { workers: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub enabled: bool,
    pub max_iterations: u32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    pub max_passes: u32,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self { max_passes: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkConfig {
    pub max_attempts_per_task: u32,
    pub max_waves: u32,
    pub stop_on_block: bool,
}

impl Default for WorkConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_task: 5,
            max_waves: 50,
            stop_on_block: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TruncationConfig {
    pub worker_output_bytes: Option<u64>,
    pub review_input_bytes: Option<u64>,
    pub feed_lines: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrewConfig {
    pub concurrency: ConcurrencyConfig,
    pub review: ReviewConfig,
    pub planning: PlanningConfig,
    pub work: WorkConfig,
    pub truncation: TruncationConfig,
}

impl Default for CrewConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyConfig::default(),
            review: ReviewConfig::default(),
            planning: PlanningConfig::default(),
            work: WorkConfig::default(),
            truncation: TruncationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PiConfig {
    pub auto_register: bool,
    pub auto_register_paths: Vec<String>,
    pub scope_to_folder: bool,
    pub name_theme: NameTheme,
    pub feed_retention: usize,
    pub stuck_threshold: u64,
    pub stuck_notify: bool,
    pub auto_status: bool,
    pub crew_events_in_feed: bool,
    pub context_mode: ContextMode,
    pub crew: CrewConfig,
}

impl Default for PiConfig {
    fn default() -> Self {
        Self {
            auto_register: true,
            auto_register_paths: Vec::new(),
            scope_to_folder: false,
            name_theme: NameTheme::default(),
            feed_retention: 50,
            stuck_threshold: 600,
            stuck_notify: true,
            auto_status: true,
            crew_events_in_feed: true,
            context_mode: ContextMode::default(),
            crew: CrewConfig::default(),
        }
    }
}

/// Recursively merges `overlay` onto `current`: table keys merge key by key,
/// any other value in `overlay` replaces the value in `current` outright.
/// This lets one function merge both the user's TOML layer and the
/// project's JSON layer (round-tripped through `toml::Value`) without
/// reparsing into a typed struct twice.
fn merge_layer(current: &mut toml::Value, overlay: toml::Value) {
    match (current, overlay) {
        (toml::Value::Table(base), toml::Value::Table(patch)) => {
            for (k, v) in patch {
                match base.get_mut(&k) {
                    Some(existing) => merge_layer(existing, v),
                    None => {
                        base.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

fn read_toml_layer(path: &Path) -> Option<toml::Value> {
    let text = std::fs::read_to_string(path).ok()?;
    toml::from_str(&text).ok()
}

fn read_json_layer(path: &Path) -> Option<toml::Value> {
    let text = std::fs::read_to_string(path).ok()?;
    let json: serde_json::Value = serde_json::from_str(&text).ok()?;
    // Round-trip through serde_json -> toml::Value via the shared serde data
    // model so the project-level config.json participates in the same merge
    // as the user-level config.toml.
    toml::Value::try_from(json).ok()
}

/// Load configuration with precedence defaults ← user ← project, matching
/// `config::DaemonConfig::new`'s layering but adding the project layer the
/// spec requires for Crew.
pub fn load(layout: &Layout, project_dir: Option<&Path>) -> PiConfig {
    let default_value =
        toml::Value::try_from(PiConfig::default()).expect("PiConfig::default serializes");
    let mut merged = default_value;

    if let Some(user_layer) = read_toml_layer(&layout.user_config_file()) {
        merge_layer(&mut merged, user_layer);
    }

    if let Some(project_dir) = project_dir {
        let project_file = CrewLayout::new(project_dir).config_json();
        if let Some(project_layer) = read_json_layer(&project_file) {
            merge_layer(&mut merged, project_layer);
        }
    }

    merged.try_into().unwrap_or_else(|_| PiConfig::default())
}
