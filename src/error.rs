//! Discriminated error types for every coordination-core boundary.
//!
//! The core never raises across the process boundary — every public
//! operation returns `Result<T, PiError>` so callers (the CLI, or any
//! integrating tool) can match on the discriminant rather than parse a
//! message string. Internal plumbing (cache refresh, feed appends, status
//! writes) absorbs or logs I/O failures rather than surfacing them, since
//! those writes are best-effort and a caller retrying the surrounding
//! operation naturally repairs a dropped one.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PiError {
    #[error(transparent)]
    Coordination(#[from] CoordinationError),
    #[error(transparent)]
    Messaging(#[from] MessagingError),
    #[error(transparent)]
    Reservation(#[from] ReservationError),
    #[error(transparent)]
    Swarm(#[from] SwarmError),
    #[error(transparent)]
    Crew(#[from] CrewError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed record: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("name '{0}' is already taken by a live agent")]
    NameTaken(String),
    #[error("lost the race to claim a name")]
    RaceLost,
    #[error("'{0}' is not a valid agent name")]
    InvalidName(String),
    #[error("the requested name is the same as the current name")]
    SameName,
    #[error("agent '{0}' is not registered")]
    NotRegistered(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("'{0}' is not a valid message target")]
    InvalidTarget(String),
    #[error("target agent '{0}' was not found")]
    TargetNotFound(String),
    #[error("target agent '{0}' is registered but not active")]
    TargetNotActive(String),
    #[error("peer registration at '{0}' is malformed")]
    InvalidRegistration(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReservationError {
    #[error("'{path}' conflicts with a reservation held by '{agent}' on pattern '{pattern}'")]
    Conflict {
        path: String,
        agent: String,
        pattern: String,
        cwd: String,
        git_branch: Option<String>,
    },
}

/// Location of an agent's existing claim, returned with `AlreadyHaveClaim`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClaimLocation {
    pub spec: String,
    pub task_id: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SwarmError {
    #[error("task '{task_id}' in spec '{spec}' is already claimed")]
    AlreadyClaimed { spec: String, task_id: String },
    #[error("agent already holds a claim at {existing:?}")]
    AlreadyHaveClaim { existing: ClaimLocation },
    #[error("task '{task_id}' in spec '{spec}' is not claimed")]
    NotClaimed { spec: String, task_id: String },
    #[error("task '{task_id}' in spec '{spec}' is claimed by another agent")]
    NotYourClaim { spec: String, task_id: String },
    #[error("task '{task_id}' in spec '{spec}' is already completed")]
    AlreadyCompleted { spec: String, task_id: String },
    #[error("could not acquire the swarm lock within the retry budget")]
    LockFailed,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CrewError {
    #[error("no plan exists for this project")]
    NoPlan,
    #[error("unknown task '{0}'")]
    UnknownTask(String),
    #[error("task '{task}' depends on '{dependency}' which is not done")]
    DependencyUnmet { task: String, dependency: String },
    #[error("task '{0}' exceeded its maximum attempt count")]
    AttemptsExceeded(String),
    #[error("dependency cycle detected: {0}")]
    CycleDetected(String),
}
