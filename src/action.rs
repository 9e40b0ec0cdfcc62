//! Closed action surface and central dispatcher: every caller-facing
//! operation is a tagged request variant routed through one match arm
//! instead of scattered ad hoc call sites.

use serde::{Deserialize, Serialize};

use crate::crew::{CrewStore, Scheduler};
use crate::error::PiError;
use crate::paths::CrewLayout;
use crate::registry::Registration;
use crate::swarm::{Claim, Completion};
use crate::{Coordinator, StatusView};

/// One entry per action-surface item extended with Crew's
/// `task.*` / `crew.*` namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Join { explicit_name: Option<String>, base_name: String, cwd: String, session_id: String },
    Leave,
    Rename { new_name: String },
    List { scope_to_folder: Option<String> },
    Whois { name: String },
    Status,
    Send { to: String, text: String, reply_to: Option<String> },
    Broadcast { text: String },
    Reserve { pattern: String, reason: Option<String> },
    Release { pattern: String },
    Feed { limit: Option<usize> },
    SetStatus { message: Option<String> },
    SwarmClaim { spec: String, task_id: String, reason: Option<String> },
    SwarmUnclaim { spec: String, task_id: String },
    SwarmComplete { spec: String, task_id: String, notes: Option<String> },
    CrewTaskReset { project_dir: String, task_id: String, cascade: bool },
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActionOutcome {
    Joined(Registration),
    Left,
    Renamed(Registration),
    Listed(Vec<Registration>),
    Whois(Option<Registration>),
    Status(StatusView),
    Sent { id: String },
    Broadcast { delivered: usize },
    Reserved,
    Released,
    Feed(Vec<crate::feed::FeedEvent>),
    StatusSet,
    Claimed(Claim),
    Unclaimed,
    Completed(Completion),
    TaskReset,
}

/// Routes `action` to the matching `Coordinator` operation. `sink` receives
/// any messages drained as a side effect of a rename; most actions ignore it.
pub fn dispatch(
    coordinator: &Coordinator,
    action: Action,
    sink: &dyn crate::inbox::watcher::Deliver,
) -> Result<ActionOutcome, PiError> {
    match action {
        Action::Join { explicit_name, base_name, cwd, session_id } => coordinator
            .join(explicit_name.as_deref(), &base_name, &cwd, &session_id)
            .map(ActionOutcome::Joined),
        Action::Leave => coordinator.leave().map(|_| ActionOutcome::Left),
        Action::Rename { new_name } => coordinator.rename(&new_name, sink).map(ActionOutcome::Renamed),
        Action::List { scope_to_folder } => Ok(ActionOutcome::Listed(coordinator.list(scope_to_folder.as_deref()))),
        Action::Whois { name } => Ok(ActionOutcome::Whois(coordinator.whois(&name))),
        Action::Status => coordinator.status().map(ActionOutcome::Status),
        Action::Send { to, text, reply_to } => {
            coordinator.send(&to, &text, reply_to).map(|m| ActionOutcome::Sent { id: m.id })
        }
        Action::Broadcast { text } => coordinator.broadcast(&text).map(|n| ActionOutcome::Broadcast { delivered: n }),
        Action::Reserve { pattern, reason } => coordinator.reserve(&pattern, reason).map(|_| ActionOutcome::Reserved),
        Action::Release { pattern } => coordinator.release(&pattern).map(|_| ActionOutcome::Released),
        Action::Feed { limit } => {
            let mut events = coordinator.feed().read_all();
            if let Some(limit) = limit {
                let drop = events.len().saturating_sub(limit);
                events.drain(0..drop);
            }
            Ok(ActionOutcome::Feed(events))
        }
        Action::SetStatus { message } => coordinator.set_status(message).map(|_| ActionOutcome::StatusSet),
        Action::SwarmClaim { spec, task_id, reason } => {
            coordinator.swarm_claim(&spec, &task_id, reason).map(ActionOutcome::Claimed)
        }
        Action::SwarmUnclaim { spec, task_id } => {
            coordinator.swarm_unclaim(&spec, &task_id).map(|_| ActionOutcome::Unclaimed)
        }
        Action::SwarmComplete { spec, task_id, notes } => {
            coordinator.swarm_complete(&spec, &task_id, notes).map(ActionOutcome::Completed)
        }
        Action::CrewTaskReset { project_dir, task_id, cascade } => {
            let store = CrewStore::new(CrewLayout::new(&project_dir));
            let mut scheduler = Scheduler::new(store, coordinator.config().crew.clone());
            scheduler.reset(&task_id, cascade);
            Ok(ActionOutcome::TaskReset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PiConfig;
    use crate::paths::Layout;
    use tempfile::tempdir;

    struct DropSink;
    impl crate::inbox::watcher::Deliver for DropSink {
        fn deliver(&self, _message: crate::inbox::model::MailMessage) {}
    }

    #[test]
    fn dispatch_join_then_list_round_trips() {
        let dir = tempdir().unwrap();
        let coordinator = Coordinator::new(Layout::new(dir.path()), PiConfig::default());

        let outcome = dispatch(
            &coordinator,
            Action::Join {
                explicit_name: Some("Atlas".into()),
                base_name: "Atlas".into(),
                cwd: "/repo".into(),
                session_id: "s1".into(),
            },
            &DropSink,
        )
        .unwrap();
        assert!(matches!(outcome, ActionOutcome::Joined(_)));

        let outcome = dispatch(&coordinator, Action::Status, &DropSink).unwrap();
        assert!(matches!(outcome, ActionOutcome::Status(_)));
    }

    #[test]
    fn action_serializes_with_tagged_shape() {
        let action = Action::Send { to: "X".into(), text: "hi".into(), reply_to: None };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "send");
    }
}
