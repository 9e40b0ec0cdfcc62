//! Pi Messenger: a decentralized, daemonless coordination substrate for
//! independent agent processes sharing a working directory.
//!
//! Every operation goes through a [`Coordinator`] value that owns a base
//! directory — there is no process-wide singleton, so tests (and multiple
//! meshes on one host) can instantiate independent coordinators against
//! independent temp directories.

pub mod action;
pub mod config;
pub mod crew;
pub mod error;
pub mod feed;
pub mod fsutil;
pub mod git;
pub mod inbox;
pub mod liveness;
pub mod name;
pub mod paths;
pub mod registry;
pub mod reservations;
pub mod swarm;

use std::sync::Mutex;

use tracing::info;

use config::PiConfig;
use error::{CoordinationError, MessagingError, PiError, ReservationError};
use feed::{Feed, FeedEvent};
use inbox::model::MailMessage;
use inbox::storage::InboxStore;
use paths::Layout;
use registry::{Registration, Registry};
use swarm::{Claim, Completion, SwarmStore};

/// Owns every on-disk subsystem for one mesh. One `Coordinator` per agent
/// process; the caller drives it synchronously.
pub struct Coordinator {
    layout: Layout,
    config: PiConfig,
    registry: Registry,
    feed: Feed,
    inbox: InboxStore,
    swarm: SwarmStore,
    pid: u32,
    self_registration: Mutex<Option<Registration>>,
}

impl Coordinator {
    pub fn new(layout: Layout, config: PiConfig) -> Self {
        let registry = Registry::new(layout.clone());
        let feed = Feed::new(layout.clone());
        let inbox = InboxStore::new(layout.clone());
        let swarm = SwarmStore::new(layout.clone());
        feed.prune_startup(config.feed_retention);
        Self {
            layout,
            config,
            registry,
            feed,
            inbox,
            swarm,
            pid: std::process::id(),
            self_registration: Mutex::new(None),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn config(&self) -> &PiConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    pub fn swarm(&self) -> &SwarmStore {
        &self.swarm
    }

    fn current(&self) -> Result<Registration, CoordinationError> {
        self.self_registration
            .lock()
            .unwrap()
            .clone()
            .ok_or(CoordinationError::NotRegistered(String::new()))
    }

    /// Join the mesh. `explicit_name` takes precedence if set,
    /// otherwise `base_name` drives the collision-avoidance candidate walk.
    pub fn join(
        &self,
        explicit_name: Option<&str>,
        base_name: &str,
        cwd: &str,
        session_id: &str,
    ) -> Result<Registration, PiError> {
        let mut reg = self.registry.join(explicit_name, base_name, self.pid, session_id, cwd)?;
        reg.git_branch = git::current_branch(std::path::Path::new(cwd));
        let _ = self.registry.update_activity(&mut reg);
        *self.self_registration.lock().unwrap() = Some(reg.clone());
        self.feed.append(&FeedEvent::new(&reg.name, "join"));
        info!(name = %reg.name, "joined mesh");
        Ok(reg)
    }

    pub fn leave(&self) -> Result<(), PiError> {
        let reg = self.current()?;
        self.registry.leave(&reg.name);
        *self.self_registration.lock().unwrap() = None;
        self.feed.append(&FeedEvent::new(&reg.name, "leave"));
        Ok(())
    }

    /// Rename: drains the current inbox before migrating it
    /// and the ordering guarantee in §5 ("drains pending messages before
    /// migrating the inbox").
    pub fn rename(&self, new_name: &str, sink: &dyn inbox::watcher::Deliver) -> Result<Registration, PiError> {
        let current = self.current()?;
        inbox::watcher::process_once(&self.inbox, &current.name, sink);
        let renamed = self.registry.rename(&current, new_name)?;
        *self.self_registration.lock().unwrap() = Some(renamed.clone());
        self.feed.append(&FeedEvent::new(&renamed.name, "rename"));
        Ok(renamed)
    }

    pub fn list(&self, scope_to_folder: Option<&str>) -> Vec<Registration> {
        let self_name = self.self_registration.lock().unwrap().as_ref().map(|r| r.name.clone());
        let outcome = self.registry.list_active_agents(self_name.as_deref(), scope_to_folder);
        for name in &outcome.evicted {
            self.feed.append(&FeedEvent::new(name, "leave"));
        }
        outcome.agents
    }

    pub fn whois(&self, name: &str) -> Option<Registration> {
        self.registry.lookup(name)
    }

    pub fn send(&self, to: &str, text: &str, reply_to: Option<String>) -> Result<MailMessage, PiError> {
        let from = self.current()?;
        name::validate(to).map_err(|_| MessagingError::InvalidTarget(to.to_string()))?;
        let target = match self.registry.lookup_checked(to) {
            registry::LookupResult::Found(reg) => reg,
            registry::LookupResult::Malformed => return Err(MessagingError::InvalidRegistration(to.to_string()).into()),
            registry::LookupResult::Absent => return Err(MessagingError::TargetNotFound(to.to_string()).into()),
        };
        if !liveness::is_alive(target.pid) {
            return Err(MessagingError::TargetNotActive(to.to_string()).into());
        }
        let msg = self.inbox.send(&from.name, to, text, reply_to)?;
        self.feed.append(&FeedEvent::new(&from.name, "message"));
        Ok(msg)
    }

    /// Broadcast to every live peer, scoped to the caller's cwd when
    /// `scope_to_folder` is set.
    pub fn broadcast(&self, text: &str) -> Result<usize, PiError> {
        let from = self.current()?;
        let scope = if self.config.scope_to_folder { Some(from.cwd.as_str()) } else { None };
        let peers = self.list(scope);
        for peer in &peers {
            let _ = self.inbox.send(&from.name, &peer.name, text, None);
        }
        self.feed.append(&FeedEvent::new(&from.name, "message"));
        Ok(peers.len())
    }

    pub fn reserve(&self, pattern: &str, reason: Option<String>) -> Result<(), PiError> {
        let mut reg = self.current()?;
        reg.reservations.push(registry::model::Reservation { pattern: pattern.to_string(), reason });
        self.registry.update_activity(&mut reg)?;
        *self.self_registration.lock().unwrap() = Some(reg);
        Ok(())
    }

    pub fn release(&self, pattern: &str) -> Result<(), PiError> {
        let mut reg = self.current()?;
        reg.reservations.retain(|r| r.pattern != pattern);
        self.registry.update_activity(&mut reg)?;
        *self.self_registration.lock().unwrap() = Some(reg);
        Ok(())
    }

    /// Checks `path` against peers' reservations for a write/edit probe.
    /// Read probes should not call this.
    pub fn check_write_conflict(&self, path: &str) -> Result<(), PiError> {
        let reg = self.current()?;
        reservations::check_conflict_for_write(&self.registry, &reg.name, path).map_err(PiError::from)
    }

    pub fn set_status(&self, message: Option<String>) -> Result<(), PiError> {
        let mut reg = self.current()?;
        reg.status_message = message;
        self.registry.update_activity(&mut reg)?;
        *self.self_registration.lock().unwrap() = Some(reg);
        Ok(())
    }

    /// Composite read-only view consumed by an external status overlay.
    pub fn status(&self) -> Result<StatusView, PiError> {
        let reg = self.current()?;
        let recent_feed = self.feed.read_all().into_iter().rev().take(20).collect();
        Ok(StatusView {
            registration: reg.clone(),
            recent_feed,
            reservations: reg.reservations.clone(),
        })
    }

    pub fn swarm_claim(&self, spec: &str, task_id: &str, reason: Option<String>) -> Result<Claim, PiError> {
        let reg = self.current()?;
        Ok(self.swarm.claim(&self.registry, spec, task_id, &reg.name, &reg.session_id, self.pid, reason)?)
    }

    pub fn swarm_unclaim(&self, spec: &str, task_id: &str) -> Result<(), PiError> {
        let reg = self.current()?;
        Ok(self.swarm.unclaim(&self.registry, spec, task_id, &reg.name)?)
    }

    pub fn swarm_complete(&self, spec: &str, task_id: &str, notes: Option<String>) -> Result<Completion, PiError> {
        let reg = self.current()?;
        Ok(self.swarm.complete(&self.registry, spec, task_id, &reg.name, notes)?)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusView {
    pub registration: Registration,
    pub recent_feed: Vec<FeedEvent>,
    pub reservations: Vec<registry::model::Reservation>,
}
