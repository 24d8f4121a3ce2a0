//! Derived IN/OUT status.
//!
//! # Responsibility
//! - Fold a day partition into each member's current status.
//! - Guard sign-out/sign-in against the freshly read partition before
//!   appending, so a stale selection never produces a duplicate event.
//! - Keep a live per-group cache that is rebuilt from the whole partition on
//!   every change notified by the store.
//!
//! # Invariants
//! - Status is never patched incrementally; every change replays the full
//!   partition, which keeps retraction correct without delta tracking.
//! - The fold does not require alternating kinds: the latest event per member
//!   wins, so OUT/OUT or IN/IN runs are tolerated rather than rejected.
//! - A failed refresh leaves the previous cache in place.
//! - The cache only moves forward in store revision, so a late watcher
//!   snapshot cannot overwrite a fresher refresh.

use crate::calendar::{Calendar, Clock};
use crate::errors::CoreError;
use crate::models::{Event, EventKind, Member, NewEvent};
use crate::roster::Roster;
use crate::storage::StateFile;
use crate::store::{EventStore, PartitionSnapshot, Subscription};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Partition events in replay order.
fn replay_order(events: &[Event]) -> Vec<&Event> {
    let mut ordered: Vec<&Event> = events.iter().collect();
    ordered.sort_by_key(|event| event.order_key());
    ordered
}

pub fn is_out(member_id: &str, events: &[Event]) -> bool {
    replay_order(events)
        .into_iter()
        .filter(|event| event.member_id == member_id)
        .fold(false, |_, event| event.kind == EventKind::Out)
}

pub fn can_sign_out(member_id: &str, events: &[Event]) -> bool {
    !is_out(member_id, events)
}

pub fn can_sign_in(member_id: &str, events: &[Event]) -> bool {
    is_out(member_id, events)
}

/// `memberId -> isOut` for every member that appears in the partition.
pub fn derive_status_map(events: &[Event]) -> BTreeMap<String, bool> {
    replay_order(events)
        .into_iter()
        .fold(BTreeMap::new(), |mut status, event| {
            status.insert(event.member_id.clone(), event.kind == EventKind::Out);
            status
        })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupStatus {
    pub day_key: String,
    pub revision: u64,
    pub events: Vec<Event>,
    pub status: BTreeMap<String, bool>,
}

impl GroupStatus {
    fn derive(day_key: &str, snapshot: PartitionSnapshot) -> Self {
        let status = derive_status_map(&snapshot.events);
        Self {
            day_key: day_key.to_string(),
            revision: snapshot.revision,
            events: snapshot.events,
            status,
        }
    }

    pub fn is_out(&self, member_id: &str) -> bool {
        self.status.get(member_id).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutcome {
    Recorded(Event),
    /// Precondition failed; nothing was appended.
    Ignored,
}

impl SignOutcome {
    pub fn event(&self) -> Option<&Event> {
        match self {
            SignOutcome::Recorded(event) => Some(event),
            SignOutcome::Ignored => None,
        }
    }
}

#[derive(Default)]
struct LiveView {
    day_key: String,
    groups: HashMap<String, GroupStatus>,
    watchers: HashMap<String, JoinHandle<()>>,
}

/// Owns the live status cache for the current day partition.
pub struct StatusEngine<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    calendar: Calendar,
    live: Arc<RwLock<LiveView>>,
    status_file: Option<StateFile>,
    roster: Option<Roster>,
    writer: Mutex<()>,
}

impl<S: EventStore> StatusEngine<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, calendar: Calendar) -> Self {
        let live = LiveView {
            day_key: calendar.day_key(clock.now()),
            ..LiveView::default()
        };
        Self {
            store,
            clock,
            calendar,
            live: Arc::new(RwLock::new(live)),
            status_file: None,
            roster: None,
            writer: Mutex::new(()),
        }
    }

    /// Writes every derived status map through to the state document.
    pub fn with_status_file(mut self, file: StateFile) -> Self {
        self.status_file = Some(file);
        self
    }

    /// Restricts caching and watching to groups the roster knows about.
    pub fn with_roster(mut self, roster: Roster) -> Self {
        self.roster = Some(roster);
        self
    }

    async fn known_group(&self, group_id: &str) -> bool {
        match &self.roster {
            Some(roster) => roster.has_group(group_id).await,
            None => true,
        }
    }

    async fn ensure_known(&self, group_id: &str) -> Result<(), CoreError> {
        if self.known_group(group_id).await {
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("group `{group_id}`")))
        }
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub async fn current_day_key(&self) -> String {
        self.live.read().await.day_key.clone()
    }

    /// Cached status for the group, loading it on first use.
    pub async fn snapshot(&self, group_id: &str) -> Result<GroupStatus, CoreError> {
        if let Some(cached) = self.live.read().await.groups.get(group_id) {
            return Ok(cached.clone());
        }
        self.refresh(group_id).await
    }

    /// Re-reads the current partition and rebuilds the group's cache.
    pub async fn refresh(&self, group_id: &str) -> Result<GroupStatus, CoreError> {
        self.ensure_known(group_id).await?;
        let day_key = self.current_day_key().await;
        let snapshot = self.store.snapshot(group_id, &day_key).await?;
        let (derived, _) = apply_snapshot(&self.live, self.status_file.as_ref(), group_id, &day_key, snapshot).await;
        Ok(derived)
    }

    /// Keeps the group's cache current with changes from any writer.
    pub async fn watch(&self, group_id: &str) -> Result<(), CoreError> {
        let day_key = self.current_day_key().await;
        if self.live.read().await.watchers.contains_key(group_id) {
            return Ok(());
        }
        self.ensure_known(group_id).await?;
        let subscription = self.store.subscribe(group_id, &day_key).await?;

        let mut live = self.live.write().await;
        if live.day_key != day_key || live.watchers.contains_key(group_id) {
            return Ok(());
        }
        let handle = tokio::spawn(run_watcher(
            Arc::clone(&self.live),
            self.status_file.clone(),
            subscription,
        ));
        live.watchers.insert(group_id.to_string(), handle);
        Ok(())
    }

    pub async fn watched_groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.live.read().await.watchers.keys().cloned().collect();
        groups.sort();
        groups
    }

    pub async fn sign_out(&self, member: &Member) -> Result<SignOutcome, CoreError> {
        self.record(member, EventKind::Out).await
    }

    pub async fn sign_in(&self, member: &Member) -> Result<SignOutcome, CoreError> {
        self.record(member, EventKind::In).await
    }

    async fn record(&self, member: &Member, kind: EventKind) -> Result<SignOutcome, CoreError> {
        let _writer = self.writer.lock().await;
        let timestamp = self.clock.now();
        let day_key = self.calendar.day_key(timestamp);
        let events = self.store.list_by_partition(&member.group_id, &day_key).await?;

        let allowed = match kind {
            EventKind::Out => can_sign_out(&member.id, &events),
            EventKind::In => can_sign_in(&member.id, &events),
        };
        if !allowed {
            debug!(
                group_id = %member.group_id,
                member_id = %member.id,
                %kind,
                "ignoring sign {kind} for member already in that state"
            );
            return Ok(SignOutcome::Ignored);
        }

        let event = self
            .store
            .append(NewEvent {
                group_id: member.group_id.clone(),
                member_id: member.id.clone(),
                member_name: member.name.clone(),
                kind,
                timestamp,
                day_key,
            })
            .await?;
        if let Err(err) = self.refresh(&member.group_id).await {
            warn!(group_id = %member.group_id, "status refresh after append failed: {err}");
        }
        Ok(SignOutcome::Recorded(event))
    }

    /// Retracts the group's most recent event today, whichever member it
    /// belongs to. "Today" comes from the clock, as for sign-out and sign-in,
    /// so a pending rollover never lets undo reach into yesterday.
    pub async fn undo_last(&self, group_id: &str) -> Result<bool, CoreError> {
        self.ensure_known(group_id).await?;
        let _writer = self.writer.lock().await;
        let day_key = self.calendar.day_key(self.clock.now());
        let removed = self.store.delete_last(group_id, &day_key).await?;
        if let Err(err) = self.refresh(group_id).await {
            warn!(group_id, "status refresh after undo failed: {err}");
        }
        Ok(removed)
    }

    /// Moves the live view from `from` to `to`: watchers on the old partition
    /// are aborted, caches cleared, and the same groups re-watched on `to`.
    /// Returns `false` if the view was not on `from`.
    pub async fn advance_day(&self, from: &str, to: &str) -> Result<bool, CoreError> {
        let regroup = {
            let mut live = self.live.write().await;
            if live.day_key != from {
                return Ok(false);
            }
            let groups: Vec<String> = live
                .watchers
                .drain()
                .map(|(group_id, handle)| {
                    handle.abort();
                    group_id
                })
                .collect();
            live.groups.clear();
            live.day_key = to.to_string();
            groups
        };
        if let Some(file) = &self.status_file {
            file.clear_status().await;
        }
        for group_id in regroup {
            if !self.known_group(&group_id).await {
                debug!(%group_id, "group left the roster; not re-watching");
                continue;
            }
            if let Err(err) = self.watch(&group_id).await {
                warn!(%group_id, "failed to re-watch group after rollover: {err}");
            }
        }
        Ok(true)
    }
}

impl<S> Drop for StatusEngine<S> {
    fn drop(&mut self) {
        if let Ok(mut live) = self.live.try_write() {
            live.watchers.drain().for_each(|(_, handle)| handle.abort());
        }
    }
}

async fn apply_snapshot(
    live: &RwLock<LiveView>,
    status_file: Option<&StateFile>,
    group_id: &str,
    day_key: &str,
    snapshot: PartitionSnapshot,
) -> (GroupStatus, bool) {
    let derived = GroupStatus::derive(day_key, snapshot);
    {
        let mut live = live.write().await;
        if live.day_key != day_key {
            return (derived, false);
        }
        if let Some(cached) = live.groups.get(group_id) {
            if cached.revision > derived.revision {
                return (cached.clone(), true);
            }
        }
        live.groups.insert(group_id.to_string(), derived.clone());
    }
    if let Some(file) = status_file {
        file.record_status(group_id, &derived.status).await;
    }
    (derived, true)
}

async fn run_watcher(live: Arc<RwLock<LiveView>>, status_file: Option<StateFile>, mut subscription: Subscription) {
    let group_id = subscription.group_id().to_string();
    let day_key = subscription.day_key().to_string();
    while let Some(mut snapshot) = subscription.recv().await {
        if let Some(newer) = subscription.latest() {
            snapshot = newer;
        }
        let (_, current) = apply_snapshot(&live, status_file.as_ref(), &group_id, &day_key, snapshot).await;
        if !current {
            debug!(%group_id, %day_key, "watcher outlived its partition");
            break;
        }
    }
}
