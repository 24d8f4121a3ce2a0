//! Append-only event log partitioned by day key.
//!
//! `EventStore` is the seam between the core and whatever persists events. The
//! core only ever relies on the contract below, so a remote realtime backend
//! can stand in for `LocalStore` without touching the status engine.
//!
//! # Invariants
//! - Partition views are ordered by `(timestamp, seq)` ascending; `seq` is
//!   assigned by the store, so ties resolve to insertion order.
//! - Subscribers receive snapshots in store write order, each stamped with
//!   the store revision it reflects.
//! - A dropped `Subscription` never receives another snapshot.

use crate::calendar::parse_day_key;
use crate::errors::CoreError;
use crate::models::{DayRange, Event, NewEvent};
use crate::storage::StateFile;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

pub trait EventStore: Send + Sync + 'static {
    /// Stores `event` under its day key and returns it with its identity.
    fn append(&self, event: NewEvent) -> impl Future<Output = Result<Event, CoreError>> + Send;

    /// Events for one group across an inclusive day range, in partition order.
    fn query(
        &self,
        group_id: &str,
        range: &DayRange,
    ) -> impl Future<Output = Result<Vec<Event>, CoreError>> + Send;

    /// The group's partition together with the revision it was read at.
    fn snapshot(
        &self,
        group_id: &str,
        day_key: &str,
    ) -> impl Future<Output = Result<PartitionSnapshot, CoreError>> + Send;

    /// Removes one event. An unknown id is a benign `false`.
    fn delete(&self, event_id: &str) -> impl Future<Output = Result<bool, CoreError>> + Send;

    /// Removes the chronologically last event of the group's partition, across
    /// all members.
    fn delete_last(
        &self,
        group_id: &str,
        day_key: &str,
    ) -> impl Future<Output = Result<bool, CoreError>> + Send;

    /// Drops the partition for every group. Returns how many events went.
    fn purge_partition(&self, day_key: &str) -> impl Future<Output = Result<usize, CoreError>> + Send;

    /// Streams the partition: the current snapshot first, then one snapshot
    /// per change.
    fn subscribe(
        &self,
        group_id: &str,
        day_key: &str,
    ) -> impl Future<Output = Result<Subscription, CoreError>> + Send;

    fn list_by_partition(
        &self,
        group_id: &str,
        day_key: &str,
    ) -> impl Future<Output = Result<Vec<Event>, CoreError>> + Send {
        let range = DayRange::single(day_key);
        async move { self.query(group_id, &range).await }
    }
}

/// A partition view. Higher revisions supersede lower ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSnapshot {
    pub revision: u64,
    pub events: Vec<Event>,
}

pub fn validate_new_event(event: &NewEvent) -> Result<(), CoreError> {
    if event.group_id.trim().is_empty() {
        return Err(CoreError::invalid("groupId must not be empty"));
    }
    if event.member_id.trim().is_empty() {
        return Err(CoreError::invalid("memberId must not be empty"));
    }
    parse_day_key(&event.day_key)?;
    Ok(())
}

pub fn sort_partition(events: &mut [Event]) {
    events.sort_by_key(Event::order_key);
}

struct Subscriber {
    group_id: String,
    day_key: String,
    tx: mpsc::UnboundedSender<PartitionSnapshot>,
}

/// Live subscriptions keyed by handle id.
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Subscriber>>,
}

impl SubscriberRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a subscriber and queues `initial` as its first snapshot.
    pub fn register(self: &Arc<Self>, group_id: &str, day_key: &str, initial: PartitionSnapshot) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(initial);
        self.entries().insert(
            id,
            Subscriber {
                group_id: group_id.to_string(),
                day_key: day_key.to_string(),
                tx,
            },
        );
        Subscription {
            id,
            group_id: group_id.to_string(),
            day_key: day_key.to_string(),
            rx,
            registry: Arc::downgrade(self),
        }
    }

    pub fn notify(&self, group_id: &str, day_key: &str, revision: u64, events: &[Event]) {
        self.entries().retain(|id, subscriber| {
            if subscriber.group_id != group_id || subscriber.day_key != day_key {
                return true;
            }
            let snapshot = PartitionSnapshot {
                revision,
                events: events.to_vec(),
            };
            let delivered = subscriber.tx.send(snapshot).is_ok();
            if !delivered {
                debug!(subscription = *id, "dropping closed subscription");
            }
            delivered
        });
    }

    /// Group ids with at least one live subscriber on `day_key`.
    pub fn groups_watching(&self, day_key: &str) -> Vec<String> {
        let mut groups: Vec<String> = self
            .entries()
            .values()
            .filter(|subscriber| subscriber.day_key == day_key)
            .map(|subscriber| subscriber.group_id.clone())
            .collect();
        groups.sort();
        groups.dedup();
        groups
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.entries().remove(&id);
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Subscriber>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cancellable handle on a partition feed. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    group_id: String,
    day_key: String,
    rx: mpsc::UnboundedReceiver<PartitionSnapshot>,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn day_key(&self) -> &str {
        &self.day_key
    }

    /// Next partition snapshot, or `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<PartitionSnapshot> {
        self.rx.recv().await
    }

    /// Latest queued snapshot without waiting, skipping older ones.
    pub fn latest(&mut self) -> Option<PartitionSnapshot> {
        let mut latest = None;
        while let Ok(snapshot) = self.rx.try_recv() {
            latest = Some(snapshot);
        }
        latest
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

/// Event store over the local state document.
pub struct LocalStore {
    file: StateFile,
    registry: Arc<SubscriberRegistry>,
    next_seq: AtomicU64,
    revision: AtomicU64,
}

impl LocalStore {
    pub async fn new(file: StateFile) -> Self {
        let next_seq = file.lock().await.max_seq() + 1;
        Self {
            file,
            registry: SubscriberRegistry::new(),
            next_seq: AtomicU64::new(next_seq),
            revision: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Bumps the revision; call with the document lock held.
    fn bump_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn partition_for(events: Option<&Vec<Event>>, group_id: &str) -> Vec<Event> {
        let mut partition: Vec<Event> = events
            .into_iter()
            .flatten()
            .filter(|event| event.group_id == group_id)
            .cloned()
            .collect();
        sort_partition(&mut partition);
        partition
    }

    async fn remove_where(
        &self,
        day_key: &str,
        pick: impl FnOnce(&[Event]) -> Option<String> + Send,
    ) -> Result<bool, CoreError> {
        let mut data = self.file.lock().await;
        let Some(partition) = data.logs_by_day_key.get(day_key) else {
            return Ok(false);
        };
        let Some(event_id) = pick(partition.as_slice()) else {
            return Ok(false);
        };

        let mut next = data.clone();
        let mut group_id = None;
        if let Some(events) = next.logs_by_day_key.get_mut(day_key) {
            if let Some(pos) = events.iter().position(|event| event.id == event_id) {
                group_id = Some(events.remove(pos).group_id);
            }
            if events.is_empty() {
                next.logs_by_day_key.remove(day_key);
            }
        }
        let Some(group_id) = group_id else {
            return Ok(false);
        };

        self.file.persist(&next).await?;
        *data = next;
        let revision = self.bump_revision();
        let partition = Self::partition_for(data.logs_by_day_key.get(day_key), &group_id);
        self.registry.notify(&group_id, day_key, revision, &partition);
        Ok(true)
    }
}

impl EventStore for LocalStore {
    async fn append(&self, event: NewEvent) -> Result<Event, CoreError> {
        validate_new_event(&event)?;

        let mut data = self.file.lock().await;
        let stored = Event {
            id: Uuid::new_v4().to_string(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            group_id: event.group_id,
            member_id: event.member_id,
            member_name: event.member_name,
            kind: event.kind,
            timestamp: event.timestamp,
            day_key: event.day_key,
        };

        let mut next = data.clone();
        next.logs_by_day_key
            .entry(stored.day_key.clone())
            .or_default()
            .push(stored.clone());
        self.file.persist(&next).await?;
        *data = next;

        let revision = self.bump_revision();
        let partition = Self::partition_for(data.logs_by_day_key.get(&stored.day_key), &stored.group_id);
        self.registry.notify(&stored.group_id, &stored.day_key, revision, &partition);
        Ok(stored)
    }

    async fn query(&self, group_id: &str, range: &DayRange) -> Result<Vec<Event>, CoreError> {
        if range.start > range.end {
            return Ok(Vec::new());
        }
        let data = self.file.lock().await;
        let mut events: Vec<Event> = data
            .logs_by_day_key
            .range(range.start.clone()..=range.end.clone())
            .flat_map(|(_, events)| events.iter())
            .filter(|event| event.group_id == group_id)
            .cloned()
            .collect();
        sort_partition(&mut events);
        Ok(events)
    }

    async fn snapshot(&self, group_id: &str, day_key: &str) -> Result<PartitionSnapshot, CoreError> {
        let data = self.file.lock().await;
        Ok(PartitionSnapshot {
            revision: self.revision.load(Ordering::SeqCst),
            events: Self::partition_for(data.logs_by_day_key.get(day_key), group_id),
        })
    }

    async fn delete(&self, event_id: &str) -> Result<bool, CoreError> {
        let day_key = {
            let data = self.file.lock().await;
            data.logs_by_day_key
                .iter()
                .find(|(_, events)| events.iter().any(|event| event.id == event_id))
                .map(|(day_key, _)| day_key.clone())
        };
        let Some(day_key) = day_key else {
            return Ok(false);
        };
        let event_id = event_id.to_string();
        self.remove_where(&day_key, move |events| {
            events.iter().find(|event| event.id == event_id).map(|event| event.id.clone())
        })
        .await
    }

    async fn delete_last(&self, group_id: &str, day_key: &str) -> Result<bool, CoreError> {
        let group_id = group_id.to_string();
        self.remove_where(day_key, move |events| {
            events
                .iter()
                .filter(|event| event.group_id == group_id)
                .max_by_key(|event| event.order_key())
                .map(|event| event.id.clone())
        })
        .await
    }

    async fn purge_partition(&self, day_key: &str) -> Result<usize, CoreError> {
        let mut data = self.file.lock().await;
        let Some(events) = data.logs_by_day_key.get(day_key) else {
            return Ok(0);
        };
        let removed = events.len();
        let mut groups: Vec<String> = events.iter().map(|event| event.group_id.clone()).collect();
        groups.sort();
        groups.dedup();

        let mut next = data.clone();
        next.logs_by_day_key.remove(day_key);
        self.file.persist(&next).await?;
        *data = next;

        let revision = self.bump_revision();
        for group_id in groups {
            self.registry.notify(&group_id, day_key, revision, &[]);
        }
        Ok(removed)
    }

    async fn subscribe(&self, group_id: &str, day_key: &str) -> Result<Subscription, CoreError> {
        let data = self.file.lock().await;
        let initial = PartitionSnapshot {
            revision: self.revision.load(Ordering::SeqCst),
            events: Self::partition_for(data.logs_by_day_key.get(day_key), group_id),
        };
        Ok(self.registry.register(group_id, day_key, initial))
    }
}
