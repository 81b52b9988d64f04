//! Offline action queue.
//!
//! Actions the user performs while the realtime channel is down (send a message,
//! create or move a task, ...) are appended to a durable queue and replayed in
//! insertion order once connectivity returns.
//!
//! # Features
//!
//! - Single storage slot holding the whole ordered list, re-read on every call
//! - Sequential, in-order replay with per-entry success / failure capture
//! - Attempt ceiling: an entry is dropped after `max_attempts` failed replays
//! - Synchronous change notifications to any number of subscribers
//!
//! # Delivery guarantees
//!
//! Replay is at-least-once. If a handler's remote call succeeds but the process
//! dies before the entry is dequeued, the entry is replayed on the next pass.
//! Handlers should deduplicate on [`QueueEntry::id`], which never changes across
//! replays.
//!
//! Within one process every read-modify-write cycle is serialized. Two processes
//! sharing the same slot are last-writer-wins.

use crate::action::QueueAction;
use crate::clock::{SharedClock, SystemClock};
use crate::config::QueueConfig;
use crate::error::{SyncError, SyncResult};
use crate::storage::{MemoryStorage, SlotStorage, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use uuid::Uuid;

/// A queued action awaiting replay
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry<A> {
    /// `<unix-millis>-<random suffix>`; unique, never reused
    pub id: String,
    /// Payload kind
    #[serde(rename = "type")]
    pub kind: String,
    /// Sub-operation used for routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub data: A,
    pub timestamp: DateTime<Utc>,
    /// Failed replay attempts so far
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
}

impl<A> QueueEntry<A> {
    /// Key a handler can use to deduplicate replays of this entry
    pub fn idempotency_key(&self) -> &str {
        &self.id
    }
}

/// Result of [`OfflineQueue::mark_failed`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkFailedOutcome {
    /// Entry stays queued for the next pass
    Retained { attempts: u32 },
    /// Entry reached the attempt ceiling and was removed
    Dropped { attempts: u32 },
    /// No entry with that id
    NotFound,
}

impl MarkFailedOutcome {
    /// Whether the entry was removed for good
    pub fn is_dropped(&self) -> bool {
        matches!(self, MarkFailedOutcome::Dropped { .. })
    }
}

/// A replay failure for one entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub id: String,
    pub error: String,
}

/// Summary of one [`OfflineQueue::process_queue`] pass
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Ids replayed successfully, in order
    pub success: Vec<String>,
    /// Ids whose handler failed this pass, in order
    pub failed: Vec<FailedEntry>,
    /// Subset of `failed` that hit the attempt ceiling and left the queue
    pub dropped: Vec<String>,
}

impl ReplayReport {
    /// Whether every entry replayed successfully
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Total entries handled in this pass
    pub fn processed(&self) -> usize {
        self.success.len() + self.failed.len()
    }

    /// User-facing summary of failures, `None` if there were none
    pub fn failure_summary(&self) -> Option<String> {
        match self.failed.len() {
            0 => None,
            1 => Some("1 action could not be synced".to_string()),
            n => Some(format!("{} actions could not be synced", n)),
        }
    }
}

/// Listener invoked with the full queue after each mutation
pub type QueueListener<A> = Arc<dyn Fn(&[QueueEntry<A>]) + Send + Sync>;

/// Identifier of a registered listener
pub type SubscriptionId = u64;

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

struct ListenerRegistry<A> {
    listeners: RwLock<HashMap<SubscriptionId, QueueListener<A>>>,
    next_id: AtomicU64,
}

impl<A> ListenerRegistry<A> {
    fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn subscribe(&self, listener: QueueListener<A>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, listener);
        id
    }

    fn snapshot(&self) -> Vec<QueueListener<A>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<A: Send + Sync> Unsubscribe for ListenerRegistry<A> {
    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }
}

/// Handle returned by [`OfflineQueue::subscribe`]
///
/// Dropping the handle leaves the listener registered; call [`unsubscribe`](Self::unsubscribe)
/// to remove it.
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<dyn Unsubscribe>,
}

impl Subscription {
    /// Listener id
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the listener. Returns `false` if it was already gone or the queue was dropped.
    pub fn unsubscribe(self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.unsubscribe(self.id))
            .unwrap_or(false)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Durable, ordered holding area for actions that could not be sent
///
/// Explicitly constructed; share it with `Arc` if several components need it.
pub struct OfflineQueue<A, S = MemoryStorage> {
    storage: S,
    config: QueueConfig,
    clock: SharedClock,
    listeners: Arc<ListenerRegistry<A>>,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl<A: QueueAction> OfflineQueue<A, MemoryStorage> {
    /// Queue backed by a fresh in-memory storage with default settings
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }
}

impl<A: QueueAction, S: SlotStorage> OfflineQueue<A, S> {
    /// Create a queue with default settings and the system clock
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, QueueConfig::default(), SystemClock::shared())
    }

    /// Create a queue with explicit settings and clock
    pub fn with_config(storage: S, config: QueueConfig, clock: SharedClock) -> Self {
        Self {
            storage,
            config,
            clock,
            listeners: Arc::new(ListenerRegistry::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Queue settings
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Backing storage
    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========== Storage ==========

    /// Current entries in insertion order.
    ///
    /// A missing slot is an empty queue. A slot that cannot be read or decoded is
    /// logged and also treated as empty; use [`try_get_queue`](Self::try_get_queue)
    /// to tell the two apart.
    pub fn get_queue(&self) -> Vec<QueueEntry<A>> {
        match self.try_get_queue() {
            Ok(queue) => queue,
            Err(e) => {
                tracing::warn!(
                    key = %self.config.storage_key,
                    "Failed to read offline queue, treating as empty: {}",
                    e
                );
                Vec::new()
            }
        }
    }

    /// Current entries, surfacing storage and decode failures
    pub fn try_get_queue(&self) -> StorageResult<Vec<QueueEntry<A>>> {
        match self.storage.read(&self.config.storage_key)? {
            None => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| StorageError::DeserializationError(e.to_string())),
        }
    }

    /// Write the full list back. Failures (e.g. quota exceeded) are logged, not returned.
    pub fn save_queue(&self, queue: &[QueueEntry<A>]) {
        if let Err(e) = self.try_save_queue(queue) {
            tracing::warn!(
                key = %self.config.storage_key,
                entries = queue.len(),
                "Failed to persist offline queue: {}",
                e
            );
        }
    }

    /// Write the full list back, surfacing failures
    pub fn try_save_queue(&self, queue: &[QueueEntry<A>]) -> StorageResult<()> {
        let json = serde_json::to_string(queue)?;
        self.storage.write(&self.config.storage_key, &json)
    }

    // ========== Queue Management ==========

    /// Append an action. Duplicate payloads are stored independently.
    pub fn enqueue(&self, data: A) -> QueueEntry<A> {
        let now = self.clock.now();
        let entry = QueueEntry {
            id: generate_entry_id(now),
            kind: data.kind().to_string(),
            action: data.action().map(str::to_string),
            data,
            timestamp: now,
            attempts: 0,
            last_error: None,
            last_attempt: None,
        };

        let queue = {
            let _guard = self.lock_writes();
            let mut queue = self.get_queue();
            queue.push(entry.clone());
            self.save_queue(&queue);
            queue
        };

        tracing::debug!(id = %entry.id, kind = %entry.kind, size = queue.len(), "Queued offline action");
        self.notify(&queue);
        entry
    }

    /// Remove an entry. Returns `false` (and does nothing) if it is not queued.
    pub fn dequeue(&self, id: &str) -> bool {
        let queue = {
            let _guard = self.lock_writes();
            let mut queue = self.get_queue();
            let before = queue.len();
            queue.retain(|entry| entry.id != id);
            if queue.len() == before {
                return false;
            }
            self.save_queue(&queue);
            queue
        };

        tracing::debug!(id, size = queue.len(), "Dequeued offline action");
        self.notify(&queue);
        true
    }

    /// Remove an entry, failing if it is missing or the slot cannot be updated
    pub fn try_dequeue(&self, id: &str) -> SyncResult<QueueEntry<A>> {
        let (removed, queue) = {
            let _guard = self.lock_writes();
            let mut queue = self.try_get_queue()?;
            let pos = queue
                .iter()
                .position(|entry| entry.id == id)
                .ok_or_else(|| SyncError::EntryNotFound(id.to_string()))?;
            let removed = queue.remove(pos);
            self.try_save_queue(&queue)?;
            (removed, queue)
        };

        self.notify(&queue);
        Ok(removed)
    }

    /// Record a failed replay.
    ///
    /// Increments `attempts` and stamps `last_error` / `last_attempt`. Once
    /// `attempts` reaches the ceiling the entry is removed for good.
    pub fn mark_failed(&self, id: &str, error: impl fmt::Display) -> MarkFailedOutcome {
        let (outcome, queue) = {
            let _guard = self.lock_writes();
            let mut queue = self.get_queue();
            let Some(pos) = queue.iter().position(|entry| entry.id == id) else {
                return MarkFailedOutcome::NotFound;
            };

            let entry = &mut queue[pos];
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
            entry.last_attempt = Some(self.clock.now());
            let attempts = entry.attempts;

            let outcome = if attempts >= self.config.max_attempts {
                let dropped = queue.remove(pos);
                tracing::warn!(
                    id,
                    kind = %dropped.kind,
                    attempts,
                    "Dropping offline action after repeated failures: {}",
                    dropped.last_error.as_deref().unwrap_or_default()
                );
                MarkFailedOutcome::Dropped { attempts }
            } else {
                tracing::debug!(id, attempts, "Offline action replay failed");
                MarkFailedOutcome::Retained { attempts }
            };

            self.save_queue(&queue);
            (outcome, queue)
        };

        self.notify(&queue);
        outcome
    }

    /// Remove every entry. Returns how many were removed.
    ///
    /// If the slot cannot be removed the failure is logged, nothing changes and
    /// subscribers are not notified.
    pub fn clear(&self) -> usize {
        match self.try_clear() {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(key = %self.config.storage_key, "Failed to clear offline queue: {}", e);
                0
            }
        }
    }

    /// Remove every entry, surfacing storage failures
    ///
    /// An unreadable slot counts as zero entries but is still removed.
    pub fn try_clear(&self) -> SyncResult<usize> {
        let count = {
            let _guard = self.lock_writes();
            let count = self.get_queue().len();
            self.storage.remove(&self.config.storage_key)?;
            count
        };

        tracing::debug!(removed = count, "Cleared offline queue");
        self.notify(&[]);
        Ok(count)
    }

    /// Number of queued entries
    pub fn size(&self) -> usize {
        self.get_queue().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Entries of one payload kind, in queue order
    pub fn get_by_type(&self, kind: &str) -> Vec<QueueEntry<A>> {
        self.get_queue()
            .into_iter()
            .filter(|entry| entry.kind == kind)
            .collect()
    }

    // ========== Replay ==========

    /// Replay a snapshot of the queue through `handler`, one entry at a time.
    ///
    /// The snapshot is taken at call time; entries enqueued during the pass wait for
    /// the next one. Entry N+1 is not started until entry N's handler settles. On
    /// success the entry is dequeued, on error it goes through
    /// [`mark_failed`](Self::mark_failed). One failure never stops the batch, and
    /// nothing is retried within the same pass.
    ///
    /// Delivery is at-least-once; see the module docs.
    pub async fn process_queue<F, Fut, T, E>(&self, mut handler: F) -> ReplayReport
    where
        F: FnMut(QueueEntry<A>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let snapshot = self.get_queue();
        let mut report = ReplayReport::default();
        if snapshot.is_empty() {
            return report;
        }

        tracing::info!(entries = snapshot.len(), "Replaying offline queue");

        for entry in snapshot {
            let id = entry.id.clone();
            match handler(entry).await {
                Ok(_) => {
                    self.dequeue(&id);
                    report.success.push(id);
                }
                Err(e) => {
                    let error = e.to_string();
                    if self.mark_failed(&id, &error).is_dropped() {
                        report.dropped.push(id.clone());
                    }
                    report.failed.push(FailedEntry { id, error });
                }
            }
        }

        tracing::info!(
            succeeded = report.success.len(),
            failed = report.failed.len(),
            dropped = report.dropped.len(),
            "Offline queue replay finished"
        );
        report
    }

    // ========== Notifications ==========

    /// Register a listener called with the full queue after every mutation
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[QueueEntry<A>]) + Send + Sync + 'static,
    {
        let id = self.listeners.subscribe(Arc::new(listener));
        let registry: Arc<dyn Unsubscribe> = self.listeners.clone();
        Subscription {
            id,
            registry: Arc::downgrade(&registry),
        }
    }

    /// Number of registered listeners
    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    fn notify(&self, queue: &[QueueEntry<A>]) {
        for listener in self.listeners.snapshot() {
            listener(queue);
        }
    }
}

fn generate_entry_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.timestamp_millis(), &suffix[..9])
}
