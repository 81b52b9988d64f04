//! Advisory edit locks and pending-change tracking for shared items.
//!
//! Locks are cooperative: well-behaved screens call [`ConflictResolver::acquire_lock`]
//! before allowing an edit and show "being edited by X" on refusal. Nothing stops a
//! client from writing without a lock; enforcement belongs to the server.
//!
//! # Lock lifecycle
//!
//! - **Unlocked → Locked(holder)**: `acquire_lock` with no valid lock present
//! - **Locked(holder) → Locked(holder)**: `acquire_lock` or `extend_lock` by the holder
//!   pushes `expires_at` out by the lock duration
//! - **Locked(holder) → Unlocked**: `release_lock` by the holder, `force_release_lock`
//!   by anyone, or expiry
//!
//! A lock is expired once `expires_at <= now`. Every query ignores expired locks;
//! the sweep started by [`ConflictResolver::start`] deletes them.

use crate::clock::{SharedClock, SystemClock};
use crate::config::{LockConfig, MergeConfig, SyncConfig};
use crate::merge::{self, Fields, MergeResolution, MergeStrategy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Longest sweep period the background task will use
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// An advisory lock on one item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditLock {
    pub item_id: String,
    pub user_id: String,
    /// Informational classification ("task", "message", ...)
    pub item_type: String,
    /// Acquisition or last renewal
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl EditLock {
    fn new(item_id: &str, user_id: &str, item_type: &str, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            item_id: item_id.to_string(),
            user_id: user_id.to_string(),
            item_type: item_type.to_string(),
            timestamp: now,
            expires_at: expiry_after(now, ttl),
        }
    }

    /// Whether the lock has lapsed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry, zero once expired
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    fn renew(&mut self, now: DateTime<Utc>, ttl: chrono::Duration) {
        self.timestamp = now;
        self.expires_at = expiry_after(now, ttl);
    }
}

fn expiry_after(now: DateTime<Utc>, ttl: chrono::Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A lock together with its remaining lifetime
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveLock {
    pub lock: EditLock,
    pub remaining: Duration,
}

/// Result of [`ConflictResolver::acquire_lock`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Caller holds the lock; `renewed` if it already did
    Acquired { lock: EditLock, renewed: bool },
    /// Someone else holds a valid lock
    Locked { locked_by: String, expires_in: Duration },
}

impl AcquireOutcome {
    /// Whether the caller now holds the lock
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired { .. })
    }
}

/// Result of [`ConflictResolver::extend_lock`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtendOutcome {
    Extended(EditLock),
    NotHolder { held_by: String },
    NotLocked,
}

impl ExtendOutcome {
    pub fn is_extended(&self) -> bool {
        matches!(self, ExtendOutcome::Extended(_))
    }
}

/// Result of [`ConflictResolver::release_lock`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    NotHolder { held_by: String },
    NotLocked,
}

impl ReleaseOutcome {
    pub fn is_released(&self) -> bool {
        matches!(self, ReleaseOutcome::Released)
    }
}

/// Local edits to an item not yet confirmed by the server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub item_id: String,
    pub user_id: String,
    pub changes: Fields,
    pub timestamp: DateTime<Utc>,
}

/// Advisory edit locks plus merge helpers
///
/// Build one per process (or per test) and share it with `Arc`. The expiry sweep
/// only runs between [`start`](Self::start) and [`SweepHandle::stop`].
#[derive(Debug)]
pub struct ConflictResolver {
    config: LockConfig,
    merge: MergeConfig,
    clock: SharedClock,
    locks: RwLock<HashMap<String, EditLock>>,
    pending: RwLock<HashMap<String, PendingChange>>,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictResolver {
    /// Create a resolver with default lock settings and the system clock
    pub fn new() -> Self {
        Self::with_config(LockConfig::default(), SystemClock::shared())
    }

    /// Create a resolver with explicit settings and clock
    pub fn with_config(config: LockConfig, clock: SharedClock) -> Self {
        Self {
            config,
            merge: MergeConfig::default(),
            clock,
            locks: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Create a resolver from the lock and merge sections of `config`
    pub fn from_sync_config(config: &SyncConfig, clock: SharedClock) -> Self {
        Self {
            merge: config.merge.clone(),
            ..Self::with_config(config.locks.clone(), clock)
        }
    }

    /// Lock settings
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Strategy used when callers don't pick one
    pub fn default_strategy(&self) -> MergeStrategy {
        self.merge.default_strategy
    }

    fn ttl(&self) -> chrono::Duration {
        chrono::Duration::try_milliseconds(i64::try_from(self.config.lock_duration_ms).unwrap_or(i64::MAX))
            .unwrap_or(chrono::Duration::MAX)
    }

    fn read_locks(&self) -> RwLockReadGuard<'_, HashMap<String, EditLock>> {
        self.locks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_locks(&self) -> RwLockWriteGuard<'_, HashMap<String, EditLock>> {
        self.locks.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_pending(&self) -> RwLockWriteGuard<'_, HashMap<String, PendingChange>> {
        self.pending.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ========== Locking ==========

    /// Take or renew the lock on `item_id` for `user_id`.
    pub fn acquire_lock(&self, item_id: &str, user_id: &str, item_type: &str) -> AcquireOutcome {
        let now = self.clock.now();
        let mut locks = self.write_locks();

        if let Some(existing) = locks.get_mut(item_id) {
            if !existing.is_expired_at(now) {
                if existing.user_id != user_id {
                    tracing::debug!(item_id, user_id, holder = %existing.user_id, "Edit lock refused");
                    return AcquireOutcome::Locked {
                        locked_by: existing.user_id.clone(),
                        expires_in: existing.remaining_at(now),
                    };
                }
                existing.renew(now, self.ttl());
                return AcquireOutcome::Acquired {
                    lock: existing.clone(),
                    renewed: true,
                };
            }
        }

        let lock = EditLock::new(item_id, user_id, item_type, now, self.ttl());
        locks.insert(item_id.to_string(), lock.clone());
        tracing::debug!(item_id, user_id, item_type, "Edit lock acquired");
        AcquireOutcome::Acquired { lock, renewed: false }
    }

    /// Push the holder's lock expiry out by the lock duration
    pub fn extend_lock(&self, item_id: &str, user_id: &str) -> ExtendOutcome {
        let now = self.clock.now();
        let mut locks = self.write_locks();

        match locks.get_mut(item_id) {
            Some(lock) if !lock.is_expired_at(now) => {
                if lock.user_id != user_id {
                    return ExtendOutcome::NotHolder {
                        held_by: lock.user_id.clone(),
                    };
                }
                lock.renew(now, self.ttl());
                ExtendOutcome::Extended(lock.clone())
            }
            _ => ExtendOutcome::NotLocked,
        }
    }

    /// Release a lock held by `user_id`. Non-holders are refused.
    pub fn release_lock(&self, item_id: &str, user_id: &str) -> ReleaseOutcome {
        let now = self.clock.now();
        let mut locks = self.write_locks();

        let holder = match locks.get(item_id) {
            Some(lock) if !lock.is_expired_at(now) => lock.user_id.clone(),
            _ => return ReleaseOutcome::NotLocked,
        };
        if holder != user_id {
            return ReleaseOutcome::NotHolder { held_by: holder };
        }

        locks.remove(item_id);
        tracing::debug!(item_id, user_id, "Edit lock released");
        ReleaseOutcome::Released
    }

    /// Remove a lock regardless of holder. Returns the removed lock, expired or not.
    pub fn force_release_lock(&self, item_id: &str) -> Option<EditLock> {
        let removed = self.write_locks().remove(item_id);
        if let Some(lock) = &removed {
            tracing::info!(item_id, holder = %lock.user_id, "Edit lock force-released");
        }
        removed
    }

    /// Whether someone other than `user_id` holds a valid lock on `item_id`
    pub fn is_locked(&self, item_id: &str, user_id: &str) -> bool {
        let now = self.clock.now();
        self.read_locks()
            .get(item_id)
            .is_some_and(|lock| !lock.is_expired_at(now) && lock.user_id != user_id)
    }

    /// The valid lock on `item_id`, if any
    pub fn get_lock_info(&self, item_id: &str) -> Option<EditLock> {
        let now = self.clock.now();
        self.read_locks()
            .get(item_id)
            .filter(|lock| !lock.is_expired_at(now))
            .cloned()
    }

    /// Snapshot of all valid locks with remaining lifetime, ordered by item id
    pub fn get_active_locks(&self) -> Vec<ActiveLock> {
        let now = self.clock.now();
        let mut active: Vec<ActiveLock> = self
            .read_locks()
            .values()
            .filter(|lock| !lock.is_expired_at(now))
            .map(|lock| ActiveLock {
                lock: lock.clone(),
                remaining: lock.remaining_at(now),
            })
            .collect();
        active.sort_by(|a, b| a.lock.item_id.cmp(&b.lock.item_id));
        active
    }

    /// Delete every expired lock. Returns how many were removed.
    pub fn clean_expired_locks(&self) -> usize {
        let now = self.clock.now();
        let mut locks = self.write_locks();
        let before = locks.len();
        locks.retain(|_, lock| !lock.is_expired_at(now));
        before - locks.len()
    }

    /// Delete every lock. Returns how many existed.
    pub fn clear_all_locks(&self) -> usize {
        let mut locks = self.write_locks();
        let count = locks.len();
        locks.clear();
        if count > 0 {
            tracing::warn!(count, "All edit locks cleared");
        }
        count
    }

    // ========== Background Sweep ==========

    /// Spawn the periodic expiry sweep on the current tokio runtime.
    ///
    /// The first sweep runs one interval after the call.
    pub fn start(self: &Arc<Self>) -> SweepHandle {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let resolver = Arc::clone(self);
        let period = self
            .config
            .sweep_interval()
            .clamp(Duration::from_millis(1), MAX_SWEEP_INTERVAL);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = resolver.clean_expired_locks();
                        if removed > 0 {
                            tracing::info!(removed, "Swept expired edit locks");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Lock sweeper received shutdown signal");
                        break;
                    }
                }
            }
        });

        SweepHandle {
            shutdown_tx,
            task: Some(task),
        }
    }

    // ========== Pending Changes ==========

    /// Stage local edits for `item_id`, replacing any earlier staged edits
    pub fn track_pending_change(&self, item_id: &str, user_id: &str, changes: Fields) -> Option<PendingChange> {
        let change = PendingChange {
            item_id: item_id.to_string(),
            user_id: user_id.to_string(),
            changes,
            timestamp: self.clock.now(),
        };
        self.write_pending().insert(item_id.to_string(), change)
    }

    /// Staged edits for `item_id`
    pub fn pending_change(&self, item_id: &str) -> Option<PendingChange> {
        self.pending
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(item_id)
            .cloned()
    }

    /// Drop staged edits for `item_id`
    pub fn clear_pending_change(&self, item_id: &str) -> Option<PendingChange> {
        self.write_pending().remove(item_id)
    }

    /// Number of items with staged edits
    pub fn pending_count(&self) -> usize {
        self.pending.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    // ========== Merging ==========

    /// Reconcile two versions of a record with `strategy`
    pub fn resolve(&self, strategy: MergeStrategy, current: &Fields, incoming: &Fields) -> MergeResolution {
        let resolution = merge::resolve_at(strategy, current, incoming, self.clock.now());
        if resolution.has_conflicts() {
            tracing::debug!(
                strategy = %strategy,
                conflicts = resolution.conflicts.len(),
                "Merge produced field conflicts"
            );
        }
        resolution
    }

    /// Whether two edit times are close enough to count as concurrent
    pub fn is_concurrent_edit(&self, first: DateTime<Utc>, second: DateTime<Utc>) -> bool {
        merge::detect_timestamp_conflict(first, second, self.merge.timestamp_threshold())
    }

    /// Reconcile staged edits for `item_id` with an incoming remote version.
    ///
    /// Returns `None` when nothing is staged. Staged edits are discarded once the
    /// merge resolves without needing a human.
    pub fn resolve_pending(&self, item_id: &str, strategy: MergeStrategy, incoming: &Fields) -> Option<MergeResolution> {
        let pending = self.pending_change(item_id)?;
        let resolution = self.resolve(strategy, &pending.changes, incoming);
        if !resolution.requires_user_action {
            self.clear_pending_change(item_id);
        }
        Some(resolution)
    }
}

/// Owner handle for the background sweep task
///
/// Dropping the handle without calling [`stop`](Self::stop) aborts the task.
#[derive(Debug)]
pub struct SweepHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl SweepHandle {
    /// Signal the sweeper to stop after its current tick
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Whether the sweeper task has exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the sweeper to exit. Call [`stop`](Self::stop) first.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Lock sweeper task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
