//! Offline resilience for the Biolab Logistik Planner.
//!
//! This crate lets planner clients keep working while the realtime channel is down
//! and reconcile with the server when it returns.
//!
//! # Modules
//!
//! - `offline`: Durable FIFO queue of user actions with retry bookkeeping and replay
//! - `conflict`: Advisory per-item edit locks with expiry and a background sweep
//! - `merge`: Strategies for reconciling two versions of a record
//! - `connection`: Connection status tracking and reconnect-driven replay
//! - `storage`: Key/value slot storage the queue persists into
//! - `action`: Typed action payloads
//! - `config`: Tunables and their persistence
//! - `clock`: Injectable wall clock
//! - `error`: Error types for the crate
//!
//! # Example
//!
//! ```
//! use labsync::{MergeStrategy, OfflineQueue, ConflictResolver, AcquireOutcome};
//! use serde_json::json;
//!
//! let queue: OfflineQueue<serde_json::Value> = OfflineQueue::in_memory();
//! let entry = queue.enqueue(json!({"type": "message", "action": "send", "text": "hi"}));
//! assert_eq!(entry.kind, "message");
//! assert_eq!(queue.size(), 1);
//!
//! let resolver = ConflictResolver::new();
//! assert!(resolver.acquire_lock("task-1", "alice", "task").is_acquired());
//! assert!(matches!(
//!     resolver.acquire_lock("task-1", "bob", "task"),
//!     AcquireOutcome::Locked { .. }
//! ));
//!
//! let current = json!({"a": 1, "b": 2}).as_object().cloned().unwrap();
//! let incoming = json!({"a": 1, "b": 3}).as_object().cloned().unwrap();
//! let merged = resolver.resolve(MergeStrategy::MergeFields, &current, &incoming);
//! assert_eq!(merged.conflicts.len(), 1);
//! ```

pub mod action;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod connection;
pub mod error;
pub mod merge;
pub mod offline;
pub mod storage;

// Re-export commonly used types
pub use action::{LabAction, MessageAction, QueueAction, TaskAction, TaskStatus};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigError, ConfigManager, LockConfig, MergeConfig, QueueConfig, SyncConfig};
pub use conflict::{
    AcquireOutcome, ActiveLock, ConflictResolver, EditLock, ExtendOutcome, PendingChange,
    ReleaseOutcome, SweepHandle,
};
pub use connection::{ConnectionStatus, ConnectionTracker, SyncStatusInfo};
pub use error::{SyncError, SyncResult};
pub use merge::{
    ChoiceOption, ChoiceSource, FieldChoice, FieldConflict, Fields, MergeResolution, MergeStrategy,
};
pub use offline::{
    FailedEntry, MarkFailedOutcome, OfflineQueue, QueueEntry, QueueListener, ReplayReport,
    Subscription, SubscriptionId,
};
pub use storage::{FileStorage, MemoryStorage, SlotStorage, StorageError, StorageResult};
