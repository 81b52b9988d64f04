//! Connection status tracking and reconnect-driven replay.
//!
//! The connection indicator owns a [`ConnectionTracker`]. When the realtime
//! channel comes back it calls [`ConnectionTracker::reconnect`], which replays the
//! offline queue and records the outcome for display.

use crate::action::QueueAction;
use crate::clock::{SharedClock, SystemClock};
use crate::offline::{OfflineQueue, QueueEntry, ReplayReport};
use crate::storage::SlotStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// Connection status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Connected to the realtime channel
    Online,
    /// Disconnected, actions are queued locally
    #[default]
    Offline,
    /// Reconnecting after disconnection
    Reconnecting,
    /// Replaying queued actions
    Syncing,
}

/// Tracks connectivity and the outcome of the last replay
#[derive(Debug)]
pub struct ConnectionTracker {
    status: ConnectionStatus,
    last_sync_time: Option<DateTime<Utc>>,
    last_report: Option<ReplayReport>,
    clock: SharedClock,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    /// Create a tracker in the `Offline` state
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    /// Create a tracker reading time from `clock`
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            status: ConnectionStatus::Offline,
            last_sync_time: None,
            last_report: None,
            clock,
        }
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Set status
    pub fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            tracing::debug!(from = ?self.status, to = ?status, "Connection status changed");
        }
        self.status = status;
    }

    /// Check if currently offline
    pub fn is_offline(&self) -> bool {
        matches!(self.status, ConnectionStatus::Offline)
    }

    /// Check if currently online
    pub fn is_online(&self) -> bool {
        matches!(self.status, ConnectionStatus::Online)
    }

    /// Last time a replay pass finished
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.last_sync_time
    }

    /// Report of the last replay pass
    pub fn last_report(&self) -> Option<&ReplayReport> {
        self.last_report.as_ref()
    }

    /// Seconds since the last replay pass
    pub fn time_since_sync(&self) -> Option<u64> {
        self.last_sync_time.map(|at| {
            u64::try_from((self.clock.now() - at).num_seconds()).unwrap_or(0)
        })
    }

    /// Replay the queue after the channel came back.
    ///
    /// Moves through `Syncing` to `Online`, stores the report and the sync time.
    pub async fn reconnect<A, S, F, Fut, T, E>(
        &mut self,
        queue: &OfflineQueue<A, S>,
        handler: F,
    ) -> ReplayReport
    where
        A: QueueAction,
        S: SlotStorage,
        F: FnMut(QueueEntry<A>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.set_status(ConnectionStatus::Syncing);
        let report = queue.process_queue(handler).await;

        self.last_sync_time = Some(self.clock.now());
        self.last_report = Some(report.clone());
        self.set_status(ConnectionStatus::Online);

        if let Some(summary) = report.failure_summary() {
            tracing::warn!("{}", summary);
        }
        report
    }

    /// Status for the connection indicator
    pub fn status_info(&self, pending_actions: usize) -> SyncStatusInfo {
        let failed_last_sync = self
            .last_report
            .as_ref()
            .map(|report| report.failed.len())
            .unwrap_or(0);

        let status_message = match self.status {
            ConnectionStatus::Online => match self.last_report.as_ref().and_then(ReplayReport::failure_summary) {
                Some(summary) => summary,
                None => "Connected".to_string(),
            },
            ConnectionStatus::Offline => match pending_actions {
                0 => "Offline".to_string(),
                1 => "Offline - 1 pending action".to_string(),
                n => format!("Offline - {} pending actions", n),
            },
            ConnectionStatus::Reconnecting => "Reconnecting...".to_string(),
            ConnectionStatus::Syncing => "Syncing queued actions...".to_string(),
        };

        SyncStatusInfo {
            status: self.status,
            pending_actions,
            failed_last_sync,
            time_since_sync: self.time_since_sync(),
            status_message,
        }
    }
}

/// UI display information for the connection indicator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusInfo {
    pub status: ConnectionStatus,
    pub pending_actions: usize,
    pub failed_last_sync: usize,
    pub time_since_sync: Option<u64>,
    pub status_message: String,
}

impl SyncStatusInfo {
    /// Check if the indicator should be shown
    ///
    /// Returns true if not online, or if actions are pending or failed
    pub fn should_show(&self) -> bool {
        !matches!(self.status, ConnectionStatus::Online)
            || self.pending_actions > 0
            || self.failed_last_sync > 0
    }

    /// Get a short status string
    pub fn short_status(&self) -> &'static str {
        match self.status {
            ConnectionStatus::Online => "Online",
            ConnectionStatus::Offline => "Offline",
            ConnectionStatus::Reconnecting => "Reconnecting",
            ConnectionStatus::Syncing => "Syncing",
        }
    }

    /// Format time since sync for display
    pub fn formatted_time_since_sync(&self) -> Option<String> {
        self.time_since_sync.map(|seconds| {
            if seconds < 60 {
                format!("{}s ago", seconds)
            } else if seconds < 3600 {
                format!("{}m ago", seconds / 60)
            } else if seconds < 86400 {
                format!("{}h ago", seconds / 3600)
            } else {
                format!("{}d ago", seconds / 86400)
            }
        })
    }
}
