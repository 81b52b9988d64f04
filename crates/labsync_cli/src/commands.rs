//! Subcommand implementations. Each returns the text to print.

use anyhow::Result;
use labsync::{OfflineQueue, QueueEntry, SlotStorage, SyncConfig};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;

type Entry = QueueEntry<Value>;

/// List entries, optionally filtered by type
pub fn show<S: SlotStorage>(queue: &OfflineQueue<Value, S>, kind: Option<&str>, json: bool) -> Result<String> {
    let entries: Vec<Entry> = queue
        .try_get_queue()?
        .into_iter()
        .filter(|entry| kind.map_or(true, |k| entry.kind == k))
        .collect();

    if json {
        return Ok(serde_json::to_string_pretty(&entries)?);
    }
    if entries.is_empty() {
        return Ok("Queue is empty".to_string());
    }

    let mut out = String::new();
    for entry in &entries {
        writeln!(out, "{}", describe(entry))?;
        if let Some(error) = &entry.last_error {
            writeln!(out, "    last error: {}", error)?;
        }
    }
    Ok(out.trim_end().to_string())
}

fn describe(entry: &Entry) -> String {
    let label = match &entry.action {
        Some(action) => format!("{}/{}", entry.kind, action),
        None => entry.kind.clone(),
    };
    format!(
        "{}  {:<16} attempts={}  queued {}",
        entry.id,
        label,
        entry.attempts,
        entry.timestamp.format("%Y-%m-%d %H:%M:%S")
    )
}

/// Per-type counts
pub fn stats<S: SlotStorage>(queue: &OfflineQueue<Value, S>) -> Result<String> {
    let entries = queue.try_get_queue()?;
    let mut by_kind: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in &entries {
        *by_kind.entry(entry.kind.as_str()).or_default() += 1;
    }
    let failing = entries.iter().filter(|entry| entry.attempts > 0).count();

    let mut out = String::new();
    writeln!(out, "Total: {}", entries.len())?;
    for (kind, count) in &by_kind {
        writeln!(out, "  {}: {}", kind, count)?;
    }
    write!(out, "With failed replays: {}", failing)?;
    Ok(out)
}

pub fn drop_entry<S: SlotStorage>(queue: &OfflineQueue<Value, S>, id: &str) -> Result<String> {
    let removed = queue.try_dequeue(id)?;
    tracing::info!(id, kind = %removed.kind, "Entry dropped by operator");
    Ok(format!("Dropped {} ({})", removed.id, removed.kind))
}

pub fn purge<S: SlotStorage>(queue: &OfflineQueue<Value, S>) -> Result<String> {
    Ok(match queue.try_clear()? {
        1 => "Purged 1 entry".to_string(),
        n => format!("Purged {} entries", n),
    })
}

/// Effective configuration as pretty JSON
pub fn config(config: &SyncConfig) -> Result<String> {
    Ok(serde_json::to_string_pretty(config)?)
}
