//! Merge strategies and conflict detectors for shared records.
//!
//! Records are flat JSON objects (`serde_json::Map`). Three strategies reconcile a
//! local (`current`) and a remote (`incoming`) version:
//!
//! - **last-write-wins**: incoming overwrites every field it carries
//! - **merge-fields**: fields missing locally are adopted, true conflicts keep the
//!   local value and are reported
//! - **user-choice**: nothing is auto-resolved; each conflicting field becomes a
//!   two-option choice for a human, applied later with [`apply_user_choices`]
//!
//! Field equality is structural (`Value == Value`), so key order inside nested
//! objects does not produce spurious conflicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A flat record: field name to JSON value
pub type Fields = Map<String, Value>;

/// Default window within which two edits count as concurrent
pub const DEFAULT_TIMESTAMP_THRESHOLD: Duration = Duration::from_millis(1000);

/// Strategy for reconciling two versions of the same record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Incoming fields overwrite current ones
    LastWriteWins,
    /// Adopt new fields, keep current values on conflict
    #[default]
    MergeFields,
    /// Defer every conflict to a human
    UserChoice,
}

impl MergeStrategy {
    /// Stable name used in JSON and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::LastWriteWins => "last-write-wins",
            MergeStrategy::MergeFields => "merge-fields",
            MergeStrategy::UserChoice => "user-choice",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last-write-wins" => Ok(MergeStrategy::LastWriteWins),
            "merge-fields" => Ok(MergeStrategy::MergeFields),
            "user-choice" => Ok(MergeStrategy::UserChoice),
            other => Err(format!("unknown merge strategy: {other}")),
        }
    }
}

/// A field whose current and incoming values differ
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConflict {
    pub field: String,
    pub current_value: Value,
    pub incoming_value: Value,
    pub timestamp: DateTime<Utc>,
}

/// Which side of a conflict a choice refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChoiceSource {
    Current,
    Incoming,
}

/// One selectable option of a [`FieldChoice`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub source: ChoiceSource,
    /// Human-readable label for a choice dialog
    pub label: String,
    pub value: Value,
}

/// A conflicting field presented to a human as current-vs-incoming
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldChoice {
    pub field: String,
    pub options: [ChoiceOption; 2],
}

impl FieldChoice {
    fn new(field: &str, current: &Value, incoming: &Value) -> Self {
        Self {
            field: field.to_string(),
            options: [
                ChoiceOption {
                    source: ChoiceSource::Current,
                    label: "Current version".to_string(),
                    value: current.clone(),
                },
                ChoiceOption {
                    source: ChoiceSource::Incoming,
                    label: "Incoming version".to_string(),
                    value: incoming.clone(),
                },
            ],
        }
    }

    /// The value of the selected side
    pub fn value_for(&self, source: ChoiceSource) -> &Value {
        match source {
            ChoiceSource::Current => &self.options[0].value,
            ChoiceSource::Incoming => &self.options[1].value,
        }
    }

    /// A `(field, value)` selection suitable for [`apply_user_choices`]
    pub fn select(&self, source: ChoiceSource) -> (String, Value) {
        (self.field.clone(), self.value_for(source).clone())
    }
}

/// Outcome of running a merge strategy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResolution {
    /// Merged record; `None` when a human must decide first
    pub resolved: Option<Fields>,
    pub conflicts: Vec<FieldConflict>,
    /// Pending decisions (user-choice strategy only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<FieldChoice>,
    pub strategy: MergeStrategy,
    #[serde(default)]
    pub requires_user_action: bool,
}

impl MergeResolution {
    /// Whether any field conflicted
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Shallow-merge `incoming` over `current`. Never reports conflicts.
pub fn last_write_wins(current: &Fields, incoming: &Fields) -> MergeResolution {
    MergeResolution {
        resolved: Some(shallow_merge(current, incoming)),
        conflicts: Vec::new(),
        choices: Vec::new(),
        strategy: MergeStrategy::LastWriteWins,
        requires_user_action: false,
    }
}

/// Field-wise merge where the current value wins real conflicts.
///
/// For each incoming field: equal values are skipped; a field absent from
/// `current` is adopted; a present, differing field is recorded as a conflict and
/// left at its current value.
pub fn merge_fields(current: &Fields, incoming: &Fields) -> MergeResolution {
    merge_fields_at(current, incoming, Utc::now())
}

/// [`merge_fields`] with conflicts stamped at `now`
pub fn merge_fields_at(current: &Fields, incoming: &Fields, now: DateTime<Utc>) -> MergeResolution {
    let mut resolved = current.clone();
    let mut conflicts = Vec::new();

    for (field, incoming_value) in incoming {
        match current.get(field) {
            Some(current_value) if current_value == incoming_value => {}
            Some(current_value) => conflicts.push(FieldConflict {
                field: field.clone(),
                current_value: current_value.clone(),
                incoming_value: incoming_value.clone(),
                timestamp: now,
            }),
            None => {
                resolved.insert(field.clone(), incoming_value.clone());
            }
        }
    }

    MergeResolution {
        resolved: Some(resolved),
        conflicts,
        choices: Vec::new(),
        strategy: MergeStrategy::MergeFields,
        requires_user_action: false,
    }
}

/// Collect every conflicting field as a choice for a human.
///
/// Fields only present in `incoming` are not conflicts. With at least one
/// conflict the record stays unresolved; otherwise the shallow merge is returned.
pub fn user_choice(current: &Fields, incoming: &Fields) -> MergeResolution {
    user_choice_at(current, incoming, Utc::now())
}

/// [`user_choice`] with conflicts stamped at `now`
pub fn user_choice_at(current: &Fields, incoming: &Fields, now: DateTime<Utc>) -> MergeResolution {
    let mut conflicts = Vec::new();
    let mut choices = Vec::new();

    for (field, incoming_value) in incoming {
        if let Some(current_value) = current.get(field) {
            if current_value != incoming_value {
                choices.push(FieldChoice::new(field, current_value, incoming_value));
                conflicts.push(FieldConflict {
                    field: field.clone(),
                    current_value: current_value.clone(),
                    incoming_value: incoming_value.clone(),
                    timestamp: now,
                });
            }
        }
    }

    let requires_user_action = !choices.is_empty();
    MergeResolution {
        resolved: (!requires_user_action).then(|| shallow_merge(current, incoming)),
        conflicts,
        choices,
        strategy: MergeStrategy::UserChoice,
        requires_user_action,
    }
}

/// Apply a human's field-by-field selections over `current`.
pub fn apply_user_choices<I>(current: &Fields, selections: I) -> Fields
where
    I: IntoIterator<Item = (String, Value)>,
{
    let mut merged = current.clone();
    merged.extend(selections);
    merged
}

/// Run the given strategy
pub fn resolve(strategy: MergeStrategy, current: &Fields, incoming: &Fields) -> MergeResolution {
    resolve_at(strategy, current, incoming, Utc::now())
}

/// Run the given strategy, stamping conflicts at `now`
pub fn resolve_at(
    strategy: MergeStrategy,
    current: &Fields,
    incoming: &Fields,
    now: DateTime<Utc>,
) -> MergeResolution {
    match strategy {
        MergeStrategy::LastWriteWins => last_write_wins(current, incoming),
        MergeStrategy::MergeFields => merge_fields_at(current, incoming, now),
        MergeStrategy::UserChoice => user_choice_at(current, incoming, now),
    }
}

/// Conflict iff `incoming` is not strictly newer than `current`.
pub fn detect_version_conflict(current_version: u64, incoming_version: u64) -> bool {
    incoming_version <= current_version
}

/// Conflict iff the two instants are closer together than `threshold`.
///
/// Order does not matter.
pub fn detect_timestamp_conflict(
    first: DateTime<Utc>,
    second: DateTime<Utc>,
    threshold: Duration,
) -> bool {
    let diff_ms = u128::from((first - second).num_milliseconds().unsigned_abs());
    diff_ms < threshold.as_millis()
}

fn shallow_merge(current: &Fields, incoming: &Fields) -> Fields {
    let mut merged = current.clone();
    for (field, value) in incoming {
        merged.insert(field.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_last_write_wins_overwrites() {
        let current = fields(json!({"title": "Order pipettes", "status": "todo"}));
        let incoming = fields(json!({"status": "done", "assignee": "u7"}));

        let result = last_write_wins(&current, &incoming);
        let resolved = result.resolved.unwrap();

        assert_eq!(resolved["title"], "Order pipettes");
        assert_eq!(resolved["status"], "done");
        assert_eq!(resolved["assignee"], "u7");
        assert!(result.conflicts.is_empty());
        assert_eq!(result.strategy, MergeStrategy::LastWriteWins);
    }

    #[test]
    fn test_merge_fields_current_wins_conflict() {
        let current = fields(json!({"a": 1, "b": 2}));
        let incoming = fields(json!({"a": 1, "b": 3}));

        let result = merge_fields(&current, &incoming);

        assert_eq!(result.conflicts.len(), 1);
        let conflict = &result.conflicts[0];
        assert_eq!(conflict.field, "b");
        assert_eq!(conflict.current_value, json!(2));
        assert_eq!(conflict.incoming_value, json!(3));
        assert_eq!(result.resolved.unwrap()["b"], json!(2));
    }

    #[test]
    fn test_merge_fields_adopts_new_fields() {
        let current = fields(json!({"a": 1}));
        let incoming = fields(json!({"c": [1, 2]}));

        let result = merge_fields(&current, &incoming);
        assert!(!result.has_conflicts());
        assert_eq!(result.resolved.unwrap()["c"], json!([1, 2]));
    }

    #[test]
    fn test_merge_fields_null_is_a_present_value() {
        let current = fields(json!({"dueDate": null}));
        let incoming = fields(json!({"dueDate": "2026-11-01"}));

        let result = merge_fields(&current, &incoming);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.resolved.unwrap()["dueDate"], Value::Null);
    }

    #[test]
    fn test_merge_fields_nested_equality_is_structural() {
        let current = fields(json!({"meta": {"x": 1, "y": 2}}));
        let incoming: Fields = serde_json::from_str(r#"{"meta": {"y": 2, "x": 1}}"#).unwrap();

        assert!(!merge_fields(&current, &incoming).has_conflicts());
    }

    #[test]
    fn test_user_choice_defers() {
        let current = fields(json!({"title": "A", "priority": "low"}));
        let incoming = fields(json!({"title": "B", "priority": "low", "tag": "x"}));

        let result = user_choice(&current, &incoming);

        assert!(result.requires_user_action);
        assert!(result.resolved.is_none());
        assert_eq!(result.choices.len(), 1);
        assert_eq!(result.conflicts.len(), 1);

        let choice = &result.choices[0];
        assert_eq!(choice.field, "title");
        assert_eq!(choice.value_for(ChoiceSource::Current), &json!("A"));
        assert_eq!(choice.value_for(ChoiceSource::Incoming), &json!("B"));
        assert_eq!(choice.options[0].label, "Current version");
    }

    #[test]
    fn test_user_choice_without_conflicts_resolves() {
        let current = fields(json!({"title": "A"}));
        let incoming = fields(json!({"title": "A", "tag": "x"}));

        let result = user_choice(&current, &incoming);
        assert!(!result.requires_user_action);
        assert_eq!(result.resolved.unwrap()["tag"], "x");
    }

    #[test]
    fn test_apply_user_choices() {
        let current = fields(json!({"title": "A", "status": "todo", "notes": "keep"}));
        let incoming = fields(json!({"title": "B", "status": "done"}));

        let result = user_choice(&current, &incoming);
        let selections = result.choices.iter().map(|choice| match choice.field.as_str() {
            "title" => choice.select(ChoiceSource::Incoming),
            _ => choice.select(ChoiceSource::Current),
        });

        let merged = apply_user_choices(&current, selections);
        assert_eq!(merged["title"], "B");
        assert_eq!(merged["status"], "todo");
        assert_eq!(merged["notes"], "keep");
    }

    #[test]
    fn test_resolve_dispatch() {
        let current = fields(json!({"a": 1}));
        let incoming = fields(json!({"a": 2}));

        for strategy in [
            MergeStrategy::LastWriteWins,
            MergeStrategy::MergeFields,
            MergeStrategy::UserChoice,
        ] {
            assert_eq!(resolve(strategy, &current, &incoming).strategy, strategy);
        }
    }

    #[test]
    fn test_resolve_at_stamps_conflicts() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let current = fields(json!({"status": "todo"}));
        let incoming = fields(json!({"status": "done"}));

        for strategy in [MergeStrategy::MergeFields, MergeStrategy::UserChoice] {
            let result = resolve_at(strategy, &current, &incoming, at);
            assert_eq!(result.conflicts.len(), 1);
            assert_eq!(result.conflicts[0].timestamp, at);
        }
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(MergeStrategy::LastWriteWins.to_string(), "last-write-wins");
        assert_eq!("user-choice".parse::<MergeStrategy>(), Ok(MergeStrategy::UserChoice));
        assert!("newest".parse::<MergeStrategy>().is_err());
        assert_eq!(
            serde_json::to_string(&MergeStrategy::MergeFields).unwrap(),
            "\"merge-fields\""
        );
    }

    #[test]
    fn test_detect_version_conflict() {
        assert!(detect_version_conflict(5, 5));
        assert!(detect_version_conflict(5, 3));
        assert!(!detect_version_conflict(5, 6));
    }

    #[test]
    fn test_detect_timestamp_conflict() {
        let t1 = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let close = Utc.timestamp_millis_opt(1_700_000_000_400).unwrap();
        let far = Utc.timestamp_millis_opt(1_700_000_002_000).unwrap();
        let edge = Utc.timestamp_millis_opt(1_700_000_001_000).unwrap();

        assert!(detect_timestamp_conflict(t1, close, DEFAULT_TIMESTAMP_THRESHOLD));
        assert!(detect_timestamp_conflict(close, t1, DEFAULT_TIMESTAMP_THRESHOLD));
        assert!(!detect_timestamp_conflict(t1, far, DEFAULT_TIMESTAMP_THRESHOLD));
        // Exactly at the threshold is not concurrent
        assert!(!detect_timestamp_conflict(t1, edge, DEFAULT_TIMESTAMP_THRESHOLD));
    }
}
