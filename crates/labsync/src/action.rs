//! Typed payloads for queued offline actions.
//!
//! Every queue entry carries a `type` tag and an optional `action` sub-operation
//! next to its payload. Payload types implement [`QueueAction`] so the queue can
//! derive both tags from the value itself, and replay handlers can `match` on the
//! payload instead of probing untyped fields.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A payload that can be stored in the offline queue.
pub trait QueueAction: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Payload kind, stored as the entry's `type` (e.g. `"message"`, `"task"`).
    fn kind(&self) -> &str;

    /// Sub-operation used to route replay (e.g. `"create"`).
    fn action(&self) -> Option<&str> {
        None
    }
}

/// Untyped payloads read their tags from `type` / `action` string fields.
impl QueueAction for Value {
    fn kind(&self) -> &str {
        self.get("type").and_then(Value::as_str).unwrap_or("unknown")
    }

    fn action(&self) -> Option<&str> {
        self.get("action").and_then(Value::as_str)
    }
}

/// Actions a planner client can perform while offline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum LabAction {
    Message(MessageAction),
    Task(TaskAction),
}

impl LabAction {
    /// Id of the task this action touches, if any
    pub fn task_id(&self) -> Option<&str> {
        match self {
            LabAction::Task(TaskAction::Update { task_id, .. })
            | LabAction::Task(TaskAction::Delete { task_id })
            | LabAction::Task(TaskAction::Move { task_id, .. }) => Some(task_id.as_str()),
            _ => None,
        }
    }
}

impl QueueAction for LabAction {
    fn kind(&self) -> &str {
        match self {
            LabAction::Message(_) => "message",
            LabAction::Task(_) => "task",
        }
    }

    fn action(&self) -> Option<&str> {
        Some(match self {
            LabAction::Message(MessageAction::Send { .. }) => "send",
            LabAction::Message(MessageAction::Edit { .. }) => "edit",
            LabAction::Message(MessageAction::Delete { .. }) => "delete",
            LabAction::Task(TaskAction::Create { .. }) => "create",
            LabAction::Task(TaskAction::Update { .. }) => "update",
            LabAction::Task(TaskAction::Delete { .. }) => "delete",
            LabAction::Task(TaskAction::Move { .. }) => "move",
        })
    }
}

/// Messaging operations
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum MessageAction {
    Send {
        conversation_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<String>,
    },
    Edit {
        message_id: String,
        content: String,
    },
    Delete {
        message_id: String,
    },
}

/// Kanban board columns
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Review,
    Done,
}

/// Kanban task operations
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum TaskAction {
    Create {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        status: TaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assignee_id: Option<String>,
    },
    /// Partial update; only the listed fields change
    Update {
        task_id: String,
        changes: Map<String, Value>,
    },
    Delete {
        task_id: String,
    },
    /// Drag/drop between columns
    Move {
        task_id: String,
        status: TaskStatus,
        position: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lab_action_tags() {
        let send = LabAction::Message(MessageAction::Send {
            conversation_id: "c1".into(),
            content: "Autoclave is free".into(),
            attachments: Vec::new(),
        });
        assert_eq!(send.kind(), "message");
        assert_eq!(send.action(), Some("send"));

        let moved = LabAction::Task(TaskAction::Move {
            task_id: "t9".into(),
            status: TaskStatus::InProgress,
            position: 2,
        });
        assert_eq!(moved.kind(), "task");
        assert_eq!(moved.action(), Some("move"));
        assert_eq!(moved.task_id(), Some("t9"));
        assert_eq!(send.task_id(), None);
    }

    #[test]
    fn test_lab_action_json_shape() {
        let action = LabAction::Task(TaskAction::Delete {
            task_id: "t1".into(),
        });
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(
            value,
            json!({"type": "task", "payload": {"action": "delete", "taskId": "t1"}})
        );

        let back: LabAction = serde_json::from_value(value).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn test_task_status_names() {
        assert_eq!(
            serde_json::to_value(TaskStatus::InProgress).unwrap(),
            json!("in_progress")
        );
    }

    #[test]
    fn test_untyped_value_tags() {
        let value = json!({"type": "waste", "action": "log", "kg": 2.5});
        assert_eq!(value.kind(), "waste");
        assert_eq!(value.action(), Some("log"));

        let bare = json!({"kg": 1});
        assert_eq!(bare.kind(), "unknown");
        assert_eq!(bare.action(), None);
    }
}
