//! Terminal action tools. Each run must invoke exactly one; the parser
//! enforces that invariant after the loop ends.
//!
//! Payloads are typed. Handlers validate the per-action preconditions
//! (create needs a title and, for events, a start time; update/delete need
//! the target row id) and ack with the normalized payload — the proposal
//! engine applies the actual state change later.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Tool, ToolResult};

/// Payload shared by the calendar-event action tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// RFC 3339, or a natural expression already resolved via extract_datetime.
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Internal id of an existing pending proposal (update/delete target).
    #[serde(default)]
    pub alfred_entity_id: Option<i64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Payload shared by the reminder action tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReminderPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub reminder_time: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub alfred_entity_id: Option<i64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Which precondition an action tool enforces on its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requirement {
    /// create: needs title (+ start_time for events)
    NewEntity { needs_start_time: bool },
    /// update/delete: needs alfred_entity_id
    ExistingEntity,
    /// no-op action: anything goes
    Nothing,
}

/// One terminal tool, parameterized by family and requirement. All eight
/// action tools share this shape; only name/description/schema differ.
struct ActionTool {
    name: &'static str,
    description: &'static str,
    schema: serde_json::Value,
    requirement: Requirement,
    reminder_family: bool,
}

#[async_trait]
impl Tool for ActionTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn is_terminal(&self) -> bool {
        true
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        // Validate by round-tripping through the typed payload.
        let check = if self.reminder_family {
            serde_json::from_value::<ReminderPayload>(input.clone())
                .map(|p| (p.title.clone(), None::<String>, p.alfred_entity_id))
                .map_err(|e| e.to_string())
        } else {
            serde_json::from_value::<EventPayload>(input.clone())
                .map(|p| (p.title.clone(), p.start_time.clone(), p.alfred_entity_id))
                .map_err(|e| e.to_string())
        };

        let (title, start_time, entity_id) = match check {
            Ok(fields) => fields,
            Err(e) => return ToolResult::error(format!("invalid parameters: {e}")),
        };

        match self.requirement {
            Requirement::NewEntity { needs_start_time } => {
                if title.as_deref().map_or(true, str::is_empty) {
                    return ToolResult::error("a title is required");
                }
                if needs_start_time && start_time.as_deref().map_or(true, str::is_empty) {
                    return ToolResult::error("a start_time is required");
                }
            }
            Requirement::ExistingEntity => {
                if entity_id.is_none() {
                    return ToolResult::error(
                        "alfred_entity_id of an existing pending proposal is required",
                    );
                }
            }
            Requirement::Nothing => {}
        }

        ToolResult::json(&json!({ "ok": true, "action": self.name }))
    }
}

fn event_schema(with_entity_id: bool) -> serde_json::Value {
    let mut properties = json!({
        "title": {"type": "string"},
        "description": {"type": "string"},
        "start_time": {"type": "string", "description": "RFC 3339 start time in the user's zone"},
        "end_time": {"type": "string"},
        "location": {"type": "string"},
        "confidence": {"type": "number", "minimum": 0, "maximum": 1},
        "reasoning": {"type": "string"}
    });
    if with_entity_id {
        properties["alfred_entity_id"] = json!({
            "type": "integer",
            "description": "Internal id of the pending proposal to modify"
        });
    }
    json!({"type": "object", "properties": properties})
}

fn reminder_schema(with_entity_id: bool) -> serde_json::Value {
    let mut properties = json!({
        "title": {"type": "string"},
        "description": {"type": "string"},
        "location": {"type": "string"},
        "due_date": {"type": "string", "description": "RFC 3339 due date"},
        "reminder_time": {"type": "string", "description": "RFC 3339 time to notify"},
        "priority": {"type": "string", "enum": ["low", "normal", "high"]},
        "confidence": {"type": "number", "minimum": 0, "maximum": 1},
        "reasoning": {"type": "string"}
    });
    if with_entity_id {
        properties["alfred_entity_id"] = json!({
            "type": "integer",
            "description": "Internal id of the pending reminder to modify"
        });
    }
    json!({"type": "object", "properties": properties})
}

pub fn event_action_tools() -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(ActionTool {
            name: "create_calendar_event",
            description: "Propose a new calendar event extracted from the conversation.",
            schema: event_schema(false),
            requirement: Requirement::NewEntity {
                needs_start_time: true,
            },
            reminder_family: false,
        }),
        Box::new(ActionTool {
            name: "update_calendar_event",
            description: "Modify an existing pending event proposal. Only pass fields that change.",
            schema: event_schema(true),
            requirement: Requirement::ExistingEntity,
            reminder_family: false,
        }),
        Box::new(ActionTool {
            name: "delete_calendar_event",
            description: "Withdraw an existing pending event proposal (the sender cancelled).",
            schema: event_schema(true),
            requirement: Requirement::ExistingEntity,
            reminder_family: false,
        }),
        Box::new(ActionTool {
            name: "no_calendar_action",
            description: "Conclude that the conversation contains no calendar-worthy intent.",
            schema: json!({"type": "object", "properties": {"reasoning": {"type": "string"}}}),
            requirement: Requirement::Nothing,
            reminder_family: false,
        }),
    ]
}

pub fn reminder_action_tools() -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(ActionTool {
            name: "create_reminder",
            description: "Propose a new reminder extracted from the conversation.",
            schema: reminder_schema(false),
            requirement: Requirement::NewEntity {
                needs_start_time: false,
            },
            reminder_family: true,
        }),
        Box::new(ActionTool {
            name: "update_reminder",
            description: "Modify an existing pending reminder. Only pass fields that change.",
            schema: reminder_schema(true),
            requirement: Requirement::ExistingEntity,
            reminder_family: true,
        }),
        Box::new(ActionTool {
            name: "delete_reminder",
            description: "Withdraw an existing pending reminder (the sender cancelled).",
            schema: reminder_schema(true),
            requirement: Requirement::ExistingEntity,
            reminder_family: true,
        }),
        Box::new(ActionTool {
            name: "no_reminder_action",
            description: "Conclude that the conversation contains no reminder-worthy intent.",
            schema: json!({"type": "object", "properties": {"reasoning": {"type": "string"}}}),
            requirement: Requirement::Nothing,
            reminder_family: true,
        }),
    ]
}
