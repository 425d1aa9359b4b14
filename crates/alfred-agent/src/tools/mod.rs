//! Tool system for the agent loop.
//!
//! Tools fall into two disjoint sets: *extraction* tools (non-terminal,
//! callable any number of times) and *action* tools (terminal — invoking
//! one ends the run). The partition lives on the trait so the executor
//! can stop without knowing tool names.

pub mod actions;
pub mod extract;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::ToolDefinition;

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text (usually JSON) returned to the LLM.
    pub content: String,
    /// Whether the tool execution failed.
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn json(value: &serde_json::Value) -> Self {
        Self {
            content: value.to_string(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name (e.g. "extract_datetime").
    fn name(&self) -> &str;
    /// Human-readable description shown to the LLM.
    fn description(&self) -> &str;
    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;
    /// Terminal tools end the agent run once invoked.
    fn is_terminal(&self) -> bool {
        false
    }
    /// Execute the tool with the given input.
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

/// Convert a slice of tools to API-level tool definitions.
pub fn to_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema(),
        })
        .collect()
}

/// The full toolset for the calendar-event agent.
pub fn event_tools(timezone: chrono_tz::Tz) -> Vec<Box<dyn Tool>> {
    let mut tools = extraction_tools(timezone);
    tools.extend(actions::event_action_tools());
    tools
}

/// The full toolset for the reminder agent.
pub fn reminder_tools(timezone: chrono_tz::Tz) -> Vec<Box<dyn Tool>> {
    let mut tools = extraction_tools(timezone);
    tools.extend(actions::reminder_action_tools());
    tools
}

fn extraction_tools(timezone: chrono_tz::Tz) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(extract::ExtractDatetime::new(timezone)),
        Box::new(extract::ExtractLocation),
        Box::new(extract::ExtractAttendees),
    ]
}
