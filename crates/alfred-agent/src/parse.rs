//! Turns a finished agent run into an `Analysis`, enforcing the
//! one-terminal-action invariant.

use serde::Serialize;
use tracing::warn;

use crate::executor::AgentOutput;
use crate::tools::actions::{EventPayload, ReminderPayload};

/// Typed payload of the chosen action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AnalysisEntity {
    Event(EventPayload),
    Reminder(ReminderPayload),
    None,
}

/// The normalized verdict of one agent run.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub has_event: bool,
    /// "create" | "update" | "delete" | "none" | "" (unknown action tag).
    pub action: String,
    pub reasoning: String,
    pub confidence: f64,
    pub entity: AnalysisEntity,
}

impl Analysis {
    fn none(reasoning: impl Into<String>) -> Self {
        Self {
            has_event: false,
            action: "none".into(),
            reasoning: reasoning.into(),
            confidence: 0.0,
            entity: AnalysisEntity::None,
        }
    }

    /// The user-visible fields the language policy validates.
    pub fn visible_fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = Vec::new();
        match &self.entity {
            AnalysisEntity::Event(e) => {
                if let Some(t) = e.title.as_deref() {
                    fields.push(("title", t));
                }
                if let Some(d) = e.description.as_deref() {
                    fields.push(("description", d));
                }
                if let Some(l) = e.location.as_deref() {
                    fields.push(("location", l));
                }
            }
            AnalysisEntity::Reminder(r) => {
                if let Some(t) = r.title.as_deref() {
                    fields.push(("title", t));
                }
                if let Some(d) = r.description.as_deref() {
                    fields.push(("description", d));
                }
                if let Some(l) = r.location.as_deref() {
                    fields.push(("location", l));
                }
            }
            AnalysisEntity::None => {}
        }
        fields
    }
}

/// Which agent family produced the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Event,
    Reminder,
}

impl AgentKind {
    /// Map a terminal tool name to its action tag. `None` for tools
    /// outside this family (treated as an unknown tag downstream).
    fn action_for_tool(&self, tool_name: &str) -> Option<&'static str> {
        match self {
            AgentKind::Event => match tool_name {
                "create_calendar_event" => Some("create"),
                "update_calendar_event" => Some("update"),
                "delete_calendar_event" => Some("delete"),
                "no_calendar_action" => Some("none"),
                _ => None,
            },
            AgentKind::Reminder => match tool_name {
                "create_reminder" => Some("create"),
                "update_reminder" => Some("update"),
                "delete_reminder" => Some("delete"),
                "no_reminder_action" => Some("none"),
                _ => None,
            },
        }
    }
}

/// Enforces the terminal-action invariants:
/// zero action calls → `none`; more than one → `none` ("Ambiguous tool
/// output"); handler error → `none` citing the error; unknown tag →
/// `action=""` with `has_event=true` so downstream validation rejects it.
pub fn parse_agent_output(kind: AgentKind, output: &AgentOutput) -> Analysis {
    let terminal: Vec<_> = output.invocations.iter().filter(|i| i.terminal).collect();

    match terminal.len() {
        0 => {
            if output.max_turns_reached {
                return Analysis::none("max turns reached");
            }
            Analysis::none("No action tool was called")
        }
        1 => parse_single_action(kind, terminal[0]),
        n => {
            warn!(count = n, "agent made multiple terminal action calls");
            let names: Vec<_> = terminal.iter().map(|i| i.call.name.as_str()).collect();
            Analysis::none(format!(
                "Ambiguous tool output: {} action tools were called ({})",
                n,
                names.join(", ")
            ))
        }
    }
}

fn parse_single_action(kind: AgentKind, invocation: &crate::executor::ToolInvocation) -> Analysis {
    if invocation.result.is_error {
        return Analysis::none(format!(
            "Action tool '{}' failed: {}",
            invocation.call.name, invocation.result.content
        ));
    }

    let Some(action) = kind.action_for_tool(&invocation.call.name) else {
        // Unknown tag: degrade rather than throw; the engine treats this
        // as a validation failure.
        return Analysis {
            has_event: true,
            action: String::new(),
            reasoning: format!("unrecognized action tool '{}'", invocation.call.name),
            confidence: 0.0,
            entity: AnalysisEntity::None,
        };
    };

    if action == "none" {
        let reasoning = invocation
            .call
            .input
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or("no scheduling intent")
            .to_string();
        return Analysis {
            has_event: false,
            action: "none".into(),
            reasoning,
            confidence: 0.0,
            entity: AnalysisEntity::None,
        };
    }

    match kind {
        AgentKind::Event => {
            let payload: EventPayload =
                serde_json::from_value(invocation.call.input.clone()).unwrap_or_default();
            Analysis {
                has_event: true,
                action: action.into(),
                reasoning: payload.reasoning.clone().unwrap_or_default(),
                confidence: payload.confidence.unwrap_or(0.0),
                entity: AnalysisEntity::Event(payload),
            }
        }
        AgentKind::Reminder => {
            let payload: ReminderPayload =
                serde_json::from_value(invocation.call.input.clone()).unwrap_or_default();
            Analysis {
                has_event: true,
                action: action.into(),
                reasoning: payload.reasoning.clone().unwrap_or_default(),
                confidence: payload.confidence.unwrap_or(0.0),
                entity: AnalysisEntity::Reminder(payload),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ToolInvocation;
    use crate::provider::ToolCall;
    use crate::tools::ToolResult;
    use serde_json::json;

    fn invocation(name: &str, input: serde_json::Value, is_error: bool, terminal: bool) -> ToolInvocation {
        ToolInvocation {
            call: ToolCall {
                id: "tu_1".into(),
                name: name.into(),
                input,
            },
            result: if is_error {
                ToolResult::error("handler failed")
            } else {
                ToolResult::success("{\"ok\":true}")
            },
            terminal,
        }
    }

    fn output(invocations: Vec<ToolInvocation>, max_turns_reached: bool) -> AgentOutput {
        AgentOutput {
            invocations,
            final_text: String::new(),
            turns_used: 1,
            max_turns_reached,
        }
    }

    #[test]
    fn zero_actions_is_none() {
        let analysis = parse_agent_output(AgentKind::Event, &output(vec![], false));
        assert_eq!(analysis.action, "none");
        assert!(!analysis.has_event);
        assert_eq!(analysis.reasoning, "No action tool was called");
    }

    #[test]
    fn max_turns_is_none_not_error() {
        let analysis = parse_agent_output(AgentKind::Event, &output(vec![], true));
        assert_eq!(analysis.action, "none");
        assert_eq!(analysis.reasoning, "max turns reached");
    }

    #[test]
    fn single_create_parses_typed_payload() {
        let analysis = parse_agent_output(
            AgentKind::Event,
            &output(
                vec![invocation(
                    "create_calendar_event",
                    json!({
                        "title": "Dinner",
                        "start_time": "2026-02-09T19:00:00+01:00",
                        "location": "Luigi's",
                        "confidence": 0.85,
                        "reasoning": "explicit invite"
                    }),
                    false,
                    true,
                )],
                false,
            ),
        );
        assert!(analysis.has_event);
        assert_eq!(analysis.action, "create");
        assert!((analysis.confidence - 0.85).abs() < 1e-9);
        match analysis.entity {
            AnalysisEntity::Event(ref e) => {
                assert_eq!(e.title.as_deref(), Some("Dinner"));
                assert_eq!(e.location.as_deref(), Some("Luigi's"));
            }
            _ => panic!("expected event entity"),
        }
    }

    #[test]
    fn two_actions_is_ambiguous() {
        let analysis = parse_agent_output(
            AgentKind::Event,
            &output(
                vec![
                    invocation("create_calendar_event", json!({}), false, true),
                    invocation("no_calendar_action", json!({}), false, true),
                ],
                false,
            ),
        );
        assert_eq!(analysis.action, "none");
        assert!(analysis.reasoning.contains("Ambiguous tool output"));
    }

    #[test]
    fn handler_error_is_none_with_error_text() {
        let analysis = parse_agent_output(
            AgentKind::Event,
            &output(
                vec![invocation("create_calendar_event", json!({}), true, true)],
                false,
            ),
        );
        assert_eq!(analysis.action, "none");
        assert!(analysis.reasoning.contains("handler failed"));
    }

    #[test]
    fn unknown_action_degrades_with_has_event() {
        let analysis = parse_agent_output(
            AgentKind::Event,
            // a reminder tool leaking into the event family
            &output(
                vec![invocation("create_reminder", json!({}), false, true)],
                false,
            ),
        );
        assert_eq!(analysis.action, "");
        assert!(analysis.has_event);
    }

    #[test]
    fn extraction_calls_do_not_count_as_actions() {
        let analysis = parse_agent_output(
            AgentKind::Event,
            &output(
                vec![
                    invocation("extract_datetime", json!({"text": "x"}), false, false),
                    invocation("no_calendar_action", json!({"reasoning": "chit-chat"}), false, true),
                ],
                false,
            ),
        );
        assert_eq!(analysis.action, "none");
        assert_eq!(analysis.reasoning, "chit-chat");
    }
}
