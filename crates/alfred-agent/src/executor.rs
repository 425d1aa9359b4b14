//! The bounded tool-calling loop.
//!
//! Flow per turn: send the accumulated conversation → if the response has
//! tool_use blocks, dispatch each handler, append tool_result blocks, and
//! iterate. Stops on: no tool use, a terminal action invoked, or the turn
//! bound. A handler panic becomes a tool error, never a crash.

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::provider::{send_with_retry, ChatRequest, LlmProvider, Message, ToolCall};
use crate::tools::{to_definitions, Tool, ToolResult};

/// Input to one agent run.
pub struct AgentInput {
    /// Conversation so far; the executor injects the system prompt itself.
    pub messages: Vec<Message>,
    pub max_turns: usize,
    pub timezone: chrono_tz::Tz,
}

/// One dispatched tool call with its outcome, in invocation order.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub call: ToolCall,
    pub result: ToolResult,
    pub terminal: bool,
}

/// What a completed run produced.
#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    pub invocations: Vec<ToolInvocation>,
    pub final_text: String,
    pub turns_used: usize,
    pub max_turns_reached: bool,
}

pub struct AgentExecutor {
    provider: std::sync::Arc<dyn LlmProvider>,
    model: String,
    temperature: f64,
    max_tokens: u32,
}

const DEFAULT_MAX_TOKENS: u32 = 2048;

impl AgentExecutor {
    pub fn new(provider: std::sync::Arc<dyn LlmProvider>, model: String, temperature: f64) -> Self {
        Self {
            provider,
            model,
            temperature,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Run the loop to completion. Terminal-action *arity* is not enforced
    /// here — the parser owns that invariant — but the loop stops after
    /// the first turn that invoked any terminal tool.
    pub async fn run(
        &self,
        system: &str,
        input: &AgentInput,
        tools: &[Box<dyn Tool>],
    ) -> Result<AgentOutput> {
        let mut raw_messages: Vec<serde_json::Value> = input
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
            .collect();

        let mut output = AgentOutput::default();

        for turn in 0..input.max_turns {
            let req = ChatRequest {
                model: self.model.clone(),
                system: system.to_string(),
                messages: Vec::new(),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                tools: to_definitions(tools),
                raw_messages: Some(raw_messages.clone()),
            };

            debug!(turn, "agent loop turn");
            let response = send_with_retry(self.provider.as_ref(), &req).await?;
            output.turns_used = turn + 1;

            if response.tool_calls.is_empty() || response.stop_reason != "tool_use" {
                info!(turn, "agent loop complete — no more tool calls");
                output.final_text = response.content;
                return Ok(output);
            }

            // Assistant turn: any text plus the tool_use blocks.
            let mut assistant_content: Vec<serde_json::Value> = Vec::new();
            if !response.content.is_empty() {
                assistant_content.push(serde_json::json!({
                    "type": "text",
                    "text": response.content,
                }));
            }
            for call in &response.tool_calls {
                assistant_content.push(serde_json::json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.input,
                }));
            }
            raw_messages.push(serde_json::json!({
                "role": "assistant",
                "content": assistant_content,
            }));

            // Dispatch every call of this turn and feed the results back.
            let mut hit_terminal = false;
            let mut tool_result_content: Vec<serde_json::Value> = Vec::new();
            for call in &response.tool_calls {
                let (result, terminal) = dispatch(tools, call).await;
                tool_result_content.push(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": call.id,
                    "content": result.content,
                    "is_error": result.is_error,
                }));
                hit_terminal |= terminal;
                output.invocations.push(ToolInvocation {
                    call: call.clone(),
                    result,
                    terminal,
                });
            }
            raw_messages.push(serde_json::json!({
                "role": "user",
                "content": tool_result_content,
            }));

            if hit_terminal {
                info!(turn, "agent loop complete — terminal action invoked");
                output.final_text = response.content;
                return Ok(output);
            }
        }

        warn!(max_turns = input.max_turns, "agent loop exhausted its turn bound");
        output.max_turns_reached = true;
        Ok(output)
    }
}

/// Find and execute the named tool. Panics are captured and converted to
/// tool errors so the loop can continue.
async fn dispatch(tools: &[Box<dyn Tool>], call: &ToolCall) -> (ToolResult, bool) {
    let Some(tool) = tools.iter().find(|t| t.name() == call.name) else {
        return (ToolResult::error(format!("unknown tool: {}", call.name)), false);
    };

    debug!(tool = %call.name, "executing tool");
    let result = AssertUnwindSafe(tool.execute(call.input.clone()))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            warn!(tool = %call.name, "tool handler panicked");
            ToolResult::error(format!("tool '{}' panicked", call.name))
        });
    (result, tool.is_terminal())
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted provider shared by executor/analyze tests.

    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError, ToolCall};

    /// Replays a fixed sequence of responses, recording each request.
    pub struct ScriptedProvider {
        script: Mutex<Vec<ChatResponse>>,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedProvider {
        pub fn new(mut responses: Vec<ChatResponse>) -> Self {
            responses.reverse();
            Self {
                script: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn text_response(text: &str) -> ChatResponse {
            ChatResponse {
                content: text.to_string(),
                model: "scripted".into(),
                tokens_in: 0,
                tokens_out: 0,
                stop_reason: "end_turn".into(),
                tool_calls: vec![],
            }
        }

        pub fn tool_response(calls: Vec<(&str, serde_json::Value)>) -> ChatResponse {
            ChatResponse {
                content: String::new(),
                model: "scripted".into(),
                tokens_in: 0,
                tokens_out: 0,
                stop_reason: "tool_use".into(),
                tool_calls: calls
                    .into_iter()
                    .enumerate()
                    .map(|(i, (name, input))| ToolCall {
                        id: format!("tu_{i}"),
                        name: name.to_string(),
                        input,
                    })
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.requests.lock().unwrap().push(req.clone());
            self.script
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ProviderError::Parse("script exhausted".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedProvider;
    use super::*;
    use crate::provider::Role;
    use crate::tools::event_tools;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    fn input() -> AgentInput {
        AgentInput {
            messages: vec![Message {
                role: Role::User,
                content: "Dinner tomorrow 19:00 at Luigi's".into(),
            }],
            max_turns: 6,
            timezone: chrono_tz::UTC,
        }
    }

    fn executor(provider: ScriptedProvider) -> AgentExecutor {
        AgentExecutor::new(Arc::new(provider), "scripted".into(), 0.1)
    }

    #[tokio::test]
    async fn terminal_action_stops_the_loop() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::tool_response(vec![(
                "extract_datetime",
                json!({"text": "tomorrow 19:00"}),
            )]),
            ScriptedProvider::tool_response(vec![(
                "create_calendar_event",
                json!({"title": "Dinner", "start_time": "2026-02-09T19:00:00+01:00"}),
            )]),
            // never reached — the loop must stop at the action tool
            ScriptedProvider::text_response("should not be requested"),
        ]);
        let tools = event_tools(chrono_tz::UTC);
        let output = executor(provider).run("sys", &input(), &tools).await.unwrap();

        assert_eq!(output.turns_used, 2);
        assert!(!output.max_turns_reached);
        let terminal: Vec<_> = output.invocations.iter().filter(|i| i.terminal).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].call.name, "create_calendar_event");
    }

    #[tokio::test]
    async fn no_tool_use_ends_with_text() {
        let provider =
            ScriptedProvider::new(vec![ScriptedProvider::text_response("nothing to do")]);
        let tools = event_tools(chrono_tz::UTC);
        let output = executor(provider).run("sys", &input(), &tools).await.unwrap();
        assert!(output.invocations.is_empty());
        assert_eq!(output.final_text, "nothing to do");
    }

    #[tokio::test]
    async fn max_turns_is_honored() {
        let extraction = || {
            ScriptedProvider::tool_response(vec![(
                "extract_location",
                json!({"text": "somewhere"}),
            )])
        };
        let provider = ScriptedProvider::new(vec![
            extraction(),
            extraction(),
            extraction(),
        ]);
        let tools = event_tools(chrono_tz::UTC);
        let mut short_input = input();
        short_input.max_turns = 3;
        let output = executor(provider)
            .run("sys", &short_input, &tools)
            .await
            .unwrap();
        assert!(output.max_turns_reached);
        assert_eq!(output.turns_used, 3);
    }

    #[tokio::test]
    async fn extraction_errors_are_fed_back_not_fatal() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::tool_response(vec![(
                "extract_datetime",
                json!({"text": "no schedule here"}),
            )]),
            ScriptedProvider::tool_response(vec![("no_calendar_action", json!({}))]),
        ]);
        let tools = event_tools(chrono_tz::UTC);
        let output = executor(provider).run("sys", &input(), &tools).await.unwrap();

        assert!(output.invocations[0].result.is_error);
        assert!(!output.invocations[0].terminal);
        assert_eq!(output.invocations[1].call.name, "no_calendar_action");
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "panicking_tool"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _input: serde_json::Value) -> ToolResult {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn tool_panic_becomes_tool_error() {
        let provider = ScriptedProvider::new(vec![
            ScriptedProvider::tool_response(vec![("panicking_tool", json!({}))]),
            ScriptedProvider::text_response("recovered"),
        ]);
        let tools: Vec<Box<dyn Tool>> = vec![Box::new(PanickingTool)];
        let output = executor(provider).run("sys", &input(), &tools).await.unwrap();
        assert!(output.invocations[0].result.is_error);
        assert!(output.invocations[0].result.content.contains("panicked"));
        assert_eq!(output.final_text, "recovered");
    }
}
