//! Orchestrates one analysis: prompt → bounded loop → parse → language
//! validation → at most one corrective retry.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::executor::{AgentExecutor, AgentInput};
use crate::language;
use crate::parse::{parse_agent_output, Analysis};
use crate::prompt::{self, PromptContext};
use crate::provider::{LlmProvider, Message, Role};
use crate::tools;

pub use crate::parse::AgentKind;

impl AgentKind {
    fn label(&self) -> &'static str {
        match self {
            AgentKind::Event => "event",
            AgentKind::Reminder => "reminder",
        }
    }
}

/// The verdict plus run metadata for the trace row.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub analysis: Analysis,
    pub turns_used: usize,
    pub retried_for_language: bool,
    pub language_validation_passed: Option<bool>,
}

pub struct Analyzer {
    executor: AgentExecutor,
    max_turns: usize,
}

impl Analyzer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: String,
        temperature: f64,
        max_turns: usize,
    ) -> Self {
        Self {
            executor: AgentExecutor::new(provider, model, temperature),
            max_turns,
        }
    }

    /// Run one analysis over a prompt context.
    ///
    /// When the trigger's language is reliably detectable, the result's
    /// user-visible fields are validated against it; a single corrective
    /// retry is issued on mismatch and the retry's result is returned
    /// regardless of its own validation outcome.
    pub async fn analyze(&self, kind: AgentKind, ctx: &PromptContext) -> Result<AnalysisRun> {
        let system = match kind {
            AgentKind::Event => prompt::event_system_prompt(),
            AgentKind::Reminder => prompt::reminder_system_prompt(),
        };
        let toolset = match kind {
            AgentKind::Event => tools::event_tools(ctx.timezone),
            AgentKind::Reminder => tools::reminder_tools(ctx.timezone),
        };

        let target = language::detect(&ctx.trigger.text);

        let first_prompt = prompt::build_user_prompt(ctx, target.as_ref(), None);
        let first_output = self
            .executor
            .run(&system, &self.input(first_prompt, ctx), &toolset)
            .await?;
        let first = parse_agent_output(kind, &first_output);

        let Some(target) = target else {
            // not language-reliable: single pass, no validation
            return Ok(AnalysisRun {
                analysis: first,
                turns_used: first_output.turns_used,
                retried_for_language: false,
                language_validation_passed: None,
            });
        };

        let outcome = language::validate(&target, &first.visible_fields());
        language::log_outcome(kind.label(), &outcome);
        if outcome.pass {
            return Ok(AnalysisRun {
                analysis: first,
                turns_used: first_output.turns_used,
                retried_for_language: false,
                language_validation_passed: Some(true),
            });
        }

        debug!(agent = kind.label(), "language mismatch, issuing corrective retry");
        let retry_prompt =
            prompt::build_user_prompt(ctx, Some(&target), Some((&target, &outcome)));
        let retry_output = self
            .executor
            .run(&system, &self.input(retry_prompt, ctx), &toolset)
            .await?;
        let retry = parse_agent_output(kind, &retry_output);

        let retry_outcome = language::validate(&target, &retry.visible_fields());
        language::log_outcome(kind.label(), &retry_outcome);

        // Best effort: the retry result stands even if it failed again.
        Ok(AnalysisRun {
            analysis: retry,
            turns_used: first_output.turns_used + retry_output.turns_used,
            retried_for_language: true,
            language_validation_passed: Some(retry_outcome.pass),
        })
    }

    fn input(&self, user_prompt: String, ctx: &PromptContext) -> AgentInput {
        AgentInput {
            messages: vec![Message {
                role: Role::User,
                content: user_prompt,
            }],
            max_turns: self.max_turns,
            timezone: ctx.timezone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::ScriptedProvider;
    use crate::parse::AnalysisEntity;
    use crate::prompt::{HistoryMessage, TriggerMessage};
    use chrono::Utc;
    use serde_json::json;

    fn ctx(trigger_text: &str) -> PromptContext {
        PromptContext {
            history: Vec::<HistoryMessage>::new(),
            trigger: TriggerMessage {
                row_id: Some(1),
                sender_name: "Noa".into(),
                text: trigger_text.into(),
                timestamp: "2026-02-08T10:00:00+02:00".into(),
            },
            proposals: vec![],
            now_utc: Utc::now(),
            timezone: chrono_tz::Asia::Jerusalem,
            email: None,
        }
    }

    fn analyzer(provider: ScriptedProvider) -> (Analyzer, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        (
            Analyzer::new(provider.clone(), "scripted".into(), 0.1, 6),
            provider,
        )
    }

    #[tokio::test]
    async fn wrong_language_first_pass_triggers_exactly_one_retry() {
        let hebrew_create = ScriptedProvider::tool_response(vec![(
            "create_calendar_event",
            json!({
                "title": "ארוחת ערב",
                "start_time": "2026-02-09T19:00:00+02:00",
                "confidence": 0.9
            }),
        )]);
        let english_create = ScriptedProvider::tool_response(vec![(
            "create_calendar_event",
            json!({
                "title": "Dinner with friends",
                "start_time": "2026-02-09T19:00:00+02:00",
                "confidence": 0.9
            }),
        )]);
        let (analyzer, provider) =
            analyzer(ScriptedProvider::new(vec![english_create, hebrew_create]));

        let run = analyzer
            .analyze(AgentKind::Event, &ctx("ארוחת ערב מחר בשבע בערב אצל לואיג'י"))
            .await
            .unwrap();

        assert!(run.retried_for_language);
        assert_eq!(run.language_validation_passed, Some(true));
        match run.analysis.entity {
            AnalysisEntity::Event(ref e) => {
                assert_eq!(e.title.as_deref(), Some("ארוחת ערב"));
            }
            _ => panic!("expected event"),
        }
        // two LLM round-trips, not three
        assert_eq!(provider.requests.lock().unwrap().len(), 2);
        // the retry request must carry the corrective clause
        let second = &provider.requests.lock().unwrap()[1];
        let raw = second.raw_messages.as_ref().unwrap();
        assert!(raw[0]["content"].as_str().unwrap().contains("Correction:"));
    }

    #[tokio::test]
    async fn matching_language_needs_no_retry() {
        let hebrew_create = ScriptedProvider::tool_response(vec![(
            "create_calendar_event",
            json!({
                "title": "ארוחת ערב",
                "start_time": "2026-02-09T19:00:00+02:00",
                "confidence": 0.9
            }),
        )]);
        let (analyzer, provider) = analyzer(ScriptedProvider::new(vec![hebrew_create]));

        let run = analyzer
            .analyze(AgentKind::Event, &ctx("ארוחת ערב מחר בשבע בערב"))
            .await
            .unwrap();

        assert!(!run.retried_for_language);
        assert_eq!(run.language_validation_passed, Some(true));
        assert_eq!(provider.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_retry_result_is_still_returned() {
        let english = || {
            ScriptedProvider::tool_response(vec![(
                "create_calendar_event",
                json!({
                    "title": "Dinner again",
                    "start_time": "2026-02-09T19:00:00+02:00",
                    "confidence": 0.7
                }),
            )])
        };
        let (analyzer, provider) = analyzer(ScriptedProvider::new(vec![english(), english()]));

        let run = analyzer
            .analyze(AgentKind::Event, &ctx("ארוחת ערב מחר בשבע בערב"))
            .await
            .unwrap();

        assert!(run.retried_for_language);
        assert_eq!(run.language_validation_passed, Some(false));
        assert!(run.analysis.has_event);
        // no third attempt
        assert_eq!(provider.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unreliable_language_skips_validation() {
        let none = ScriptedProvider::tool_response(vec![("no_calendar_action", json!({}))]);
        let (analyzer, provider) = analyzer(ScriptedProvider::new(vec![none]));

        let run = analyzer.analyze(AgentKind::Event, &ctx("ok 👍")).await.unwrap();
        assert!(run.language_validation_passed.is_none());
        assert_eq!(provider.requests.lock().unwrap().len(), 1);
    }
}
