//! User-prompt assembly.
//!
//! Section order is fixed: channel history (trigger deduplicated), the
//! trigger message, existing proposals (with internal + external ids so
//! the model can target updates/deletes), current wall-clock time in the
//! user's zone, the output-language requirement, and — on retry — the
//! corrective clause. Gmail triggers additionally carry their headers and
//! thread history.

use alfred_core::types::EmailContext;
use chrono::DateTime;
use chrono_tz::Tz;

use crate::language::{self, LanguageTarget, ValidationOutcome};

/// Per-message cap when rendering Gmail thread history.
const THREAD_MESSAGE_CAP: usize = 2 * 1024;
/// Cap for the focus (trigger) email body.
const FOCUS_BODY_CAP: usize = 8 * 1024;

/// One prior message of the channel, for context.
#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub row_id: i64,
    pub sender_name: String,
    pub text: String,
    pub timestamp: String,
}

/// The message that triggered this run.
#[derive(Debug, Clone)]
pub struct TriggerMessage {
    pub row_id: Option<i64>,
    pub sender_name: String,
    pub text: String,
    pub timestamp: String,
}

/// An open proposal the model may reference by id.
#[derive(Debug, Clone)]
pub struct ProposalRef {
    pub id: i64,
    pub external_event_id: Option<String>,
    pub title: String,
    pub when: Option<String>,
}

/// Everything the builder needs for one run.
pub struct PromptContext {
    pub history: Vec<HistoryMessage>,
    pub trigger: TriggerMessage,
    pub proposals: Vec<ProposalRef>,
    pub now_utc: DateTime<chrono::Utc>,
    pub timezone: Tz,
    pub email: Option<EmailContext>,
}

/// Build the user prompt for a run. `retry` carries the prior validation
/// failure on the second (and last) pass.
pub fn build_user_prompt(
    ctx: &PromptContext,
    language: Option<&LanguageTarget>,
    retry: Option<(&LanguageTarget, &ValidationOutcome)>,
) -> String {
    let mut sections: Vec<String> = Vec::new();

    // 1. Recent history, excluding the trigger itself.
    let history: Vec<&HistoryMessage> = ctx
        .history
        .iter()
        .filter(|m| {
            ctx.trigger.row_id.map_or(true, |id| m.row_id != id) && m.text != ctx.trigger.text
        })
        .collect();
    if !history.is_empty() {
        let mut block = String::from("Recent messages in this conversation:\n");
        for m in history {
            block.push_str(&format!("[{}] {}: {}\n", m.timestamp, m.sender_name, m.text));
        }
        sections.push(block);
    }

    // 2. The trigger (with Gmail headers + thread when present).
    match &ctx.email {
        Some(email) => sections.push(render_email_trigger(&ctx.trigger, email)),
        None => sections.push(format!(
            "New message to analyze:\n[{}] {}: {}",
            ctx.trigger.timestamp, ctx.trigger.sender_name, ctx.trigger.text
        )),
    }

    // 3. Existing proposals for this channel.
    if !ctx.proposals.is_empty() {
        let mut block = String::from(
            "Existing pending proposals for this conversation \
             (reference alfred_entity_id to update or delete):\n",
        );
        for p in &ctx.proposals {
            block.push_str(&format!(
                "- alfred_entity_id={} title={:?} when={} external_id={}\n",
                p.id,
                p.title,
                p.when.as_deref().unwrap_or("unset"),
                p.external_event_id.as_deref().unwrap_or("none"),
            ));
        }
        sections.push(block);
    }

    // 4. Current wall-clock time in the user's zone, offset included.
    let now_local = ctx.now_utc.with_timezone(&ctx.timezone);
    sections.push(format!(
        "Current time: {} ({})",
        now_local.to_rfc3339(),
        ctx.timezone.name()
    ));

    // 5. Output-language requirement.
    if let Some(target) = language {
        sections.push(language::instruction(target));
    }

    // 6. Corrective retry clause.
    if let Some((target, outcome)) = retry {
        sections.push(language::retry_instruction(target, outcome));
    }

    sections.join("\n\n")
}

fn render_email_trigger(trigger: &TriggerMessage, email: &EmailContext) -> String {
    let mut block = String::new();

    if !email.thread.is_empty() {
        block.push_str("Earlier messages in this email thread (oldest first):\n");
        for entry in &email.thread {
            block.push_str(&format!(
                "From: {} ({})\n{}\n---\n",
                entry.from,
                entry.date,
                truncate(&entry.body, THREAD_MESSAGE_CAP)
            ));
        }
        block.push('\n');
    }

    block.push_str(&format!(
        "New email to analyze:\nFrom: {}\nTo: {}\nDate: {}\nSubject: {}\n\n{}",
        email.from,
        email.to,
        email.date,
        email.subject,
        truncate(&trigger.text, FOCUS_BODY_CAP)
    ));
    block
}

/// Char-boundary-safe prefix truncation with an ellipsis marker.
fn truncate(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…[truncated]", &text[..end])
}

/// System prompt for the calendar-event agent.
pub fn event_system_prompt() -> String {
    "You are a scheduling assistant. You read one conversation and decide \
     whether it contains a concrete calendar-worthy commitment.\n\
     Use the extraction tools to resolve dates, locations, and attendees, \
     then finish with exactly ONE action tool call:\n\
     - create_calendar_event for a new commitment with a concrete time\n\
     - update_calendar_event when the conversation changes an existing \
       pending proposal (pass its alfred_entity_id)\n\
     - delete_calendar_event when an existing pending proposal is cancelled\n\
     - no_calendar_action when there is nothing to schedule\n\
     Be conservative: casual mentions without commitment are no_calendar_action. \
     Always pass confidence (0-1) and a short reasoning."
        .to_string()
}

/// System prompt for the reminder agent.
pub fn reminder_system_prompt() -> String {
    "You are a personal-task assistant. You read one conversation and decide \
     whether it contains a task or obligation worth a reminder.\n\
     Use the extraction tools to resolve dates, then finish with exactly ONE \
     action tool call: create_reminder, update_reminder, delete_reminder \
     (pass alfred_entity_id for the last two), or no_reminder_action.\n\
     A reminder may have only a description — a due date is optional. \
     Always pass confidence (0-1) and a short reasoning."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_core::types::ThreadEntry;
    use chrono::Utc;

    fn ctx() -> PromptContext {
        PromptContext {
            history: vec![
                HistoryMessage {
                    row_id: 1,
                    sender_name: "Anna".into(),
                    text: "are you free tomorrow?".into(),
                    timestamp: "2026-02-08T09:58:00+01:00".into(),
                },
                HistoryMessage {
                    row_id: 2,
                    sender_name: "Anna".into(),
                    text: "Dinner tomorrow 19:00 at Luigi's".into(),
                    timestamp: "2026-02-08T10:00:00+01:00".into(),
                },
            ],
            trigger: TriggerMessage {
                row_id: Some(2),
                sender_name: "Anna".into(),
                text: "Dinner tomorrow 19:00 at Luigi's".into(),
                timestamp: "2026-02-08T10:00:00+01:00".into(),
            },
            proposals: vec![ProposalRef {
                id: 17,
                external_event_id: None,
                title: "Dinner".into(),
                when: Some("2026-02-09T19:00:00+01:00".into()),
            }],
            now_utc: DateTime::parse_from_rfc3339("2026-02-08T09:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            timezone: chrono_tz::Europe::Berlin,
            email: None,
        }
    }

    #[test]
    fn section_order_is_stable() {
        let prompt = build_user_prompt(&ctx(), None, None);
        let history_idx = prompt.find("Recent messages").unwrap();
        let trigger_idx = prompt.find("New message to analyze").unwrap();
        let proposal_idx = prompt.find("alfred_entity_id=17").unwrap();
        let time_idx = prompt.find("Current time:").unwrap();
        assert!(history_idx < trigger_idx);
        assert!(trigger_idx < proposal_idx);
        assert!(proposal_idx < time_idx);
    }

    #[test]
    fn trigger_is_deduplicated_from_history() {
        let prompt = build_user_prompt(&ctx(), None, None);
        assert_eq!(prompt.matches("Dinner tomorrow 19:00 at Luigi's").count(), 1);
    }

    #[test]
    fn current_time_carries_the_offset() {
        let prompt = build_user_prompt(&ctx(), None, None);
        assert!(prompt.contains("2026-02-08T10:00:00+01:00"));
        assert!(prompt.contains("Europe/Berlin"));
    }

    #[test]
    fn language_and_retry_clauses_come_last() {
        let target = crate::language::detect("ארוחת ערב מחר בשבע").unwrap();
        let outcome = crate::language::ValidationOutcome {
            pass: false,
            checked_fields: 1,
            mismatched_fields: vec!["title".into()],
        };
        let prompt = build_user_prompt(&ctx(), Some(&target), Some((&target, &outcome)));
        let lang_idx = prompt.find("using the Hebrew script").unwrap();
        let retry_idx = prompt.find("Correction:").unwrap();
        assert!(lang_idx < retry_idx);
        assert!(retry_idx > prompt.find("Current time:").unwrap());
    }

    #[test]
    fn email_trigger_renders_headers_and_thread() {
        let mut context = ctx();
        context.email = Some(EmailContext {
            email_id: "m1".into(),
            thread_id: "t1".into(),
            from: "boss@acme.com".into(),
            to: "me@example.com".into(),
            date: "Sun, 8 Feb 2026 10:00:00 +0100".into(),
            subject: "Quarterly review".into(),
            thread: vec![ThreadEntry {
                from: "me@example.com".into(),
                date: "Sat, 7 Feb 2026 18:00:00 +0100".into(),
                body: "x".repeat(5000),
            }],
        });
        let prompt = build_user_prompt(&context, None, None);
        assert!(prompt.contains("Subject: Quarterly review"));
        assert!(prompt.contains("Earlier messages in this email thread"));
        assert!(prompt.contains("[truncated]"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(100);
        let t = truncate(&s, 51); // mid-codepoint
        assert!(t.ends_with("[truncated]"));
        assert!(t.starts_with('é'));
    }
}
