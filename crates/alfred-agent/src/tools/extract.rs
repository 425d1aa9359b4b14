//! Extraction tools — non-terminal helpers whose outputs feed later tool
//! calls in the same run. Errors here are reported back to the model as
//! tool errors, never aborting the loop.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::json;

use super::{Tool, ToolResult};

/// Resolve a natural-language date/time expression in the user's zone.
pub struct ExtractDatetime {
    timezone: Tz,
}

impl ExtractDatetime {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }
}

#[derive(Deserialize)]
struct DatetimeInput {
    text: String,
    /// RFC 3339 anchor for relative expressions; defaults to now.
    reference_time: Option<String>,
}

#[async_trait]
impl Tool for ExtractDatetime {
    fn name(&self) -> &str {
        "extract_datetime"
    }

    fn description(&self) -> &str {
        "Resolve a date/time expression (e.g. 'tomorrow 19:00', '2026-02-09 14:30') \
         to an absolute timestamp in the user's time zone."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "The date/time expression"},
                "reference_time": {"type": "string", "description": "RFC 3339 anchor for relative expressions"}
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let input: DatetimeInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolResult::error(format!("invalid input: {e}")),
        };

        let reference = input
            .reference_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        match resolve_datetime(&input.text, reference, self.timezone) {
            Some((resolved, fallback)) => ToolResult::json(&json!({
                "datetime": resolved.to_rfc3339(),
                "timezone": self.timezone.name(),
                "date_only_fallback": fallback,
            })),
            None => ToolResult::error(format!(
                "could not resolve '{}' to a date/time",
                input.text
            )),
        }
    }
}

/// Returns `(resolved, date_only_fallback)`. The fallback flag marks
/// expressions that named a day but no clock time.
fn resolve_datetime(
    text: &str,
    reference: DateTime<Utc>,
    tz: Tz,
) -> Option<(DateTime<Tz>, bool)> {
    let trimmed = text.trim();

    // Absolute RFC 3339 first.
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some((dt.with_timezone(&tz), false));
    }

    let lower = trimmed.to_lowercase();
    let local_ref = reference.with_timezone(&tz);

    // Day resolution: explicit date, "today", "tomorrow", or the reference day.
    let (day, day_explicit, rest) = if let Some(rest) = lower.strip_prefix("tomorrow") {
        (local_ref.date_naive() + Duration::days(1), true, rest)
    } else if let Some(rest) = lower.strip_prefix("today") {
        (local_ref.date_naive(), true, rest)
    } else if let Some(rest) = lower.strip_prefix("tonight") {
        // "tonight" implies an evening default when no time follows
        let day = local_ref.date_naive();
        let time = parse_time(rest).unwrap_or(NaiveTime::from_hms_opt(20, 0, 0)?);
        let resolved = tz.from_local_datetime(&day.and_time(time)).single()?;
        return Some((resolved, false));
    } else if let Some((date, rest)) = parse_leading_date(&lower) {
        (date, true, rest)
    } else {
        (local_ref.date_naive(), false, lower.as_str())
    };

    match parse_time(rest) {
        Some(time) => {
            let resolved = tz.from_local_datetime(&day.and_time(time)).single()?;
            Some((resolved, false))
        }
        None if day_explicit => {
            // date-only: assume start of day local time and flag the fallback
            let resolved = tz
                .from_local_datetime(&day.and_time(NaiveTime::from_hms_opt(9, 0, 0)?))
                .single()?;
            Some((resolved, true))
        }
        None => None,
    }
}

/// `YYYY-MM-DD` or `DD.MM.YYYY` at the start of the text.
fn parse_leading_date(text: &str) -> Option<(NaiveDate, &str)> {
    let token = text.split_whitespace().next()?;
    let date = NaiveDate::parse_from_str(token, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(token, "%d.%m.%Y"))
        .ok()?;
    Some((date, &text[token.len()..]))
}

/// First `HH:MM` (optionally am/pm-suffixed hour) found in the text.
fn parse_time(text: &str) -> Option<NaiveTime> {
    for token in text.split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != ':');
        if let Ok(t) = NaiveTime::parse_from_str(token, "%H:%M") {
            return Some(t);
        }
        if let Some(t) = parse_am_pm(token) {
            return Some(t);
        }
    }
    None
}

fn parse_am_pm(token: &str) -> Option<NaiveTime> {
    let lower = token.to_lowercase();
    let (digits, pm) = if let Some(d) = lower.strip_suffix("pm") {
        (d, true)
    } else if let Some(d) = lower.strip_suffix("am") {
        (d, false)
    } else {
        return None;
    };
    let hour: u32 = digits.parse().ok()?;
    if hour == 0 || hour > 12 {
        return None;
    }
    let hour24 = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, true) => h + 12,
        (h, false) => h,
    };
    NaiveTime::from_hms_opt(hour24, 0, 0)
}

/// Pull a probable location out of free text ("at Luigi's", "in Room 4").
pub struct ExtractLocation;

#[derive(Deserialize)]
struct TextInput {
    text: String,
}

#[async_trait]
impl Tool for ExtractLocation {
    fn name(&self) -> &str {
        "extract_location"
    }

    fn description(&self) -> &str {
        "Extract a venue or place name from a message, if one is mentioned."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"}
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let input: TextInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolResult::error(format!("invalid input: {e}")),
        };
        ToolResult::json(&json!({ "location": find_location(&input.text) }))
    }
}

fn find_location(text: &str) -> Option<String> {
    for marker in [" at ", " in ", " @ "] {
        if let Some(idx) = text.find(marker) {
            let tail = &text[idx + marker.len()..];
            // Skip time-like tails ("at 19:00").
            if tail
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
            {
                continue;
            }
            let location: String = tail
                .split(|c: char| c == ',' || c == '.' || c == '!' || c == '?' || c == '\n')
                .next()
                .unwrap_or("")
                .trim()
                .to_string();
            if !location.is_empty() {
                return Some(location);
            }
        }
    }
    None
}

/// Names mentioned as participants ("with Anna and Ben").
pub struct ExtractAttendees;

#[async_trait]
impl Tool for ExtractAttendees {
    fn name(&self) -> &str {
        "extract_attendees"
    }

    fn description(&self) -> &str {
        "Extract the names of people mentioned as participants."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"}
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let input: TextInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolResult::error(format!("invalid input: {e}")),
        };
        let attendees = find_attendees(&input.text);
        ToolResult::json(&json!({ "attendees": attendees }))
    }
}

fn find_attendees(text: &str) -> Vec<String> {
    let Some(idx) = text.to_lowercase().find(" with ") else {
        return Vec::new();
    };
    let tail = &text[idx + " with ".len()..];
    let clause = tail
        .split(|c: char| c == '.' || c == '!' || c == '?' || c == '\n')
        .next()
        .unwrap_or("");
    clause
        .split(',')
        .flat_map(|part| part.split(" and "))
        .filter_map(|part| {
            // keep the leading run of capitalized words ("Clara tomorrow" → "Clara")
            let name: Vec<&str> = part
                .split_whitespace()
                .take_while(|w| w.chars().next().is_some_and(|c| c.is_uppercase()))
                .collect();
            if name.is_empty() {
                None
            } else {
                Some(name.join(" "))
            }
        })
        .collect()
}
