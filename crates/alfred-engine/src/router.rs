//! Cheap intent routing: decide which agent family a message goes to
//! before spending an LLM call. The verdict and its confidence land on
//! the analysis trace.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Event,
    Reminder,
}

#[derive(Debug, Clone, Copy)]
pub struct RoutedIntent {
    pub intent: Intent,
    pub confidence: f64,
}

const REMINDER_MARKERS: &[&str] = &[
    "remind",
    "reminder",
    "don't forget",
    "dont forget",
    "due",
    "deadline",
    "pay ",
    "renew",
    "submit",
    "todo",
    "to-do",
];

const EVENT_MARKERS: &[&str] = &[
    "meet",
    "meeting",
    "dinner",
    "lunch",
    "breakfast",
    "appointment",
    "call at",
    "see you",
    "party",
    "flight",
    "concert",
    "visit",
];

/// Score both families; the stronger signal wins, events on a tie (a
/// concrete time usually means a calendar slot).
pub fn route(text: &str) -> RoutedIntent {
    let lower = text.to_lowercase();

    let reminder_hits = REMINDER_MARKERS.iter().filter(|m| lower.contains(**m)).count();
    let event_hits = EVENT_MARKERS.iter().filter(|m| lower.contains(**m)).count();

    let (intent, hits, other) = if reminder_hits > event_hits {
        (Intent::Reminder, reminder_hits, event_hits)
    } else {
        (Intent::Event, event_hits, reminder_hits)
    };

    // 0.5 when nothing matched, approaching 1.0 with unanimous signal.
    let total = hits + other;
    let confidence = if total == 0 {
        0.5
    } else {
        0.5 + 0.5 * (hits as f64 / total as f64)
    };

    RoutedIntent { intent, confidence }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dinner_routes_to_event() {
        let routed = route("Dinner tomorrow 19:00 at Luigi's");
        assert_eq!(routed.intent, Intent::Event);
        assert!(routed.confidence > 0.9);
    }

    #[test]
    fn remind_routes_to_reminder() {
        let routed = route("remind me to pay rent on friday");
        assert_eq!(routed.intent, Intent::Reminder);
        assert!(routed.confidence > 0.9);
    }

    #[test]
    fn no_signal_defaults_to_event_with_low_confidence() {
        let routed = route("okay sounds good");
        assert_eq!(routed.intent, Intent::Event);
        assert!((routed.confidence - 0.5).abs() < f64::EPSILON);
    }
}
