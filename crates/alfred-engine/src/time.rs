//! Parsing of model-proposed times into the user's zone.
//!
//! The agent is instructed to emit RFC 3339, but models drift; naive and
//! date-only shapes are accepted with a quality-flag fallback rather than
//! rejected outright.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::error::{EngineError, Result};

/// Result of resolving one proposed time.
pub struct ResolvedTime {
    /// RFC 3339 with the user's offset.
    pub rfc3339: String,
    /// True when the input named a day but no clock time (local-time
    /// assumption applied).
    pub fallback: bool,
}

/// Hour assumed for date-only inputs.
const DATE_ONLY_HOUR: u32 = 9;

pub fn resolve_in_zone(raw: &str, tz: Tz) -> Result<ResolvedTime> {
    let trimmed = raw.trim();

    // Full RFC 3339: trust the offset, render in the user's zone.
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ResolvedTime {
            rfc3339: dt.with_timezone(&tz).to_rfc3339(),
            fallback: false,
        });
    }

    // Naive datetime: interpret in the user's zone.
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            let zoned = tz
                .from_local_datetime(&naive)
                .single()
                .ok_or_else(|| ambiguous(trimmed))?;
            return Ok(ResolvedTime {
                rfc3339: zoned.to_rfc3339(),
                fallback: false,
            });
        }
    }

    // Date only: assume a local morning and flag it.
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let time = NaiveTime::from_hms_opt(DATE_ONLY_HOUR, 0, 0)
            .expect("constant time is valid");
        let zoned = tz
            .from_local_datetime(&date.and_time(time))
            .single()
            .ok_or_else(|| ambiguous(trimmed))?;
        return Ok(ResolvedTime {
            rfc3339: zoned.to_rfc3339(),
            fallback: true,
        });
    }

    Err(EngineError::Validation(format!(
        "unparseable time '{trimmed}'"
    )))
}

fn ambiguous(raw: &str) -> EngineError {
    EngineError::Validation(format!("ambiguous local time '{raw}' (DST edge)"))
}

/// IANA zone lookup with a UTC fallback for corrupt rows.
pub fn zone_or_utc(name: &str) -> Tz {
    name.parse().unwrap_or(chrono_tz::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Berlin;

    #[test]
    fn rfc3339_is_rendered_in_user_zone() {
        let resolved = resolve_in_zone("2026-02-09T18:00:00Z", Berlin).unwrap();
        assert_eq!(resolved.rfc3339, "2026-02-09T19:00:00+01:00");
        assert!(!resolved.fallback);
    }

    #[test]
    fn naive_datetime_is_interpreted_locally() {
        let resolved = resolve_in_zone("2026-02-09T19:00:00", Berlin).unwrap();
        assert_eq!(resolved.rfc3339, "2026-02-09T19:00:00+01:00");
        assert!(!resolved.fallback);
    }

    #[test]
    fn date_only_falls_back_with_flag() {
        let resolved = resolve_in_zone("2026-02-09", Berlin).unwrap();
        assert!(resolved.fallback);
        assert!(resolved.rfc3339.starts_with("2026-02-09T09:00:00"));
    }

    #[test]
    fn garbage_is_validation() {
        assert!(matches!(
            resolve_in_zone("next full moon", Berlin),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn zone_fallback() {
        assert_eq!(zone_or_utc("Europe/Berlin"), Berlin);
        assert_eq!(zone_or_utc("Mars/Olympus"), chrono_tz::UTC);
    }
}
