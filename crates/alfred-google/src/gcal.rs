//! Google Calendar v3 — the event CRUD the sync worker drives.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{check_response, GoogleError, Result};

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

/// Start/end of a calendar event: either a zoned `dateTime` or an all-day
/// `date`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventTime {
    pub fn at(date_time: &str, time_zone: &str) -> Self {
        Self {
            date_time: Some(date_time.to_string()),
            date: None,
            time_zone: Some(time_zone.to_string()),
        }
    }
}

/// Outbound event body for insert/patch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<EventTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<EventTime>,
}

/// The slice of the provider's event we care about.
#[derive(Debug, Clone, Deserialize)]
pub struct GcalEvent {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "htmlLink")]
    pub html_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalendarInfo {
    pub id: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Deserialize)]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarInfo>,
}

pub struct CalendarClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for CalendarClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL.to_string())
    }
}

impl CalendarClient {
    pub fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                alfred_core::config::CALENDAR_TIMEOUT_SECS,
            ))
            .build()
            .expect("reqwest client");
        Self { http, base_url }
    }

    pub async fn list_calendars(&self, access_token: &str) -> Result<Vec<CalendarInfo>> {
        let url = format!("{}/users/me/calendarList", self.base_url);
        let resp = self.http.get(&url).bearer_auth(access_token).send().await?;
        let resp = check_response(resp).await?;
        let list: CalendarListResponse = resp
            .json()
            .await
            .map_err(|e| GoogleError::Parse(e.to_string()))?;
        Ok(list.items)
    }

    pub async fn insert_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &EventResource,
    ) -> Result<GcalEvent> {
        debug!(calendar_id, "inserting calendar event");
        let url = format!("{}/calendars/{}/events", self.base_url, calendar_id);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(event)
            .send()
            .await?;
        let resp = check_response(resp).await?;
        resp.json().await.map_err(|e| GoogleError::Parse(e.to_string()))
    }

    pub async fn patch_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        event: &EventResource,
    ) -> Result<GcalEvent> {
        debug!(calendar_id, event_id, "patching calendar event");
        let url = format!(
            "{}/calendars/{}/events/{}",
            self.base_url, calendar_id, event_id
        );
        let resp = self
            .http
            .patch(&url)
            .bearer_auth(access_token)
            .json(event)
            .send()
            .await?;
        let resp = check_response(resp).await?;
        resp.json().await.map_err(|e| GoogleError::Parse(e.to_string()))
    }

    pub async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<()> {
        debug!(calendar_id, event_id, "deleting calendar event");
        let url = format!(
            "{}/calendars/{}/events/{}",
            self.base_url, calendar_id, event_id
        );
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(access_token)
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_resource_serializes_only_set_fields() {
        let resource = EventResource {
            summary: Some("Dinner".into()),
            start: Some(EventTime::at("2026-02-09T19:00:00+01:00", "Europe/Berlin")),
            ..Default::default()
        };
        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["summary"], "Dinner");
        assert_eq!(json["start"]["dateTime"], "2026-02-09T19:00:00+01:00");
        assert_eq!(json["start"]["timeZone"], "Europe/Berlin");
        assert!(json.get("description").is_none());
        assert!(json.get("end").is_none());
    }

    #[test]
    fn gcal_event_parses_provider_shape() {
        let event: GcalEvent = serde_json::from_str(
            r#"{"id":"evt_abc","status":"confirmed","htmlLink":"https://cal/evt_abc","etag":"x"}"#,
        )
        .unwrap();
        assert_eq!(event.id, "evt_abc");
        assert_eq!(event.html_link.as_deref(), Some("https://cal/evt_abc"));
    }
}
