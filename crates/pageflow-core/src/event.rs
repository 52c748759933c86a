use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The body a browser sends to `POST /api/hit` and `POST /api/beacon`.
///
/// Every field stays a raw JSON value: the sanitizer coerces each one and
/// falls back to a default instead of rejecting the hit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HitPayload {
    pub url: Option<Value>,
    pub uid: Option<Value>,
    pub fingerprint: Option<Value>,
    pub referrer_url: Option<Value>,
    pub user_agent: Option<Value>,
    pub time_on_page: Option<Value>,
    pub completed_goals: Option<Value>,
    pub page_id: Option<Value>,
    pub page_type: Option<Value>,
    pub should_load_ecommerce: Option<Value>,
}

impl HitPayload {
    /// `{"request":"test"}` is a connectivity check from the tracking script.
    pub fn is_connectivity_check(body: &Value) -> bool {
        body.get("request").and_then(Value::as_str) == Some("test")
    }
}

/// The four name→id lookup tables behind an event's client identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LookupKind {
    Browser,
    BrowserVersion,
    Platform,
    Device,
}

impl LookupKind {
    pub const ALL: [LookupKind; 4] = [
        LookupKind::Browser,
        LookupKind::BrowserVersion,
        LookupKind::Platform,
        LookupKind::Device,
    ];

    pub fn table(self) -> &'static str {
        match self {
            LookupKind::Browser => "browsers",
            LookupKind::BrowserVersion => "browser_versions",
            LookupKind::Platform => "platforms",
            LookupKind::Device => "devices",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LookupKind::Browser => "browser",
            LookupKind::BrowserVersion => "browser_version",
            LookupKind::Platform => "platform",
            LookupKind::Device => "device",
        }
    }
}

/// Lookup ids for one hit. `0` means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIds {
    pub device_id: i64,
    pub browser_id: i64,
    pub browser_version_id: i64,
    pub platform_id: i64,
}

impl ClientIds {
    /// True when no device, browser, version or platform signal was resolved.
    pub fn is_empty(&self) -> bool {
        self.device_id == 0
            && self.browser_id == 0
            && self.browser_version_id == 0
            && self.platform_id == 0
    }
}

/// A stored page view row, as inserted into the `events` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub uid: String,
    pub session_id: i64,
    pub page_url: String,
    pub parameters: String,
    pub page_id: i64,
    pub page_type: Option<String>,
    pub referrer: Option<String>,
    pub ids: ClientIds,
    pub time_on_page: i64,
    pub bounce: bool,
    pub first_time_visit: bool,
    pub time: DateTime<Utc>,
}

/// In-place accumulation of time on page for an existing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventUpdate {
    pub event_id: i64,
    pub time_on_page_increment: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub referrer: Option<String>,
    pub first_visited_url: String,
    pub last_visited_url: String,
    pub host: Option<String>,
    pub city_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUpdate {
    pub session_id: i64,
    pub last_visited_url: String,
    pub host: Option<String>,
}

/// Parameters of the lookback query that looks for the visitor's most recent
/// event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookbackQuery {
    pub uid: String,
    pub since: DateTime<Utc>,
    /// Only set when domain filtering is enabled.
    pub host: Option<String>,
}

/// The most recent event for a visitor together with its session's cached
/// navigation fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookbackEvent {
    pub id: i64,
    pub session_id: i64,
    pub page_url: String,
    pub parameters: String,
    pub time_on_page: i64,
    pub ids: ClientIds,
    pub session_last_url: Option<String>,
    pub session_host: Option<String>,
}

/// A goal definition evaluated on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: i64,
    pub title: String,
    pub goal_type: String,
    pub url: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connectivity_check_body_is_detected() {
        assert!(HitPayload::is_connectivity_check(&json!({ "request": "test" })));
        assert!(!HitPayload::is_connectivity_check(&json!({ "request": "hit" })));
        assert!(!HitPayload::is_connectivity_check(&json!({ "url": "https://example.com" })));
    }

    #[test]
    fn payload_tolerates_unknown_and_loose_fields() {
        let payload: HitPayload = serde_json::from_value(json!({
            "url": "https://example.com/a",
            "uid": "abc",
            "time_on_page": "15",
            "completed_goals": [1, "2"],
            "something_else": true
        }))
        .expect("payload");
        assert_eq!(payload.url, Some(json!("https://example.com/a")));
        assert_eq!(payload.time_on_page, Some(json!("15")));
    }

    #[test]
    fn payload_accepts_any_json_type_per_field() {
        let payload: HitPayload = serde_json::from_value(json!({
            "uid": 12345,
            "page_type": 7,
            "should_load_ecommerce": "true",
            "user_agent": null
        }))
        .expect("payload");
        assert_eq!(payload.uid, Some(json!(12345)));
        assert_eq!(payload.page_type, Some(json!(7)));
        assert_eq!(payload.user_agent, None);
    }

    #[test]
    fn client_ids_empty_only_when_all_zero() {
        assert!(ClientIds::default().is_empty());
        let ids = ClientIds {
            platform_id: 3,
            ..ClientIds::default()
        };
        assert!(!ids.is_empty());
    }
}
