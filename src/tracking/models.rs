//! Beacon payloads and the typed events decoded from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::TrackError;

/// Room that every non-live page reports presence into
pub const GLOBAL_ROOM: &str = "global";

/// Page type whose `reference_id` gets a dedicated presence room
pub const LIVE_PAGE_TYPE: &str = "live";

/// Raw tracking beacon as posted by the client script.
///
/// Every field is optional on the wire; which ones matter depends on
/// `action`, so this is only ever consumed through [`TrackingEvent`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackingRequest {
    pub action: String,
    pub visitor_id: String,
    pub session_id: String,
    pub page_path: String,
    pub page_type: String,
    pub reference_id: String,
    pub referrer: String,
    pub device_type: String,
    pub os: String,
    pub browser: String,
    pub screen_width: i64,
    pub screen_height: i64,
    pub language: String,
    pub duration: i64,
    pub status: String,
    pub event: String,
}

/// Client device classification reported by the tracker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_type: String,
    pub os: String,
    pub browser: String,
    pub screen_resolution: String,
    pub language: String,
}

/// Coarse location for an address
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeoLocation {
    pub country_code: String,
    pub country_name: String,
    pub city: String,
}

impl GeoLocation {
    /// Fixed tuple for loopback and private-range addresses
    pub fn local() -> Self {
        Self {
            country_code: "LOCAL".to_string(),
            country_name: "Local Network".to_string(),
            city: "Local".to_string(),
        }
    }

    /// Fallback when a lookup fails or times out
    pub fn unknown() -> Self {
        Self {
            country_code: String::new(),
            country_name: "Unknown".to_string(),
            city: String::new(),
        }
    }
}

/// Presence room key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey(String);

impl RoomKey {
    pub fn global() -> Self {
        Self(GLOBAL_ROOM.to_string())
    }

    /// Live content gets its own room, everything else shares the global one
    pub fn resolve(page_type: &str, reference_id: &str) -> Self {
        let reference_id = reference_id.trim();
        if page_type == LIVE_PAGE_TYPE && !reference_id.is_empty() {
            Self(format!("match_{reference_id}"))
        } else {
            Self::global()
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageView {
    pub visitor_id: String,
    pub session_id: String,
    pub page_path: String,
    pub page_type: String,
    pub reference_id: String,
    pub referrer: String,
    pub device: DeviceInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    /// Empty when the client sent none; presence is still recorded
    pub visitor_id: String,
    pub room: RoomKey,
    pub departing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leave {
    pub visitor_id: String,
    pub page_path: String,
    pub room: RoomKey,
    /// Seconds spent on the page
    pub duration: i64,
}

/// A decoded beacon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingEvent {
    PageView(PageView),
    Heartbeat(Heartbeat),
    Leave(Leave),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    PageView,
    Heartbeat,
    Leave,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PageView => "pageview",
            EventKind::Heartbeat => "heartbeat",
            EventKind::Leave => "leave",
        }
    }
}

impl TrackingEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TrackingEvent::PageView(_) => EventKind::PageView,
            TrackingEvent::Heartbeat(_) => EventKind::Heartbeat,
            TrackingEvent::Leave(_) => EventKind::Leave,
        }
    }
}

fn normalize_page_path(path: &str) -> String {
    let path = path.trim();
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

impl TryFrom<TrackingRequest> for TrackingEvent {
    type Error = TrackError;

    fn try_from(req: TrackingRequest) -> Result<Self, Self::Error> {
        match req.action.trim().to_lowercase().as_str() {
            "pageview" => {
                let screen_resolution = if req.screen_width > 0 && req.screen_height > 0 {
                    format!("{}x{}", req.screen_width, req.screen_height)
                } else {
                    String::new()
                };

                Ok(TrackingEvent::PageView(PageView {
                    visitor_id: req.visitor_id.trim().to_string(),
                    session_id: req.session_id,
                    page_path: normalize_page_path(&req.page_path),
                    page_type: req.page_type,
                    reference_id: req.reference_id,
                    referrer: req.referrer,
                    device: DeviceInfo {
                        device_type: req.device_type,
                        os: req.os,
                        browser: req.browser,
                        screen_resolution,
                        language: req.language,
                    },
                }))
            }
            "heartbeat" => {
                let departing = req.status == "leave" || req.event == "visibility_hidden";
                Ok(TrackingEvent::Heartbeat(Heartbeat {
                    visitor_id: req.visitor_id.trim().to_string(),
                    room: RoomKey::resolve(&req.page_type, &req.reference_id),
                    departing,
                }))
            }
            "leave" => Ok(TrackingEvent::Leave(Leave {
                visitor_id: req.visitor_id.trim().to_string(),
                page_path: normalize_page_path(&req.page_path),
                room: RoomKey::resolve(&req.page_type, &req.reference_id),
                duration: req.duration.max(0),
            })),
            _ => Err(TrackError::UnknownAction(req.action)),
        }
    }
}

/// A beacon together with the request context it arrived with
#[derive(Debug, Clone)]
pub struct Beacon {
    pub request: TrackingRequest,
    /// Declared client identity (User-Agent header)
    pub user_agent: Option<String>,
    /// Resolved client address
    pub client_address: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Bot,
}

impl IgnoreReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::Bot => "bot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Recorded(EventKind),
    Ignored(IgnoreReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(action: &str) -> TrackingRequest {
        TrackingRequest {
            action: action.to_string(),
            visitor_id: "v-1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_action_is_case_insensitive() {
        let event = TrackingEvent::try_from(request("PageView")).unwrap();
        assert_eq!(event.kind(), EventKind::PageView);
    }

    #[test]
    fn test_unknown_action_rejected() {
        let err = TrackingEvent::try_from(request("click")).unwrap_err();
        assert!(matches!(err, TrackError::UnknownAction(ref a) if a == "click"));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_missing_action_rejected() {
        let req: TrackingRequest = serde_json::from_str(r#"{"visitor_id":"v-1"}"#).unwrap();
        assert!(TrackingEvent::try_from(req).is_err());
    }

    #[test]
    fn test_pageview_defaults_empty_path_and_formats_screen() {
        let mut req = request("pageview");
        req.screen_width = 1920;
        req.screen_height = 1080;
        let TrackingEvent::PageView(view) = TrackingEvent::try_from(req).unwrap() else {
            panic!("expected a page view");
        };
        assert_eq!(view.page_path, "/");
        assert_eq!(view.device.screen_resolution, "1920x1080");
    }

    #[test]
    fn test_pageview_partial_screen_is_blank() {
        let mut req = request("pageview");
        req.screen_width = 1920;
        let TrackingEvent::PageView(view) = TrackingEvent::try_from(req).unwrap() else {
            panic!("expected a page view");
        };
        assert_eq!(view.device.screen_resolution, "");
    }

    #[test]
    fn test_blank_visitor_id_still_decodes() {
        let mut req = request("heartbeat");
        req.visitor_id = "  ".to_string();
        let TrackingEvent::Heartbeat(hb) = TrackingEvent::try_from(req).unwrap() else {
            panic!("expected a heartbeat");
        };
        assert_eq!(hb.visitor_id, "");
        assert_eq!(hb.room, RoomKey::global());

        let mut req = request("leave");
        req.visitor_id = String::new();
        let TrackingEvent::Leave(leave) = TrackingEvent::try_from(req).unwrap() else {
            panic!("expected a leave");
        };
        assert_eq!(leave.visitor_id, "");
    }

    #[test]
    fn test_heartbeat_departure_signals() {
        let mut req = request("heartbeat");
        req.status = "leave".to_string();
        let TrackingEvent::Heartbeat(hb) = TrackingEvent::try_from(req).unwrap() else {
            panic!("expected a heartbeat");
        };
        assert!(hb.departing);

        let mut req = request("heartbeat");
        req.event = "visibility_hidden".to_string();
        let TrackingEvent::Heartbeat(hb) = TrackingEvent::try_from(req).unwrap() else {
            panic!("expected a heartbeat");
        };
        assert!(hb.departing);

        let TrackingEvent::Heartbeat(hb) = TrackingEvent::try_from(request("heartbeat")).unwrap()
        else {
            panic!("expected a heartbeat");
        };
        assert!(!hb.departing);
    }

    #[test]
    fn test_room_resolution() {
        assert_eq!(RoomKey::resolve("live", "42").as_str(), "match_42");
        assert_eq!(RoomKey::resolve("live", "").as_str(), GLOBAL_ROOM);
        assert_eq!(RoomKey::resolve("article", "42").as_str(), GLOBAL_ROOM);
    }

    #[test]
    fn test_leave_clamps_negative_duration() {
        let mut req = request("leave");
        req.duration = -5;
        let TrackingEvent::Leave(leave) = TrackingEvent::try_from(req).unwrap() else {
            panic!("expected a leave");
        };
        assert_eq!(leave.duration, 0);
        assert_eq!(leave.page_path, "/");
    }
}
