use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured error body returned by the homeserver on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespError {
    /// Machine-readable code, for example `M_LIMIT_EXCEEDED`.
    pub errcode: String,
    /// Human-readable message.
    #[serde(default)]
    pub error: String,
    /// Rate-limit hint sent alongside `M_LIMIT_EXCEEDED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl fmt::Display for RespError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.errcode, self.error)
    }
}

/// A single Matrix event as delivered by `/sync` and `/messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Event {
    /// State key; only present on state events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    #[serde(default)]
    pub sender: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Origin server timestamp in milliseconds.
    #[serde(default, rename = "origin_server_ts")]
    pub timestamp: i64,
    #[serde(default, rename = "event_id")]
    pub id: String,
    /// Absent on events that are not room-scoped (presence, account data).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub room_id: String,
    /// Redacted event id on `m.room.redaction` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacts: Option<String>,
    #[serde(default)]
    pub unsigned: Map<String, Value>,
    #[serde(default)]
    pub content: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_content: Option<Map<String, Value>>,
}

impl Event {
    /// `content.body`, when present and a string.
    pub fn body(&self) -> Option<&str> {
        self.content.get("body").and_then(Value::as_str)
    }

    /// `content.msgtype`, when present and a string.
    pub fn message_type(&self) -> Option<&str> {
        self.content.get("msgtype").and_then(Value::as_str)
    }

    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }
}

/// Wrapper object the sync API uses around every event list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EventList {
    #[serde(default)]
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Timeline {
    #[serde(default)]
    pub events: Vec<Event>,
    /// Set when the server skipped events between batches.
    #[serde(default)]
    pub limited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_batch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct JoinedRoom {
    #[serde(default)]
    pub state: EventList,
    #[serde(default)]
    pub timeline: Timeline,
    #[serde(default)]
    pub ephemeral: EventList,
    #[serde(default)]
    pub account_data: EventList,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InvitedRoom {
    #[serde(default)]
    pub invite_state: EventList,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LeftRoom {
    #[serde(default)]
    pub state: EventList,
    #[serde(default)]
    pub timeline: Timeline,
}

/// Per-membership room sections of a sync batch, keyed by room id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SyncRooms {
    #[serde(default)]
    pub join: BTreeMap<String, JoinedRoom>,
    #[serde(default)]
    pub invite: BTreeMap<String, InvitedRoom>,
    #[serde(default)]
    pub leave: BTreeMap<String, LeftRoom>,
}

/// Decoded `/sync` response: one batch of the event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SyncResponse {
    /// Continuation token for the next long-poll.
    pub next_batch: String,
    #[serde(default)]
    pub account_data: EventList,
    #[serde(default)]
    pub presence: EventList,
    #[serde(default)]
    pub rooms: SyncRooms,
}

impl SyncResponse {
    /// Number of events carried by this batch across all sections.
    pub fn event_count(&self) -> usize {
        let rooms = &self.rooms;
        self.account_data.events.len()
            + self.presence.events.len()
            + rooms
                .join
                .values()
                .map(|room| {
                    room.state.events.len()
                        + room.timeline.events.len()
                        + room.ephemeral.events.len()
                        + room.account_data.events.len()
                })
                .sum::<usize>()
            + rooms
                .invite
                .values()
                .map(|room| room.invite_state.events.len())
                .sum::<usize>()
            + rooms
                .leave
                .values()
                .map(|room| room.state.events.len() + room.timeline.events.len())
                .sum::<usize>()
    }
}

/// Query parameters of one long-poll `/sync` call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncParams {
    /// Server-side wait bound in milliseconds.
    pub timeout_ms: u64,
    /// Continuation token; `None` starts from the live tail.
    pub since: Option<String>,
    pub filter_id: Option<String>,
    pub full_state: bool,
    /// Presence hint, for example `offline` or `unavailable`.
    pub set_presence: Option<String>,
}

impl SyncParams {
    /// Render as ordered query pairs; empty optional values are omitted.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("timeout", self.timeout_ms.to_string())];
        if let Some(since) = self.since.as_deref().filter(|s| !s.is_empty()) {
            pairs.push(("since", since.to_owned()));
        }
        if let Some(filter) = self.filter_id.as_deref().filter(|f| !f.is_empty()) {
            pairs.push(("filter", filter.to_owned()));
        }
        if let Some(presence) = self.set_presence.as_deref().filter(|p| !p.is_empty()) {
            pairs.push(("set_presence", presence.to_owned()));
        }
        if self.full_state {
            pairs.push(("full_state", "true".to_owned()));
        }
        pairs
    }
}

/// Response of `POST /user/{userId}/filter`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespCreateFilter {
    pub filter_id: String,
}

/// Room membership section an event was delivered under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Membership {
    Join,
    Invite,
    Leave,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_sparse_sync_batch() {
        let batch: SyncResponse = serde_json::from_value(json!({
            "next_batch": "s72595_4483_1934",
            "rooms": {
                "join": {
                    "!cur:example.org": {
                        "timeline": {
                            "events": [{
                                "type": "m.room.message",
                                "sender": "@alice:example.org",
                                "event_id": "$1",
                                "origin_server_ts": 1432735824653_i64,
                                "content": { "msgtype": "m.text", "body": "hi" }
                            }],
                            "limited": true,
                            "prev_batch": "t34-23535_0_0"
                        }
                    }
                }
            }
        }))
        .expect("sync batch should decode");

        assert_eq!(batch.next_batch, "s72595_4483_1934");
        let room = &batch.rooms.join["!cur:example.org"];
        assert!(room.timeline.limited);
        assert_eq!(room.timeline.events[0].body(), Some("hi"));
        assert_eq!(room.timeline.events[0].message_type(), Some("m.text"));
        assert_eq!(batch.event_count(), 1);
    }

    #[test]
    fn body_helpers_reject_non_string_values() {
        let event: Event = serde_json::from_value(json!({
            "type": "m.room.message",
            "content": { "body": 5, "msgtype": null }
        }))
        .expect("event should decode");

        assert_eq!(event.body(), None);
        assert_eq!(event.message_type(), None);
        assert!(!event.is_state());
    }

    #[test]
    fn decodes_rate_limit_error_body() {
        let err: RespError = serde_json::from_str(
            r#"{"errcode":"M_LIMIT_EXCEEDED","error":"too fast","retry_after_ms":2000}"#,
        )
        .expect("error body should decode");
        assert_eq!(err.errcode, "M_LIMIT_EXCEEDED");
        assert_eq!(err.retry_after_ms, Some(2000));
        assert_eq!(err.to_string(), "M_LIMIT_EXCEEDED: too fast");
    }

    #[test]
    fn sync_params_omit_empty_values() {
        let params = SyncParams {
            timeout_ms: 30_000,
            since: Some(String::new()),
            filter_id: Some("f1".to_owned()),
            full_state: false,
            set_presence: None,
        };
        assert_eq!(
            params.query_pairs(),
            vec![
                ("timeout", "30000".to_owned()),
                ("filter", "f1".to_owned())
            ]
        );

        let params = SyncParams {
            since: Some("s9".to_owned()),
            full_state: true,
            set_presence: Some("offline".to_owned()),
            ..params
        };
        let keys: Vec<_> = params.query_pairs().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec!["timeout", "since", "filter", "set_presence", "full_state"]
        );
    }
}
