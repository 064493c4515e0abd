//! Request and response bodies of the client-server endpoints.

use std::{collections::BTreeMap, sync::LazyLock};

use mxsync_core::Event;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const LOGIN_PASSWORD: &str = "m.login.password";
pub const LOGIN_DUMMY: &str = "m.login.dummy";
pub const HTML_FORMAT: &str = "org.matrix.custom.html";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReqRegister {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_device_display_name: Option<String>,
    #[serde(default)]
    pub inhibit_login: bool,
    /// Interactive-auth stage being completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl UserIdentifier {
    pub fn user(user: impl Into<String>) -> Self {
        Self {
            kind: "m.id.user".to_owned(),
            user: Some(user.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReqLogin {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<UserIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_device_display_name: Option<String>,
}

impl ReqLogin {
    /// `m.login.password` with a user identifier.
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            kind: LOGIN_PASSWORD.to_owned(),
            identifier: Some(UserIdentifier::user(user)),
            password: Some(password.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReqCreateRoom {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_alias_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invite: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invite_3pid: Vec<ReqInvite3Pid>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub creation_content: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initial_state: Vec<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_direct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReqInvite3Pid {
    pub id_server: String,
    pub medium: String,
    pub address: String,
}

/// Body of the invite, kick, ban and unban endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReqMembership {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReqMembership {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReqRedact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReqTyping {
    pub typing: bool,
    /// Milliseconds.
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReqAccountPassword {
    pub new_password: String,
    #[serde(default)]
    pub logout_devices: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReqDeactivate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReqUserDirectorySearch {
    pub search_term: String,
    pub limit: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespRegister {
    pub user_id: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub home_server: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UiaFlow {
    #[serde(default)]
    pub stages: Vec<String>,
}

/// 401 body of endpoints protected by interactive authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RespUserInteractive {
    #[serde(default)]
    pub flows: Vec<UiaFlow>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub errcode: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RespUserInteractive {
    /// Whether some flow consists of exactly `stage`.
    pub fn has_single_stage_flow(&self, stage: &str) -> bool {
        self.flows
            .iter()
            .any(|flow| flow.stages.len() == 1 && flow.stages[0] == stage)
    }
}

/// Result of a registration attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    Registered(RespRegister),
    /// The homeserver wants another interactive-auth stage completed.
    AuthRequired(RespUserInteractive),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespLogin {
    pub user_id: String,
    pub access_token: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub home_server: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespVersions {
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub unstable_features: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespWhoAmI {
    pub user_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespAvailable {
    pub available: bool,
}

/// Response of room creation and join.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespRoomId {
    pub room_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespSendEvent {
    pub event_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespJoinedRooms {
    #[serde(default)]
    pub joined_rooms: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinedMember {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespJoinedMembers {
    #[serde(default)]
    pub joined: BTreeMap<String, JoinedMember>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RespMembers {
    #[serde(default)]
    pub chunk: Vec<Event>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RespMessages {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub chunk: Vec<Event>,
    #[serde(default)]
    pub end: Option<String>,
}

/// Pagination direction of `/messages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "f",
            Direction::Backward => "b",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespUserDisplayName {
    #[serde(default)]
    pub displayname: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespAvatarUrl {
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespUserStatus {
    pub presence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_ago: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currently_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespRoomAlias {
    pub room_id: String,
    #[serde(default)]
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicRoom {
    pub room_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub canonical_alias: Option<String>,
    #[serde(default)]
    pub num_joined_members: u64,
    #[serde(default)]
    pub world_readable: bool,
    #[serde(default)]
    pub guest_can_join: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespPublicRooms {
    #[serde(default)]
    pub chunk: Vec<PublicRoom>,
    #[serde(default)]
    pub next_batch: Option<String>,
    #[serde(default)]
    pub prev_batch: Option<String>,
    #[serde(default)]
    pub total_room_count_estimate: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub device_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub last_seen_ip: Option<String>,
    #[serde(default)]
    pub last_seen_ts: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespGetDevices {
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserDirectoryEntry {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespUserDirectorySearch {
    #[serde(default)]
    pub limited: bool,
    #[serde(default)]
    pub results: Vec<UserDirectoryEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespMediaUpload {
    pub content_uri: String,
}

/// `m.text`, `m.notice` and formatted text content.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextMessage {
    pub msgtype: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_body: Option<String>,
}

impl TextMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            msgtype: "m.text".to_owned(),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn notice(body: impl Into<String>) -> Self {
        Self {
            msgtype: "m.notice".to_owned(),
            ..Self::text(body)
        }
    }

    pub fn html(body: impl Into<String>, formatted_body: impl Into<String>) -> Self {
        Self {
            format: Some(HTML_FORMAT.to_owned()),
            formatted_body: Some(formatted_body.into()),
            ..Self::text(body)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageInfo {
    #[serde(default, rename = "h", skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, rename = "w", skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageMessage {
    pub msgtype: String,
    pub body: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<ImageInfo>,
}

impl ImageMessage {
    pub fn new(body: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            msgtype: "m.image".to_owned(),
            body: body.into(),
            url: url.into(),
            info: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_info: Option<ImageInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, rename = "h", skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, rename = "w", skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoMessage {
    pub msgtype: String,
    pub body: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<VideoInfo>,
}

impl VideoMessage {
    pub fn new(body: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            msgtype: "m.video".to_owned(),
            body: body.into(),
            url: url.into(),
            info: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    /// Bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMessage {
    pub msgtype: String,
    pub body: String,
    pub url: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<FileInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_info: Option<ImageInfo>,
}

impl FileMessage {
    pub fn new(
        body: impl Into<String>,
        url: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            msgtype: "m.file".to_owned(),
            body: body.into(),
            url: url.into(),
            filename: filename.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioMessage {
    pub msgtype: String,
    pub body: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<AudioInfo>,
}

impl AudioMessage {
    pub fn new(body: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            msgtype: "m.audio".to_owned(),
            body: body.into(),
            url: url.into(),
            info: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocationMessage {
    pub msgtype: String,
    pub body: String,
    /// `geo:` URI, for example `geo:51.5008,0.1247`.
    pub geo_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_info: Option<ImageInfo>,
}

impl LocationMessage {
    pub fn new(body: impl Into<String>, geo_uri: impl Into<String>) -> Self {
        Self {
            msgtype: "m.location".to_owned(),
            body: body.into(),
            geo_uri: geo_uri.into(),
            ..Self::default()
        }
    }
}

/// Formatted message whose plain `body` is derived from the HTML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HtmlMessage {
    pub msgtype: String,
    pub body: String,
    pub format: String,
    pub formatted_body: String,
}

impl HtmlMessage {
    pub fn from_html(msgtype: impl Into<String>, html: impl Into<String>) -> Self {
        let formatted_body = html.into();
        Self {
            msgtype: msgtype.into(),
            body: html_to_text(&formatted_body),
            format: HTML_FORMAT.to_owned(),
            formatted_body,
        }
    }
}

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("<[^<]+?>").expect("tag pattern is valid"));

/// Plain-text rendition of an HTML fragment: tags removed, entities decoded.
pub fn html_to_text(html: &str) -> String {
    unescape_entities(&HTML_TAG.replace_all(html, ""))
}

fn unescape_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail
            .find(';')
            .and_then(|end| decode_entity(&tail[1..end]).map(|ch| (ch, end)));
        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPowerLevels {
    #[serde(default)]
    pub room: i64,
}

/// Content of `m.room.power_levels`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PowerLevels {
    #[serde(default)]
    pub ban: i64,
    #[serde(default)]
    pub invite: i64,
    #[serde(default)]
    pub kick: i64,
    #[serde(default)]
    pub redact: i64,
    #[serde(default)]
    pub events: BTreeMap<String, i64>,
    #[serde(default)]
    pub users: BTreeMap<String, i64>,
    #[serde(default)]
    pub notifications: NotificationPowerLevels,
    #[serde(default)]
    pub events_default: i64,
    #[serde(default)]
    pub state_default: i64,
    #[serde(default)]
    pub users_default: i64,
}

impl PowerLevels {
    pub fn user_level(&self, user_id: &str) -> i64 {
        self.users
            .get(user_id)
            .copied()
            .unwrap_or(self.users_default)
    }
}

/// Body of the three `.../email/requestToken` endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReqEmailRequestToken {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_access_token: Option<String>,
    pub client_secret: String,
    pub email: String,
    pub send_attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespEmailRequestToken {
    pub sid: String,
    #[serde(default)]
    pub submit_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreePidCreds {
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_access_token: Option<String>,
    pub id_server: String,
    pub sid: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReqPostThreePid {
    pub three_pid_creds: ThreePidCreds,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThirdPartyIdentifier {
    pub medium: String,
    pub address: String,
    #[serde(default)]
    pub validated_at: i64,
    #[serde(default)]
    pub added_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespGetThreePid {
    #[serde(default)]
    pub threepids: Vec<ThirdPartyIdentifier>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespTurnServer {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub uris: Vec<String>,
    /// Seconds the credentials stay valid.
    #[serde(default)]
    pub ttl: u64,
}

/// Query of `GET /rooms/{roomId}/hierarchy`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReqHierarchy {
    pub room_id: String,
    pub suggested_only: bool,
    pub limit: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HierarchyRoom {
    pub room_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub canonical_alias: Option<String>,
    #[serde(default)]
    pub room_type: Option<String>,
    #[serde(default)]
    pub num_joined_members: u64,
    #[serde(default)]
    pub world_readable: bool,
    #[serde(default)]
    pub guest_can_join: bool,
    /// Stripped `m.space.child` events.
    #[serde(default)]
    pub children_state: Vec<Event>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RespHierarchy {
    #[serde(default)]
    pub rooms: Vec<HierarchyRoom>,
    #[serde(default)]
    pub next_batch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicRoomsFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic_search_term: Option<String>,
}

/// Body of `POST /publicRooms`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReqPublicRoomsFiltered {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<PublicRoomsFilter>,
}
