//! Endpoint methods. Each one builds a URL and performs one exchange.

use std::time::Duration;

use mxsync_core::{RespCreateFilter, SyncParams, SyncResponse};
use reqwest::Method;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::{
    client::{Body, Client, decode_response, txn_id},
    error::ClientError,
    payloads::{
        Direction, ImageMessage, LOGIN_DUMMY, PowerLevels, PublicRoomsFilter, RegisterOutcome,
        ReqAccountPassword, ReqCreateRoom, ReqDeactivate, ReqEmailRequestToken, ReqHierarchy,
        ReqInvite3Pid, ReqLogin, ReqMembership, ReqPostThreePid, ReqPublicRoomsFiltered,
        ReqRedact, ReqRegister, ReqTyping, ReqUserDirectorySearch, RespAvailable, RespAvatarUrl,
        RespEmailRequestToken, RespGetDevices, RespGetThreePid, RespHierarchy, RespJoinedMembers,
        RespJoinedRooms, RespLogin, RespMediaUpload, RespMembers, RespMessages, RespPublicRooms,
        RespRegister, RespRoomAlias, RespRoomId, RespSendEvent, RespTurnServer,
        RespUserDirectorySearch, RespUserDisplayName, RespUserInteractive, RespUserStatus,
        RespVersions, RespWhoAmI, TextMessage, VideoMessage,
    },
};

const NO_BODY: Option<&()> = None;
const MEDIA_UPLOAD_PATH: [&str; 4] = ["_matrix", "media", "r0", "upload"];

fn empty_object() -> Value {
    json!({})
}

impl Client {
    pub async fn create_filter(
        &self,
        user_id: &str,
        filter: &Value,
    ) -> Result<RespCreateFilter, ClientError> {
        let url = self.build_url(&["user", user_id, "filter"])?;
        self.make_request(Method::POST, url, Some(filter)).await
    }

    /// One long-poll `/sync` exchange.
    pub async fn sync_request(&self, params: &SyncParams) -> Result<SyncResponse, ClientError> {
        let url = self.build_url_with_query(&["sync"], params.query_pairs())?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    pub async fn login(&self, req: &ReqLogin) -> Result<RespLogin, ClientError> {
        let url = self.build_url(&["login"])?;
        self.make_request(Method::POST, url, Some(req)).await
    }

    /// Invalidate the current access token. Credentials on this client are kept.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let url = self.build_url(&["logout"])?;
        self.make_request_no_content(Method::POST, url, Some(&empty_object()))
            .await
    }

    pub async fn logout_all(&self) -> Result<(), ClientError> {
        let url = self.build_url(&["logout/all"])?;
        self.make_request_no_content(Method::POST, url, Some(&empty_object()))
            .await
    }

    /// Register with `kind=user`.
    pub async fn register(&self, req: &ReqRegister) -> Result<RegisterOutcome, ClientError> {
        let url = self.build_url(&["register"])?;
        self.register_at(url, req).await
    }

    pub async fn register_guest(&self, req: &ReqRegister) -> Result<RegisterOutcome, ClientError> {
        let url = self.build_url_with_query(&["register"], [("kind", "guest")])?;
        self.register_at(url, req).await
    }

    /// Register, completing a single-stage `m.login.dummy` flow if offered.
    ///
    /// Credentials on this client are not updated.
    pub async fn register_dummy(&self, req: &ReqRegister) -> Result<RespRegister, ClientError> {
        let uia = match self.register(req).await? {
            RegisterOutcome::Registered(resp) => return Ok(resp),
            RegisterOutcome::AuthRequired(uia) => uia,
        };

        if !uia.has_single_stage_flow(LOGIN_DUMMY) {
            return Err(ClientError::InvalidRequest(
                "registration failed: homeserver does not offer m.login.dummy".to_owned(),
            ));
        }

        let mut auth = json!({ "type": LOGIN_DUMMY });
        if let Some(session) = uia.session.as_deref() {
            auth["session"] = Value::from(session);
        }
        let retry = ReqRegister {
            auth: Some(auth),
            ..req.clone()
        };

        match self.register(&retry).await? {
            RegisterOutcome::Registered(resp) => Ok(resp),
            RegisterOutcome::AuthRequired(_) => Err(ClientError::InvalidRequest(
                "registration failed: m.login.dummy was not accepted".to_owned(),
            )),
        }
    }

    async fn register_at(
        &self,
        url: Url,
        req: &ReqRegister,
    ) -> Result<RegisterOutcome, ClientError> {
        match self
            .make_request::<_, RespRegister>(Method::POST, url, Some(req))
            .await
        {
            Ok(resp) => Ok(RegisterOutcome::Registered(resp)),
            Err(ClientError::Http(err)) if err.status() == 401 => {
                let contents = err.contents().unwrap_or_default();
                serde_json::from_slice::<RespUserInteractive>(contents)
                    .map(RegisterOutcome::AuthRequired)
                    .map_err(|source| ClientError::Decode {
                        method: Method::POST,
                        path: err.path().to_owned(),
                        source,
                    })
            }
            Err(err) => Err(err),
        }
    }

    pub async fn versions(&self) -> Result<RespVersions, ClientError> {
        let url = self.build_base_url(&["_matrix", "client", "versions"])?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    pub async fn whoami(&self) -> Result<RespWhoAmI, ClientError> {
        let url = self.build_url(&["account", "whoami"])?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    /// Whether `username` is free to register.
    pub async fn available(&self, username: &str) -> Result<bool, ClientError> {
        let url = self.build_url_with_query(&["register", "available"], [("username", username)])?;
        let resp: RespAvailable = self.make_request(Method::GET, url, NO_BODY).await?;
        Ok(resp.available)
    }

    pub async fn deactivate(&self, req: &ReqDeactivate) -> Result<(), ClientError> {
        let url = self.build_url(&["account", "deactivate"])?;
        self.make_request_no_content(Method::POST, url, Some(req))
            .await
    }

    pub async fn account_password(&self, req: &ReqAccountPassword) -> Result<(), ClientError> {
        let url = self.build_url(&["account", "password"])?;
        self.make_request_no_content(Method::POST, url, Some(req))
            .await
    }

    /// Ask the homeserver to email a validation token for binding `email`.
    pub async fn account_3pid_email_request_token(
        &self,
        req: &ReqEmailRequestToken,
    ) -> Result<RespEmailRequestToken, ClientError> {
        let url = self.build_url(&["account", "3pid", "email", "requestToken"])?;
        self.make_request(Method::POST, url, Some(req)).await
    }

    pub async fn register_email_request_token(
        &self,
        req: &ReqEmailRequestToken,
    ) -> Result<RespEmailRequestToken, ClientError> {
        let url = self.build_url(&["register", "email", "requestToken"])?;
        self.make_request(Method::POST, url, Some(req)).await
    }

    pub async fn password_email_request_token(
        &self,
        req: &ReqEmailRequestToken,
    ) -> Result<RespEmailRequestToken, ClientError> {
        let url = self.build_url(&["account", "password", "email", "requestToken"])?;
        self.make_request(Method::POST, url, Some(req)).await
    }

    /// Third-party identifiers bound to the account.
    pub async fn get_three_pid(&self) -> Result<RespGetThreePid, ClientError> {
        let url = self.build_url(&["account", "3pid"])?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    pub async fn post_three_pid(&self, req: &ReqPostThreePid) -> Result<(), ClientError> {
        let url = self.build_url(&["account", "3pid"])?;
        self.make_request_no_content(Method::POST, url, Some(req))
            .await
    }

    pub async fn turn_server(&self) -> Result<RespTurnServer, ClientError> {
        let url = self.build_url(&["voip", "turnServer"])?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    pub async fn create_room(&self, req: &ReqCreateRoom) -> Result<RespRoomId, ClientError> {
        let url = self.build_url(&["createRoom"])?;
        self.make_request(Method::POST, url, Some(req)).await
    }

    /// Join by room id or alias, optionally routing through `server_name`.
    pub async fn join_room(
        &self,
        room_id_or_alias: &str,
        server_name: Option<&str>,
        content: Option<&Value>,
    ) -> Result<RespRoomId, ClientError> {
        let segments = ["join", room_id_or_alias];
        let url = match server_name.filter(|name| !name.is_empty()) {
            Some(server_name) => {
                self.build_url_with_query(&segments, [("server_name", server_name)])?
            }
            None => self.build_url(&segments)?,
        };
        let empty = empty_object();
        self.make_request(Method::POST, url, Some(content.unwrap_or(&empty)))
            .await
    }

    pub async fn leave_room(&self, room_id: &str) -> Result<(), ClientError> {
        self.room_post(room_id, "leave", &empty_object()).await
    }

    pub async fn forget_room(&self, room_id: &str) -> Result<(), ClientError> {
        self.room_post(room_id, "forget", &empty_object()).await
    }

    pub async fn invite_user(&self, room_id: &str, req: &ReqMembership) -> Result<(), ClientError> {
        self.room_post(room_id, "invite", req).await
    }

    /// Invite by email or another third-party identifier.
    pub async fn invite_user_by_third_party(
        &self,
        room_id: &str,
        req: &ReqInvite3Pid,
    ) -> Result<(), ClientError> {
        self.room_post(room_id, "invite", req).await
    }

    pub async fn kick_user(&self, room_id: &str, req: &ReqMembership) -> Result<(), ClientError> {
        self.room_post(room_id, "kick", req).await
    }

    pub async fn ban_user(&self, room_id: &str, req: &ReqMembership) -> Result<(), ClientError> {
        self.room_post(room_id, "ban", req).await
    }

    pub async fn unban_user(&self, room_id: &str, req: &ReqMembership) -> Result<(), ClientError> {
        self.room_post(room_id, "unban", req).await
    }

    async fn room_post<B: Serialize + ?Sized>(
        &self,
        room_id: &str,
        action: &str,
        body: &B,
    ) -> Result<(), ClientError> {
        let url = self.build_url(&["rooms", room_id, action])?;
        self.make_request_no_content(Method::POST, url, Some(body))
            .await
    }

    pub async fn user_typing(
        &self,
        room_id: &str,
        typing: bool,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let user_id = self.require_user_id()?;
        let url = self.build_url(&["rooms", room_id, "typing", user_id.as_str()])?;
        let req = ReqTyping {
            typing,
            timeout: timeout.as_millis() as u64,
        };
        self.make_request_no_content(Method::PUT, url, Some(&req))
            .await
    }

    pub async fn joined_rooms(&self) -> Result<RespJoinedRooms, ClientError> {
        let url = self.build_url(&["joined_rooms"])?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    pub async fn joined_members(&self, room_id: &str) -> Result<RespJoinedMembers, ClientError> {
        let url = self.build_url(&["rooms", room_id, "joined_members"])?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    /// Member events of a room, optionally only those with `membership`
    /// (`join`, `invite`, `leave`, `ban`).
    pub async fn members(
        &self,
        room_id: &str,
        membership: Option<&str>,
    ) -> Result<RespMembers, ClientError> {
        let query = membership.map(|membership| ("membership", membership));
        let url = self.build_url_with_query(&["rooms", room_id, "members"], query)?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    pub async fn messages(
        &self,
        room_id: &str,
        from: &str,
        to: Option<&str>,
        dir: Direction,
        limit: Option<u32>,
    ) -> Result<RespMessages, ClientError> {
        let mut query = vec![("from", from.to_owned()), ("dir", dir.as_str().to_owned())];
        if let Some(to) = to.filter(|to| !to.is_empty()) {
            query.push(("to", to.to_owned()));
        }
        if let Some(limit) = limit.filter(|limit| *limit > 0) {
            query.push(("limit", limit.to_string()));
        }
        let url = self.build_url_with_query(&["rooms", room_id, "messages"], query)?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    /// Content of one state event, decoded into `R`.
    pub async fn state_event<R: DeserializeOwned>(
        &self,
        room_id: &str,
        event_type: &str,
        state_key: &str,
    ) -> Result<R, ClientError> {
        let url = self.build_url(&["rooms", room_id, "state", event_type, state_key])?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    pub async fn send_state_event<C: Serialize + ?Sized>(
        &self,
        room_id: &str,
        event_type: &str,
        state_key: &str,
        content: &C,
    ) -> Result<RespSendEvent, ClientError> {
        let url = self.build_url(&["rooms", room_id, "state", event_type, state_key])?;
        self.make_request(Method::PUT, url, Some(content)).await
    }

    pub async fn power_levels(&self, room_id: &str) -> Result<PowerLevels, ClientError> {
        self.state_event(room_id, "m.room.power_levels", "").await
    }

    pub async fn send_power_levels(
        &self,
        room_id: &str,
        levels: &PowerLevels,
    ) -> Result<RespSendEvent, ClientError> {
        self.send_state_event(room_id, "m.room.power_levels", "", levels)
            .await
    }

    /// One page of the space tree rooted at `req.room_id`.
    pub async fn hierarchy(&self, req: &ReqHierarchy) -> Result<RespHierarchy, ClientError> {
        let query = [
            ("suggested_only", req.suggested_only.to_string()),
            ("limit", req.limit.to_string()),
        ];
        let url =
            self.build_url_with_query(&["rooms", req.room_id.as_str(), "hierarchy"], query)?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    /// Send a message event under a fresh transaction id.
    pub async fn send_message_event<C: Serialize + ?Sized>(
        &self,
        room_id: &str,
        event_type: &str,
        content: &C,
    ) -> Result<RespSendEvent, ClientError> {
        let txn_id = txn_id();
        let url = self.build_url(&["rooms", room_id, "send", event_type, txn_id.as_str()])?;
        debug!(room_id, event_type, %txn_id, "sending message event");
        self.make_request(Method::PUT, url, Some(content)).await
    }

    pub async fn send_text(&self, room_id: &str, text: &str) -> Result<RespSendEvent, ClientError> {
        self.send_message_event(room_id, "m.room.message", &TextMessage::text(text))
            .await
    }

    pub async fn send_notice(
        &self,
        room_id: &str,
        text: &str,
    ) -> Result<RespSendEvent, ClientError> {
        self.send_message_event(room_id, "m.room.message", &TextMessage::notice(text))
            .await
    }

    /// Send `text` with an HTML rendition. The plain body is sent as given.
    pub async fn send_formatted_text(
        &self,
        room_id: &str,
        text: &str,
        formatted: &str,
    ) -> Result<RespSendEvent, ClientError> {
        self.send_message_event(room_id, "m.room.message", &TextMessage::html(text, formatted))
            .await
    }

    pub async fn send_image(
        &self,
        room_id: &str,
        body: &str,
        content_uri: &str,
    ) -> Result<RespSendEvent, ClientError> {
        self.send_message_event(
            room_id,
            "m.room.message",
            &ImageMessage::new(body, content_uri),
        )
        .await
    }

    pub async fn send_video(
        &self,
        room_id: &str,
        body: &str,
        content_uri: &str,
    ) -> Result<RespSendEvent, ClientError> {
        self.send_message_event(
            room_id,
            "m.room.message",
            &VideoMessage::new(body, content_uri),
        )
        .await
    }

    pub async fn redact_event(
        &self,
        room_id: &str,
        event_id: &str,
        req: &ReqRedact,
    ) -> Result<RespSendEvent, ClientError> {
        let txn_id = txn_id();
        let url = self.build_url(&["rooms", room_id, "redact", event_id, txn_id.as_str()])?;
        self.make_request(Method::PUT, url, Some(req)).await
    }

    pub async fn mark_read(&self, room_id: &str, event_id: &str) -> Result<(), ClientError> {
        let url = self.build_url(&["rooms", room_id, "receipt", "m.read", event_id])?;
        self.make_request_no_content(Method::POST, url, Some(&empty_object()))
            .await
    }

    pub async fn room_alias(&self, alias: &str) -> Result<RespRoomAlias, ClientError> {
        let url = self.build_url(&["directory", "room", alias])?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    pub async fn public_rooms(
        &self,
        limit: Option<u32>,
        since: Option<&str>,
        server: Option<&str>,
    ) -> Result<RespPublicRooms, ClientError> {
        let mut query = Vec::new();
        if let Some(limit) = limit.filter(|limit| *limit > 0) {
            query.push(("limit", limit.to_string()));
        }
        if let Some(since) = since.filter(|since| !since.is_empty()) {
            query.push(("since", since.to_owned()));
        }
        if let Some(server) = server.filter(|server| !server.is_empty()) {
            query.push(("server", server.to_owned()));
        }
        let url = self.build_url_with_query(&["publicRooms"], query)?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    /// Search the room directory. `server` selects a remote directory.
    pub async fn public_rooms_filtered(
        &self,
        limit: Option<u32>,
        since: Option<&str>,
        server: Option<&str>,
        search_term: Option<&str>,
    ) -> Result<RespPublicRooms, ClientError> {
        let req = ReqPublicRoomsFiltered {
            limit: limit.filter(|limit| *limit > 0),
            since: since.filter(|since| !since.is_empty()).map(str::to_owned),
            filter: search_term
                .filter(|term| !term.is_empty())
                .map(|term| PublicRoomsFilter {
                    generic_search_term: Some(term.to_owned()),
                }),
        };
        let query = server
            .filter(|server| !server.is_empty())
            .map(|server| ("server", server));
        let url = self.build_url_with_query(&["publicRooms"], query)?;
        self.make_request(Method::POST, url, Some(&req)).await
    }

    pub async fn get_display_name(
        &self,
        user_id: &str,
    ) -> Result<RespUserDisplayName, ClientError> {
        let url = self.build_url(&["profile", user_id, "displayname"])?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    pub async fn get_own_display_name(&self) -> Result<RespUserDisplayName, ClientError> {
        let user_id = self.require_user_id()?;
        self.get_display_name(&user_id).await
    }

    pub async fn set_display_name(&self, display_name: &str) -> Result<(), ClientError> {
        let user_id = self.require_user_id()?;
        let url = self.build_url(&["profile", user_id.as_str(), "displayname"])?;
        let body = json!({ "displayname": display_name });
        self.make_request_no_content(Method::PUT, url, Some(&body))
            .await
    }

    /// Avatar of the logged-in user, if one is set.
    pub async fn get_avatar_url(&self) -> Result<Option<String>, ClientError> {
        let user_id = self.require_user_id()?;
        let url = self.build_url(&["profile", user_id.as_str(), "avatar_url"])?;
        let resp: RespAvatarUrl = self.make_request(Method::GET, url, NO_BODY).await?;
        Ok(resp.avatar_url)
    }

    pub async fn set_avatar_url(&self, avatar_url: &str) -> Result<(), ClientError> {
        let user_id = self.require_user_id()?;
        let url = self.build_url(&["profile", user_id.as_str(), "avatar_url"])?;
        self.make_request_no_content(Method::PUT, url, Some(&json!({ "avatar_url": avatar_url })))
            .await
    }

    pub async fn get_status(&self, user_id: &str) -> Result<RespUserStatus, ClientError> {
        let url = self.build_url(&["presence", user_id, "status"])?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    pub async fn get_own_status(&self) -> Result<RespUserStatus, ClientError> {
        let user_id = self.require_user_id()?;
        self.get_status(&user_id).await
    }

    pub async fn set_status(&self, presence: &str, status_msg: &str) -> Result<(), ClientError> {
        let user_id = self.require_user_id()?;
        let url = self.build_url(&["presence", user_id.as_str(), "status"])?;
        let body = json!({ "presence": presence, "status_msg": status_msg });
        self.make_request_no_content(Method::PUT, url, Some(&body))
            .await
    }

    /// Global account data of type `data_type` for the logged-in user.
    pub async fn get_account_data(&self, data_type: &str) -> Result<Value, ClientError> {
        let user_id = self.require_user_id()?;
        let url = self.build_url(&["user", user_id.as_str(), "account_data", data_type])?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    pub async fn put_account_data<C: Serialize + ?Sized>(
        &self,
        data_type: &str,
        content: &C,
    ) -> Result<(), ClientError> {
        let user_id = self.require_user_id()?;
        let url = self.build_url(&["user", user_id.as_str(), "account_data", data_type])?;
        self.make_request_no_content(Method::PUT, url, Some(content))
            .await
    }

    pub async fn get_devices(&self) -> Result<RespGetDevices, ClientError> {
        let url = self.build_url(&["devices"])?;
        self.make_request(Method::GET, url, NO_BODY).await
    }

    pub async fn user_directory_search(
        &self,
        req: &ReqUserDirectorySearch,
    ) -> Result<RespUserDirectorySearch, ClientError> {
        let url = self.build_url(&["user_directory", "search"])?;
        self.make_request(Method::POST, url, Some(req)).await
    }

    /// Upload raw bytes to the media repository and return the `mxc://` URI.
    pub async fn upload_to_content_repo(
        &self,
        content: Vec<u8>,
        content_type: &str,
    ) -> Result<RespMediaUpload, ClientError> {
        let url = self.build_base_url(&MEDIA_UPLOAD_PATH)?;
        let path = url.path().to_owned();
        let body = Body::Raw {
            bytes: content,
            content_type: content_type.to_owned(),
        };
        let response = self.execute(Method::POST, url, body).await?;
        decode_response(Method::POST, path, response).await
    }

    /// Download `link` and re-upload it to the media repository.
    ///
    /// The download carries no homeserver credentials.
    pub async fn upload_link(&self, link: &str) -> Result<RespMediaUpload, ClientError> {
        let link = Url::parse(link)?;
        let (content, content_type) = self.fetch_external(link).await?;
        self.upload_to_content_repo(content, &content_type).await
    }
}
