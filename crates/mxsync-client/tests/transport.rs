mod support;

use std::net::Ipv4Addr;

use mxsync_client::{
    Client, ClientConfig, ClientError, ErrorCategory, HttpError,
    payloads::{RegisterOutcome, ReqCreateRoom, ReqHierarchy, ReqInvite3Pid, ReqRegister},
};
use serde_json::json;

use support::{MockServer, Reply, TOKEN, USER};

fn client(server: &MockServer) -> Client {
    let config = ClientConfig::new(server.url())
        .expect("mock url")
        .with_credentials(USER, TOKEN);
    Client::new(config).expect("client")
}

#[tokio::test]
async fn rate_limit_error_is_decoded_and_raw_body_kept() {
    let body = r#"{"errcode":"M_LIMIT_EXCEEDED","error":"too fast"}"#;
    let server = MockServer::start(vec![Reply::Json {
        status: 429,
        body: body.to_owned(),
    }])
    .await;

    let err = client(&server).whoami().await.expect_err("429 must fail");
    let ClientError::Http(http) = &err else {
        panic!("expected http error, got {err:?}");
    };
    assert!(!http.is_transport());
    assert_eq!(http.status(), 429);
    assert_eq!(http.method().as_str(), "GET");
    assert_eq!(http.path(), "/_matrix/client/r0/account/whoami");
    assert_eq!(http.errcode(), Some("M_LIMIT_EXCEEDED"));
    assert_eq!(
        http.matrix_error().map(|e| e.error.as_str()),
        Some("too fast")
    );
    assert_eq!(http.contents(), Some(body.as_bytes()));
    assert_eq!(err.category(), ErrorCategory::RateLimited);
    assert_eq!(
        err.to_string(),
        "http request failed: code: 429 method: GET path: /_matrix/client/r0/account/whoami \
         err: M_LIMIT_EXCEEDED: too fast"
    );
}

#[tokio::test]
async fn non_json_error_body_keeps_bytes_and_cause() {
    let server = MockServer::start(vec![Reply::Raw {
        status: 502,
        content_type: "text/html",
        body: b"<html>bad gateway</html>".to_vec(),
    }])
    .await;

    let err = client(&server).joined_rooms().await.expect_err("502 must fail");
    let http = err.http().expect("http error");
    assert_eq!(http.status(), 502);
    assert_eq!(http.matrix_error(), None);
    assert_eq!(http.contents(), Some(&b"<html>bad gateway</html>"[..]));
    assert!(
        err.to_string()
            .contains("err: body did not match expected error shape")
    );
    assert_eq!(err.category(), ErrorCategory::Network);
}

#[tokio::test]
async fn undecodable_success_is_a_decode_error() {
    let server = MockServer::start(vec![Reply::ok(json!({ "unexpected": true }))]).await;

    let err = client(&server).whoami().await.expect_err("body lacks user_id");
    assert!(
        matches!(
            &err,
            ClientError::Decode { path, .. } if path == "/_matrix/client/r0/account/whoami"
        ),
        "got {err:?}"
    );
    assert_eq!(err.status(), 0);
    assert_eq!(err.category(), ErrorCategory::Serialization);
}

#[tokio::test]
async fn closed_connection_is_a_transport_failure() {
    let server = MockServer::start(vec![Reply::Close]).await;

    let err = client(&server).versions().await.expect_err("no response");
    assert!(matches!(err, ClientError::Http(HttpError::Transport { .. })));
    assert_eq!(err.status(), 0);
    assert_eq!(err.category(), ErrorCategory::Network);
    assert_eq!(err.to_fault().code, "transport_error");
}

#[tokio::test]
async fn sends_bearer_token_and_json_body() {
    let server = MockServer::start(vec![Reply::ok(json!({ "room_id": "!new:example.org" }))]).await;

    let req = ReqCreateRoom {
        name: Some("ops".to_owned()),
        ..ReqCreateRoom::default()
    };
    let created = client(&server).create_room(&req).await.expect("room created");
    assert_eq!(created.room_id, "!new:example.org");

    let request = &server.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path(), "/_matrix/client/r0/createRoom");
    assert_eq!(
        request.header("authorization"),
        Some(format!("Bearer {TOKEN}").as_str())
    );
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.json(), json!({ "name": "ops" }));
    assert_eq!(request.header("x-forwarded-for"), None);
}

#[tokio::test]
async fn omits_authorization_without_token() {
    let server = MockServer::start(vec![Reply::ok(json!({ "versions": ["r0.6.1"] }))]).await;
    let client = Client::new(ClientConfig::new(server.url()).expect("mock url")).expect("client");

    let versions = client.versions().await.expect("versions");
    assert_eq!(versions.versions, vec!["r0.6.1".to_owned()]);

    let request = &server.requests()[0];
    assert_eq!(request.path(), "/_matrix/client/versions");
    assert_eq!(request.header("authorization"), None);
}

#[tokio::test]
async fn randomized_forwarded_for_is_opt_in() {
    let server = MockServer::start(vec![Reply::ok(json!({ "joined_rooms": [] }))]).await;
    let config = ClientConfig::new(server.url())
        .expect("mock url")
        .with_credentials(USER, TOKEN)
        .with_randomized_x_forwarded_for(true);
    let client = Client::new(config).expect("client");

    client.joined_rooms().await.expect("joined rooms");
    let request = &server.requests()[0];
    let forwarded = request.header("x-forwarded-for").expect("header present");
    forwarded
        .parse::<Ipv4Addr>()
        .expect("forwarded address should be ipv4");
}

#[tokio::test]
async fn app_service_identity_is_appended_to_every_url() {
    let server = MockServer::start(vec![Reply::ok(json!({ "joined_rooms": ["!a:example.org"] }))])
        .await;
    let config = ClientConfig::new(server.url())
        .expect("mock url")
        .with_credentials("@bridge:example.org", TOKEN)
        .with_app_service_user_id("@puppet:example.org");
    let client = Client::new(config).expect("client");

    let rooms = client.joined_rooms().await.expect("joined rooms");
    assert_eq!(rooms.joined_rooms, vec!["!a:example.org".to_owned()]);
    assert_eq!(
        server.requests()[0].query("user_id").as_deref(),
        Some("@puppet:example.org")
    );
}

#[tokio::test]
async fn register_dummy_completes_single_stage_flow() {
    let server = MockServer::start(vec![
        Reply::json(
            401,
            json!({
                "flows": [{ "stages": ["m.login.dummy"] }],
                "params": {},
                "session": "sess-1"
            }),
        ),
        Reply::ok(json!({ "user_id": "@carol:example.org", "access_token": "t0k" })),
    ])
    .await;
    let client = Client::new(ClientConfig::new(server.url()).expect("mock url")).expect("client");

    let req = ReqRegister {
        username: Some("carol".to_owned()),
        password: Some("pw".to_owned()),
        ..ReqRegister::default()
    };
    let registered = client.register_dummy(&req).await.expect("registered");
    assert_eq!(registered.user_id, "@carol:example.org");
    assert_eq!(registered.access_token.as_deref(), Some("t0k"));
    assert_eq!(client.access_token(), None);

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].json().get("auth"), None);
    assert_eq!(
        requests[1].json()["auth"],
        json!({ "type": "m.login.dummy", "session": "sess-1" })
    );
}

#[tokio::test]
async fn register_reports_interactive_auth_requirement() {
    let server = MockServer::start(vec![Reply::json(
        401,
        json!({
            "flows": [{ "stages": ["m.login.recaptcha", "m.login.email.identity"] }],
            "session": "sess-2"
        }),
    )])
    .await;
    let client = Client::new(ClientConfig::new(server.url()).expect("mock url")).expect("client");

    let outcome = client
        .register_guest(&ReqRegister::default())
        .await
        .expect("uia body decodes");
    let RegisterOutcome::AuthRequired(uia) = outcome else {
        panic!("expected interactive auth");
    };
    assert_eq!(uia.session.as_deref(), Some("sess-2"));
    assert!(!uia.has_single_stage_flow("m.login.dummy"));
    assert_eq!(server.requests()[0].query("kind").as_deref(), Some("guest"));
}

#[tokio::test]
async fn send_text_uses_fresh_transaction_ids() {
    let server = MockServer::start(vec![
        Reply::ok(json!({ "event_id": "$1" })),
        Reply::ok(json!({ "event_id": "$2" })),
    ])
    .await;
    let client = client(&server);

    let first = client.send_text("!r:example.org", "hi").await.expect("sent");
    let second = client.send_notice("!r:example.org", "note").await.expect("sent");
    assert_eq!(first.event_id, "$1");
    assert_eq!(second.event_id, "$2");

    let requests = server.requests();
    assert_eq!(requests[0].method, "PUT");
    assert!(
        requests[0]
            .path()
            .starts_with("/_matrix/client/r0/rooms/!r:example.org/send/m.room.message/")
    );
    assert_ne!(requests[0].path(), requests[1].path());
    assert_eq!(requests[0].json(), json!({ "msgtype": "m.text", "body": "hi" }));
    assert_eq!(requests[1].json()["msgtype"], "m.notice");
}

#[tokio::test]
async fn upload_sends_raw_bytes_to_media_repository() {
    let server =
        MockServer::start(vec![Reply::ok(json!({ "content_uri": "mxc://example.org/abc" }))]).await;

    let uploaded = client(&server)
        .upload_to_content_repo(vec![0x89, b'P', b'N', b'G'], "image/png")
        .await
        .expect("uploaded");
    assert_eq!(uploaded.content_uri, "mxc://example.org/abc");

    let request = &server.requests()[0];
    assert_eq!(request.path(), "/_matrix/media/r0/upload");
    assert_eq!(request.header("content-type"), Some("image/png"));
    assert_eq!(request.body, vec![0x89, b'P', b'N', b'G']);
    assert_eq!(
        request.header("authorization"),
        Some(format!("Bearer {TOKEN}").as_str())
    );
}

#[tokio::test]
async fn upload_link_fetches_then_reuploads_with_its_content_type() {
    let gif = b"GIF89a".to_vec();
    let server = MockServer::start(vec![
        Reply::Raw {
            status: 200,
            content_type: "image/gif",
            body: gif.clone(),
        },
        Reply::ok(json!({ "content_uri": "mxc://example.org/gif" })),
    ])
    .await;

    let link = format!("{}/files/cat.gif", server.url());
    let uploaded = client(&server).upload_link(&link).await.expect("uploaded");
    assert_eq!(uploaded.content_uri, "mxc://example.org/gif");

    let requests = server.requests();
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path(), "/files/cat.gif");
    assert_eq!(requests[0].header("authorization"), None);
    assert_eq!(requests[1].path(), "/_matrix/media/r0/upload");
    assert_eq!(requests[1].header("content-type"), Some("image/gif"));
    assert_eq!(requests[1].body, gif);
}

#[tokio::test]
async fn upload_link_reports_failed_fetch_without_uploading() {
    let server = MockServer::start(vec![Reply::Raw {
        status: 404,
        content_type: "text/plain",
        body: b"gone".to_vec(),
    }])
    .await;

    let link = format!("{}/files/missing.png", server.url());
    let err = client(&server)
        .upload_link(&link)
        .await
        .expect_err("fetch failed");
    assert_eq!(err.status(), 404);
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn third_party_invite_posts_identity_to_room() {
    let server = MockServer::start(vec![Reply::ok(json!({}))]).await;

    client(&server)
        .invite_user_by_third_party(
            "!r:example.org",
            &ReqInvite3Pid {
                id_server: "id.example.org".to_owned(),
                medium: "email".to_owned(),
                address: "bob@example.org".to_owned(),
            },
        )
        .await
        .expect("invited");

    let request = &server.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path(), "/_matrix/client/r0/rooms/!r:example.org/invite");
    assert_eq!(
        request.json(),
        json!({
            "id_server": "id.example.org",
            "medium": "email",
            "address": "bob@example.org",
        })
    );
}

#[tokio::test]
async fn hierarchy_and_filtered_directory_carry_their_parameters() {
    let server = MockServer::start(vec![
        Reply::ok(json!({
            "rooms": [{ "room_id": "!child:example.org", "num_joined_members": 3 }],
            "next_batch": "page2",
        })),
        Reply::ok(json!({ "chunk": [], "total_room_count_estimate": 0 })),
    ])
    .await;
    let client = client(&server);

    let page = client
        .hierarchy(&ReqHierarchy {
            room_id: "!space:example.org".to_owned(),
            suggested_only: true,
            limit: 10,
        })
        .await
        .expect("hierarchy");
    assert_eq!(page.rooms[0].room_id, "!child:example.org");
    assert_eq!(page.next_batch.as_deref(), Some("page2"));

    client
        .public_rooms_filtered(Some(5), None, Some("other.org"), Some("rust"))
        .await
        .expect("directory");

    let requests = server.requests();
    assert_eq!(
        requests[0].path(),
        "/_matrix/client/r0/rooms/!space:example.org/hierarchy"
    );
    assert_eq!(requests[0].query("suggested_only").as_deref(), Some("true"));
    assert_eq!(requests[0].query("limit").as_deref(), Some("10"));

    assert_eq!(requests[1].method, "POST");
    assert_eq!(requests[1].path(), "/_matrix/client/r0/publicRooms");
    assert_eq!(requests[1].query("server").as_deref(), Some("other.org"));
    assert_eq!(
        requests[1].json(),
        json!({ "limit": 5, "filter": { "generic_search_term": "rust" } })
    );
}

#[tokio::test]
async fn own_profile_calls_need_a_user_id() {
    let server = MockServer::start(Vec::new()).await;
    let client = Client::new(ClientConfig::new(server.url()).expect("mock url")).expect("client");

    let err = client
        .set_display_name("Alice")
        .await
        .expect_err("no user id");
    assert!(matches!(err, ClientError::InvalidRequest(_)));
    assert!(server.requests().is_empty());
}
