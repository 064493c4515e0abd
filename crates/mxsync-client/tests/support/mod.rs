#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::Response,
};
use futures_util::stream;
use mxsync_client::{
    ClientError, InMemoryTokenStore, StoreError, SyncFault, SyncProcessor, SyncResponse,
    TokenStore, default_filter,
};
use serde_json::Value;
use tokio::{net::TcpListener, sync::Notify};

pub const USER: &str = "@alice:example.org";
pub const TOKEN: &str = "secret-token";
pub const WAIT: Duration = Duration::from_secs(5);

/// What the scripted server does with one request.
pub enum Reply {
    Json { status: u16, body: String },
    Raw {
        status: u16,
        content_type: &'static str,
        body: Vec<u8>,
    },
    /// Keep the connection open without answering.
    Hang,
    /// Drop the connection without answering.
    Close,
    /// Answer once the gate is notified.
    Gated { gate: Arc<Notify>, reply: Box<Reply> },
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Reply::Json {
            status,
            body: body.to_string(),
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    pub fn batch(next_batch: &str) -> Self {
        Self::ok(serde_json::json!({ "next_batch": next_batch }))
    }

    pub fn gated(gate: &Arc<Notify>, reply: Reply) -> Self {
        Reply::Gated {
            gate: gate.clone(),
            reply: Box::new(reply),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    fn url(&self) -> url::Url {
        url::Url::parse(&format!("http://mock{}", self.target)).expect("request target")
    }

    pub fn path(&self) -> String {
        self.url().path().to_owned()
    }

    pub fn query(&self, key: &str) -> Option<String> {
        self.url()
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body should be json")
    }
}

#[derive(Default)]
struct ServerState {
    script: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    arrived: Notify,
}

/// Local HTTP server answering requests from a fixed script, in order.
/// Once the script runs out every further request hangs.
pub struct MockServer {
    base_url: String,
    state: Arc<ServerState>,
}

impl MockServer {
    pub async fn start(script: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let state = Arc::new(ServerState {
            script: Mutex::new(script.into()),
            ..ServerState::default()
        });

        let router = Router::new().fallback(handle).with_state(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().expect("requests lock").clone()
    }

    pub async fn wait_for_requests(&self, count: usize) -> Vec<RecordedRequest> {
        tokio::time::timeout(WAIT, async {
            loop {
                let notified = self.state.arrived.notified();
                let requests = self.requests();
                if requests.len() >= count {
                    return requests;
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for requests")
    }
}

async fn handle(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = RecordedRequest {
        method: method.to_string(),
        target: uri.to_string(),
        headers: headers
            .iter()
            .map(|(name, value)| {
                let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
                (name.to_string(), value)
            })
            .collect(),
        body: body.to_vec(),
    };

    let reply = state
        .script
        .lock()
        .expect("script lock")
        .pop_front()
        .unwrap_or(Reply::Hang);
    state.requests.lock().expect("requests lock").push(request);
    state.arrived.notify_waiters();

    respond(reply).await
}

async fn respond(mut reply: Reply) -> Response {
    loop {
        match reply {
            Reply::Gated { gate, reply: inner } => {
                gate.notified().await;
                reply = *inner;
            }
            Reply::Hang => return std::future::pending().await,
            Reply::Close => return dropped_response(),
            Reply::Json { status, body } => {
                return complete_response(status, "application/json", body.into_bytes());
            }
            Reply::Raw {
                status,
                content_type,
                body,
            } => return complete_response(status, content_type, body),
        }
    }
}

fn complete_response(status: u16, content_type: &str, body: Vec<u8>) -> Response {
    Response::builder()
        .status(StatusCode::from_u16(status).expect("valid status"))
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONNECTION, "close")
        .body(Body::from(body))
        .expect("mock response")
}

/// Response whose body fails before any byte of it is written, so the
/// connection is torn down without a complete reply.
fn dropped_response() -> Response {
    let failing = stream::once(async {
        Err::<Bytes, io::Error>(io::Error::other("mock connection dropped"))
    });
    Response::builder()
        .header(header::CONNECTION, "close")
        .body(Body::from_stream(failing))
        .expect("mock response")
}

/// Store whose `save_next_batch` always fails; everything else is delegated.
pub struct FailingSaveStore {
    pub inner: InMemoryTokenStore,
}

impl TokenStore for FailingSaveStore {
    fn load_next_batch(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        self.inner.load_next_batch(user_id)
    }

    fn save_next_batch(&self, _user_id: &str, _next_batch: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk full".to_owned()))
    }

    fn load_filter_id(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        self.inner.load_filter_id(user_id)
    }

    fn save_filter_id(&self, user_id: &str, filter_id: &str) -> Result<(), StoreError> {
        self.inner.save_filter_id(user_id, filter_id)
    }
}

/// What a [`RecordingProcessor`] saw when a batch was delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub next_batch: String,
    pub previous: Option<String>,
    /// Token in the store at the moment of delivery.
    pub stored: Option<String>,
}

pub enum OnFailure {
    Retry(Duration),
    Fatal,
}

/// Processor that records every callback and answers from a script.
pub struct RecordingProcessor {
    store: InMemoryTokenStore,
    on_failure: OnFailure,
    batch_results: Mutex<VecDeque<Result<(), SyncFault>>>,
    deliveries: Mutex<Vec<Delivery>>,
    failures: Mutex<Vec<(u16, bool)>>,
    changed: Notify,
}

impl RecordingProcessor {
    pub fn new(store: InMemoryTokenStore, on_failure: OnFailure) -> Arc<Self> {
        Arc::new(Self {
            store,
            on_failure,
            batch_results: Mutex::new(VecDeque::new()),
            deliveries: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            changed: Notify::new(),
        })
    }

    /// Answer the next delivered batch with `result`.
    pub fn push_batch_result(&self, result: Result<(), SyncFault>) {
        self.batch_results
            .lock()
            .expect("batch results lock")
            .push_back(result);
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().expect("deliveries lock").clone()
    }

    /// `(status, is_transport)` of every failure seen.
    pub fn failures(&self) -> Vec<(u16, bool)> {
        self.failures.lock().expect("failures lock").clone()
    }

    pub async fn wait_for_deliveries(&self, count: usize) -> Vec<Delivery> {
        tokio::time::timeout(WAIT, async {
            loop {
                let notified = self.changed.notified();
                let deliveries = self.deliveries();
                if deliveries.len() >= count {
                    return deliveries;
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for deliveries")
    }

    pub async fn wait_for_failures(&self, count: usize) -> Vec<(u16, bool)> {
        tokio::time::timeout(WAIT, async {
            loop {
                let notified = self.changed.notified();
                let failures = self.failures();
                if failures.len() >= count {
                    return failures;
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for failures")
    }
}

impl SyncProcessor for RecordingProcessor {
    fn filter_spec(&self, _user_id: &str) -> Value {
        default_filter()
    }

    fn on_failure(&self, err: &ClientError) -> Result<std::time::Duration, SyncFault> {
        let is_transport = err.http().is_some_and(|http| http.is_transport());
        self.failures
            .lock()
            .expect("failures lock")
            .push((err.status(), is_transport));
        self.changed.notify_waiters();

        match self.on_failure {
            OnFailure::Retry(delay) => Ok(delay),
            OnFailure::Fatal => Err(err.to_fault()),
        }
    }

    fn on_batch(&self, batch: SyncResponse, previous: Option<&str>) -> Result<(), SyncFault> {
        let stored = self.store.tokens(USER).next_batch;
        self.deliveries
            .lock()
            .expect("deliveries lock")
            .push(Delivery {
                next_batch: batch.next_batch,
                previous: previous.map(str::to_owned),
                stored,
            });
        self.changed.notify_waiters();

        self.batch_results
            .lock()
            .expect("batch results lock")
            .pop_front()
            .unwrap_or(Ok(()))
    }
}
