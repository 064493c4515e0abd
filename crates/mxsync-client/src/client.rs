use std::{
    fmt,
    net::Ipv4Addr,
    sync::{Arc, PoisonError, RwLock},
};

use mxsync_core::RespError;
use mxsync_store::{InMemoryTokenStore, TokenStore};
use reqwest::{
    Method, Response,
    header::{CONTENT_TYPE, HeaderValue},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, trace};
use url::Url;
use uuid::Uuid;

use crate::{
    config::ClientConfig,
    error::{ClientError, HttpError},
    processor::{DefaultSyncProcessor, SyncProcessor},
    sync::SyncGeneration,
};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const JSON_CONTENT_TYPE: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, Default)]
struct Credentials {
    user_id: Option<String>,
    access_token: Option<String>,
}

/// Outgoing request body.
pub(crate) enum Body {
    Empty,
    Json(Vec<u8>),
    Raw {
        bytes: Vec<u8>,
        content_type: String,
    },
}

impl Body {
    pub(crate) fn json<B: Serialize + ?Sized>(body: Option<&B>) -> Result<Self, ClientError> {
        match body {
            Some(body) => serde_json::to_vec(body)
                .map(Body::Json)
                .map_err(ClientError::Encode),
            None => Ok(Body::Empty),
        }
    }
}

/// Matrix client bound to one homeserver and one set of credentials.
///
/// All request methods take `&self` and may run concurrently. At most one
/// sync run is live at a time, see [`Client::sync`].
pub struct Client {
    http: reqwest::Client,
    config: ClientConfig,
    credentials: RwLock<Credentials>,
    pub(crate) store: Arc<dyn TokenStore>,
    pub(crate) processor: Arc<dyn SyncProcessor>,
    pub(crate) generation: SyncGeneration,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("homeserver", &self.config.homeserver.as_str())
            .field("user_id", &self.user_id())
            .field("generation", &self.generation.current())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Build a client with an in-memory token store and the default processor.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(ClientError::Builder)?;

        let credentials = Credentials {
            user_id: config.user_id.clone(),
            access_token: config.access_token.clone(),
        };

        Ok(Self {
            http,
            config,
            credentials: RwLock::new(credentials),
            store: Arc::new(InMemoryTokenStore::new()),
            processor: Arc::new(DefaultSyncProcessor::default()),
            generation: SyncGeneration::default(),
        })
    }

    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_processor(mut self, processor: Arc<dyn SyncProcessor>) -> Self {
        self.processor = processor;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn processor(&self) -> &Arc<dyn SyncProcessor> {
        &self.processor
    }

    pub fn user_id(&self) -> Option<String> {
        self.read_credentials().user_id.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read_credentials().access_token.clone()
    }

    /// Replace the user id and access token used for subsequent requests.
    pub fn set_credentials(&self, user_id: impl Into<String>, access_token: impl Into<String>) {
        let mut credentials = self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        credentials.user_id = Some(user_id.into());
        credentials.access_token = Some(access_token.into());
    }

    pub fn clear_credentials(&self) {
        let mut credentials = self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *credentials = Credentials::default();
    }

    fn read_credentials(&self) -> std::sync::RwLockReadGuard<'_, Credentials> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn require_user_id(&self) -> Result<String, ClientError> {
        self.user_id()
            .filter(|user_id| !user_id.is_empty())
            .ok_or_else(|| ClientError::InvalidRequest("user id is not set".to_owned()))
    }

    /// URL under the homeserver root; the caller supplies any prefix.
    pub fn build_base_url<S: AsRef<str>>(&self, segments: &[S]) -> Result<Url, ClientError> {
        let mut url = self.config.homeserver.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                ClientError::InvalidRequest("homeserver url cannot carry a path".to_owned())
            })?;
            path.pop_if_empty();
            for segment in segments {
                path.extend(segment.as_ref().split('/').filter(|s| !s.is_empty()));
            }
        }

        url.set_query(None);
        if let Some(user_id) = self.config.app_service_user_id.as_deref() {
            url.query_pairs_mut().append_pair("user_id", user_id);
        }
        Ok(url)
    }

    /// URL under the configured client API prefix.
    ///
    /// Each segment is split on `/` so literal paths like `logout/all` work;
    /// identifiers containing `/` must not be passed as plain segments.
    pub fn build_url<S: AsRef<str>>(&self, segments: &[S]) -> Result<Url, ClientError> {
        let mut full: Vec<&str> = vec![self.config.prefix.as_str()];
        full.extend(segments.iter().map(AsRef::as_ref));
        self.build_base_url(&full)
    }

    pub fn build_url_with_query<S, K, V>(
        &self,
        segments: &[S],
        query: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Url, ClientError>
    where
        S: AsRef<str>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut url = self.build_url(segments)?;
        url.query_pairs_mut().extend_pairs(query);
        Ok(url)
    }

    /// Perform one JSON exchange and decode the 2xx body into `R`.
    pub async fn make_request<B, R>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<R, ClientError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = Body::json(body)?;
        let path = url.path().to_owned();
        let response = self.execute(method.clone(), url, body).await?;
        decode_response(method, path, response).await
    }

    /// Perform one JSON exchange whose 2xx body is dropped unread.
    pub async fn make_request_no_content<B>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<(), ClientError>
    where
        B: Serialize + ?Sized,
    {
        let body = Body::json(body)?;
        self.execute(method, url, body).await.map(drop)
    }

    /// Send one request. Returns the response only when its status is 2xx;
    /// every other outcome becomes a [`ClientError`].
    pub(crate) async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Body,
    ) -> Result<Response, ClientError> {
        let path = url.path().to_owned();
        let mut request = self.http.request(method.clone(), url);

        request = match body {
            Body::Empty => request,
            Body::Json(bytes) => request.header(CONTENT_TYPE, JSON_CONTENT_TYPE).body(bytes),
            Body::Raw {
                bytes,
                content_type,
            } => {
                let content_type = HeaderValue::from_str(&content_type).map_err(|err| {
                    ClientError::InvalidRequest(format!("invalid content type: {err}"))
                })?;
                request.header(CONTENT_TYPE, content_type).body(bytes)
            }
        };

        if let Some(token) = self.access_token().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }
        if self.config.randomize_x_forwarded_for {
            request = request.header(X_FORWARDED_FOR, random_forwarded_for());
        }

        trace!(%method, %path, "sending request");
        let response = request.send().await.map_err(|source| {
            if source.is_builder() {
                ClientError::InvalidRequest(source.to_string())
            } else {
                ClientError::Http(HttpError::Transport {
                    method: method.clone(),
                    path: path.clone(),
                    source,
                })
            }
        })?;

        let status = response.status();
        debug!(%method, %path, status = status.as_u16(), "response received");
        if !status.is_success() {
            return Err(protocol_error(method, path, response).await.into());
        }

        Ok(response)
    }

    /// Download `link` without homeserver credentials. Returns the body and
    /// its content type.
    pub(crate) async fn fetch_external(&self, link: Url) -> Result<(Vec<u8>, String), ClientError> {
        let path = link.path().to_owned();
        let response = self
            .http
            .get(link)
            .send()
            .await
            .map_err(|source| HttpError::Transport {
                method: Method::GET,
                path: path.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(protocol_error(Method::GET, path, response).await.into());
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(OCTET_STREAM)
            .to_owned();
        let bytes = response
            .bytes()
            .await
            .map_err(|source| HttpError::Transport {
                method: Method::GET,
                path,
                source,
            })?;
        Ok((bytes.to_vec(), content_type))
    }
}

pub(crate) async fn decode_response<R: DeserializeOwned>(
    method: Method,
    path: String,
    response: Response,
) -> Result<R, ClientError> {
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(source) => {
            return Err(HttpError::Transport {
                method,
                path,
                source,
            }
            .into());
        }
    };

    serde_json::from_slice(&bytes).map_err(|source| ClientError::Decode {
        method,
        path,
        source,
    })
}

async fn protocol_error(method: Method, path: String, response: Response) -> HttpError {
    let status = response.status().as_u16();
    let (contents, matrix_error, cause) = match response.bytes().await {
        Ok(bytes) => {
            let contents = bytes.to_vec();
            match serde_json::from_slice::<RespError>(&contents) {
                Ok(matrix_error) => (contents, Some(matrix_error), None),
                Err(err) => (
                    contents,
                    None,
                    Some(format!("body did not match expected error shape: {err}")),
                ),
            }
        }
        Err(err) => (
            Vec::new(),
            None,
            Some(format!("failed to read response body: {err}")),
        ),
    };

    HttpError::Protocol {
        method,
        path,
        status,
        contents,
        matrix_error,
        cause,
    }
}

fn random_forwarded_for() -> String {
    Ipv4Addr::from(rand::random::<u32>()).to_string()
}

/// Fresh client transaction id for idempotent `PUT` endpoints.
pub(crate) fn txn_id() -> String {
    format!("mxsync{}", Uuid::new_v4().simple())
}
