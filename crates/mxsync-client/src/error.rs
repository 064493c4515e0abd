use std::{fmt, time::Duration};

use mxsync_core::{ErrorCategory, RespError, SyncFault, classify_errcode, classify_http_status};
use reqwest::Method;
use thiserror::Error;

/// Failure of one HTTP exchange with the homeserver.
///
/// Exactly one cause is populated: either no response was obtained
/// (`Transport`), or a non-2xx response was (`Protocol`).
#[derive(Debug, Error)]
pub enum HttpError {
    Transport {
        method: Method,
        path: String,
        #[source]
        source: reqwest::Error,
    },
    Protocol {
        method: Method,
        path: String,
        status: u16,
        /// Raw response body, kept even when it is not a protocol error.
        contents: Vec<u8>,
        matrix_error: Option<RespError>,
        /// Why `matrix_error` is absent.
        cause: Option<String>,
    },
}

impl HttpError {
    pub fn method(&self) -> &Method {
        match self {
            HttpError::Transport { method, .. } | HttpError::Protocol { method, .. } => method,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            HttpError::Transport { path, .. } | HttpError::Protocol { path, .. } => path,
        }
    }

    /// HTTP status, or `0` when no response was obtained.
    pub fn status(&self) -> u16 {
        match self {
            HttpError::Transport { .. } => 0,
            HttpError::Protocol { status, .. } => *status,
        }
    }

    pub fn matrix_error(&self) -> Option<&RespError> {
        match self {
            HttpError::Transport { .. } => None,
            HttpError::Protocol { matrix_error, .. } => matrix_error.as_ref(),
        }
    }

    pub fn errcode(&self) -> Option<&str> {
        self.matrix_error().map(|err| err.errcode.as_str())
    }

    pub fn contents(&self) -> Option<&[u8]> {
        match self {
            HttpError::Transport { .. } => None,
            HttpError::Protocol { contents, .. } => Some(contents),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, HttpError::Transport { .. })
    }

    pub fn category(&self) -> ErrorCategory {
        self.errcode()
            .and_then(classify_errcode)
            .unwrap_or_else(|| classify_http_status(self.status()))
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::Transport {
                method,
                path,
                source,
            } => write!(
                f,
                "http request failed: method: {method} path: {path} err: {source}"
            ),
            HttpError::Protocol {
                method,
                path,
                status,
                matrix_error,
                cause,
                ..
            } => {
                write!(
                    f,
                    "http request failed: code: {status} method: {method} path: {path} err: "
                )?;
                match (matrix_error, cause) {
                    (Some(matrix_error), _) => write!(f, "{matrix_error}"),
                    (None, Some(cause)) => f.write_str(cause),
                    (None, None) => f.write_str("no error body"),
                }
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),
    #[error(transparent)]
    Http(#[from] HttpError),
    /// The server accepted the request but its reply has an unexpected shape.
    #[error("failed to decode response: method: {method} path: {path}: {source}")]
    Decode {
        method: Method,
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to build http client: {0}")]
    Builder(#[source] reqwest::Error),
}

impl ClientError {
    pub fn http(&self) -> Option<&HttpError> {
        match self {
            ClientError::Http(err) => Some(err),
            _ => None,
        }
    }

    /// HTTP status of a protocol failure, `0` for everything else.
    pub fn status(&self) -> u16 {
        self.http().map(HttpError::status).unwrap_or(0)
    }

    pub fn errcode(&self) -> Option<&str> {
        self.http().and_then(HttpError::errcode)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.http()
            .and_then(HttpError::matrix_error)
            .and_then(|err| err.retry_after_ms)
            .map(Duration::from_millis)
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::InvalidUrl(_)
            | ClientError::InvalidRequest(_)
            | ClientError::Builder(_) => ErrorCategory::Config,
            ClientError::Encode(_) | ClientError::Decode { .. } => ErrorCategory::Serialization,
            ClientError::Http(err) => err.category(),
        }
    }

    /// Stable, serializable summary used by sync processors.
    pub fn to_fault(&self) -> SyncFault {
        let code = match self {
            ClientError::InvalidUrl(_) => "invalid_url".to_owned(),
            ClientError::InvalidRequest(_) => "invalid_request".to_owned(),
            ClientError::Encode(_) => "encode_error".to_owned(),
            ClientError::Decode { .. } => "decode_error".to_owned(),
            ClientError::Builder(_) => "client_build_error".to_owned(),
            ClientError::Http(HttpError::Transport { .. }) => "transport_error".to_owned(),
            ClientError::Http(err) => match err.errcode() {
                Some(errcode) => errcode.to_owned(),
                None => format!("http_{}", err.status()),
            },
        };

        let fault = SyncFault::new(self.category(), code, self.to_string());
        match self.retry_after() {
            Some(delay) => fault.with_retry_after(delay),
            None => fault,
        }
    }
}
