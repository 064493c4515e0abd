use std::time::Duration;

use url::Url;

use crate::error::ClientError;

pub const DEFAULT_PREFIX: &str = "/_matrix/client/r0";
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
/// Slack kept between the long-poll wait and the HTTP request timeout.
pub const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(30);

/// Connection and sync settings for a [`crate::Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Homeserver base URL, for example `https://matrix.example.org`.
    pub homeserver: Url,
    /// API prefix appended to the homeserver for client endpoints.
    pub prefix: String,
    pub user_id: Option<String>,
    pub access_token: Option<String>,
    /// Application-service identity assertion sent as `?user_id=` on every URL.
    pub app_service_user_id: Option<String>,
    /// Attach a random `X-Forwarded-For` address to every request.
    ///
    /// Only meant for tests against homeservers that rate-limit per address.
    pub randomize_x_forwarded_for: bool,
    /// Server-side wait bound of each long-poll.
    pub sync_timeout: Duration,
    pub full_state: bool,
    pub set_presence: Option<String>,
    /// Whole-request timeout enforced by the HTTP client. Must exceed
    /// `sync_timeout` or long-polls will be cut short; [`Self::validate`]
    /// rejects anything else.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(homeserver: &str) -> Result<Self, ClientError> {
        let homeserver = Url::parse(homeserver)?;
        if homeserver.cannot_be_a_base() {
            return Err(ClientError::InvalidRequest(format!(
                "homeserver url cannot carry a path: {homeserver}"
            )));
        }

        Ok(Self {
            homeserver,
            prefix: DEFAULT_PREFIX.to_owned(),
            user_id: None,
            access_token: None,
            app_service_user_id: None,
            randomize_x_forwarded_for: false,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            full_state: false,
            set_presence: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_credentials(
        mut self,
        user_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        self.user_id = Some(user_id.into());
        self.access_token = Some(access_token.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_app_service_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.app_service_user_id = Some(user_id.into());
        self
    }

    pub fn with_randomized_x_forwarded_for(mut self, enabled: bool) -> Self {
        self.randomize_x_forwarded_for = enabled;
        self
    }

    /// Set the long-poll wait, raising `request_timeout` to at least
    /// `timeout + REQUEST_TIMEOUT_MARGIN`.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self.request_timeout = self
            .request_timeout
            .max(timeout.saturating_add(REQUEST_TIMEOUT_MARGIN));
        self
    }

    pub fn with_full_state(mut self, full_state: bool) -> Self {
        self.full_state = full_state;
        self
    }

    pub fn with_set_presence(mut self, presence: impl Into<String>) -> Self {
        self.set_presence = Some(presence.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Check settings that cannot be expressed in the field types.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.request_timeout <= self.sync_timeout {
            return Err(ClientError::InvalidRequest(format!(
                "request timeout {:?} must exceed sync timeout {:?}",
                self.request_timeout, self.sync_timeout
            )));
        }
        Ok(())
    }
}
