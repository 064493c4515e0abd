//! Environment-backed runtime configuration for the `mxsync` binary.

use std::{env, error::Error, fmt, path::PathBuf, time::Duration};

use mxsync_client::{ClientConfig, ClientError};

const DEFAULT_STATE_FILE: &str = "./.mxsync/tokens.json";

/// How the CLI authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    AccessToken(String),
    /// Log in with `m.login.password` on startup.
    Password(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    pub homeserver: String,
    pub user_id: String,
    pub credentials: Credentials,
    /// JSON document holding the sync token and filter id between runs.
    pub state_file: PathBuf,
    pub sync_timeout: Option<Duration>,
    pub randomize_x_forwarded_for: bool,
}

impl CliConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let homeserver = required_trimmed_env("MXSYNC_HOMESERVER", &mut lookup)?;
        let user_id = required_trimmed_env("MXSYNC_USER", &mut lookup)?;

        let access_token = optional_trimmed_env("MXSYNC_ACCESS_TOKEN", &mut lookup);
        let password = lookup("MXSYNC_PASSWORD").filter(|value| !value.is_empty());
        let credentials = match (access_token, password) {
            (Some(token), _) => Credentials::AccessToken(token),
            (None, Some(password)) => Credentials::Password(password),
            (None, None) => return Err(ConfigError::MissingCredentials),
        };

        let state_file = optional_trimmed_env("MXSYNC_STATE_FILE", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));

        let sync_timeout =
            parse_optional_u64("MXSYNC_SYNC_TIMEOUT_MS", &mut lookup)?.map(Duration::from_millis);
        let randomize_x_forwarded_for =
            parse_optional_bool("MXSYNC_RANDOMIZE_XFF", &mut lookup)?.unwrap_or(false);

        Ok(Self {
            homeserver,
            user_id,
            credentials,
            state_file,
            sync_timeout,
            randomize_x_forwarded_for,
        })
    }

    /// Client settings; the access token is attached only when configured.
    pub fn client_config(&self) -> Result<ClientConfig, ClientError> {
        let mut config = ClientConfig::new(&self.homeserver)?
            .with_user_id(&self.user_id)
            .with_randomized_x_forwarded_for(self.randomize_x_forwarded_for);
        if let Credentials::AccessToken(token) = &self.credentials {
            config = config.with_credentials(&self.user_id, token);
        }
        if let Some(timeout) = self.sync_timeout {
            config = config.with_sync_timeout(timeout);
        }
        Ok(config)
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Missing { key: &'static str },
    MissingCredentials,
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { key } => write!(f, "{key} must be set"),
            Self::MissingCredentials => {
                f.write_str("one of MXSYNC_ACCESS_TOKEN or MXSYNC_PASSWORD must be set")
            }
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn required_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    optional_trimmed_env(key, lookup).ok_or(ConfigError::Missing { key })
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_bool<F>(key: &'static str, lookup: &mut F) -> Result<Option<bool>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected a boolean".to_owned(),
        }),
    }
}
