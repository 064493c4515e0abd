//! Matrix client-server transport and long-poll sync engine.
//!
//! [`Client`] performs authenticated JSON exchanges against one homeserver and
//! runs the `/sync` loop through a pluggable [`TokenStore`] and
//! [`SyncProcessor`].

mod api;
mod client;
/// Connection settings.
pub mod config;
/// Structured transport failures.
pub mod error;
/// Request and response bodies.
pub mod payloads;
/// Batch processor contract and default implementation.
pub mod processor;
mod sync;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, HttpError};
pub use mxsync_core::{
    ErrorCategory, Event, NoticeStream, RespError, RetryPolicy, SyncFault, SyncNotice,
    SyncNotices, SyncParams, SyncResponse, SyncStatus,
};
pub use mxsync_store::{FileTokenStore, InMemoryTokenStore, StoreError, TokenStore};
pub use processor::{DefaultSyncProcessor, SyncProcessor, default_filter};
pub use sync::{SyncError, SyncGeneration, SyncOutcome};
pub use tokio_util::sync::CancellationToken;
