//! Core contract shared by the mxsync transport, stores, and sync engine.
//!
//! This crate defines the sync wire types, the per-run phase machine, retry
//! policy, error categories, and the notice channel used by processors.

/// Notice broadcast primitives.
pub mod channel;
/// Error categories, stable faults, and HTTP/errcode classification.
pub mod error;
/// Backoff policy used by sync retry decisions.
pub mod retry;
/// Phase machine of a single sync run.
pub mod state_machine;
/// Sync wire types (batches, events, protocol errors, query parameters).
pub mod types;

pub use channel::{NoticeStream, SyncNotice, SyncNotices, SyncStatus};
pub use error::{ErrorCategory, SyncFault, classify_errcode, classify_http_status};
pub use retry::RetryPolicy;
pub use state_machine::{SyncPhase, SyncStateMachine};
pub use types::{
    Event, EventList, InvitedRoom, JoinedRoom, LeftRoom, Membership, RespCreateFilter, RespError,
    SyncParams, SyncResponse, SyncRooms, Timeline,
};
