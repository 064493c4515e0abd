use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use mxsync_core::{
    Event, Membership, NoticeStream, RetryPolicy, SyncFault, SyncNotice, SyncNotices,
    SyncResponse, SyncStatus,
};
use serde_json::{Value, json};
use tracing::warn;

use crate::error::ClientError;

/// Caller-supplied policy driven by [`crate::Client::sync`].
///
/// The engine never calls a processor concurrently within one run.
pub trait SyncProcessor: Send + Sync {
    /// Filter definition uploaded once per user when the store has no filter id.
    fn filter_spec(&self, user_id: &str) -> Value;

    /// Decide what to do after a failed long-poll.
    ///
    /// `Ok(delay)` retries with the same token after `delay`; `Err` ends the run.
    fn on_failure(&self, err: &ClientError) -> Result<Duration, SyncFault>;

    /// Apply one batch. Its `next_batch` token is already persisted.
    fn on_batch(&self, batch: SyncResponse, previous: Option<&str>) -> Result<(), SyncFault>;
}

pub fn default_filter() -> Value {
    json!({ "room": { "timeline": { "limit": 50 } } })
}

/// Processor that retries transient failures with exponential backoff and
/// fans every event out as a [`SyncNotice`].
#[derive(Debug)]
pub struct DefaultSyncProcessor {
    notices: SyncNotices,
    retry_policy: RetryPolicy,
    filter: Value,
    attempt: AtomicU32,
}

impl Default for DefaultSyncProcessor {
    fn default() -> Self {
        Self::new(SyncNotices::default())
    }
}

impl DefaultSyncProcessor {
    pub fn new(notices: SyncNotices) -> Self {
        Self {
            notices,
            retry_policy: RetryPolicy::default(),
            filter: default_filter(),
            attempt: AtomicU32::new(0),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = filter;
        self
    }

    pub fn notices(&self) -> &SyncNotices {
        &self.notices
    }

    pub fn subscribe(&self) -> NoticeStream {
        self.notices.subscribe()
    }

    /// Consecutive failures since the last delivered batch.
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::Relaxed)
    }

    fn emit_status(&self, running: bool, lag: Option<Duration>) {
        self.notices.emit(SyncNotice::Status(SyncStatus {
            running,
            lag_hint_ms: lag.map(|delay| delay.as_millis() as u64),
        }));
    }

    fn emit_room_events(&self, room_id: &str, membership: Membership, events: Vec<Event>) {
        for event in events {
            self.notices.emit(SyncNotice::RoomEvent {
                room_id: room_id.to_owned(),
                membership,
                event,
            });
        }
    }
}

impl SyncProcessor for DefaultSyncProcessor {
    fn filter_spec(&self, _user_id: &str) -> Value {
        self.filter.clone()
    }

    fn on_failure(&self, err: &ClientError) -> Result<Duration, SyncFault> {
        let fault = err.to_fault();
        if !fault.category.is_recoverable() {
            self.emit_status(false, None);
            return Err(fault);
        }

        let attempt = self.attempt.fetch_add(1, Ordering::Relaxed);
        let delay = self
            .retry_policy
            .delay_for_attempt(attempt, fault.retry_after());
        warn!(
            code = %fault.code,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "sync request failed; retrying"
        );
        self.emit_status(true, Some(delay));
        Ok(delay)
    }

    fn on_batch(&self, batch: SyncResponse, _previous: Option<&str>) -> Result<(), SyncFault> {
        self.attempt.store(0, Ordering::Relaxed);

        for event in batch.account_data.events {
            self.notices.emit(SyncNotice::AccountData(event));
        }
        for event in batch.presence.events {
            self.notices.emit(SyncNotice::Presence(event));
        }

        let rooms = batch.rooms;
        for (room_id, room) in rooms.join {
            self.emit_room_events(&room_id, Membership::Join, room.state.events);
            self.emit_room_events(&room_id, Membership::Join, room.timeline.events);
        }
        for (room_id, room) in rooms.invite {
            self.emit_room_events(&room_id, Membership::Invite, room.invite_state.events);
        }
        for (room_id, room) in rooms.leave {
            self.emit_room_events(&room_id, Membership::Leave, room.timeline.events);
        }

        self.emit_status(true, None);
        Ok(())
    }
}
