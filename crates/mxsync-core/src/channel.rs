use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{Event, Membership};

/// Broadcast receiver handed to notice subscribers.
pub type NoticeStream = broadcast::Receiver<SyncNotice>;

/// Liveness report of a sync loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStatus {
    pub running: bool,
    /// Backoff currently being waited out, if any.
    pub lag_hint_ms: Option<u64>,
}

/// Notification emitted while a sync batch is applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SyncNotice {
    Status(SyncStatus),
    /// Global account data event.
    AccountData(Event),
    Presence(Event),
    /// Room-scoped state, timeline, or invite-state event.
    RoomEvent {
        room_id: String,
        membership: Membership,
        event: Event,
    },
}

/// Fan-out channel for [`SyncNotice`]s.
#[derive(Clone, Debug)]
pub struct SyncNotices {
    tx: broadcast::Sender<SyncNotice>,
}

impl SyncNotices {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> NoticeStream {
        self.tx.subscribe()
    }

    /// Emit a notice to all subscribers.
    ///
    /// Emission is best-effort; with no subscribers the notice is dropped and
    /// lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, notice: SyncNotice) {
        let _ = self.tx.send(notice);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SyncNotices {
    fn default() -> Self {
        Self::new(512)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fans_out_notices_to_subscribers() {
        let notices = SyncNotices::new(16);
        let mut a = notices.subscribe();
        let mut b = notices.subscribe();
        assert_eq!(notices.subscriber_count(), 2);

        notices.emit(SyncNotice::Status(SyncStatus {
            running: true,
            lag_hint_ms: None,
        }));

        let notice_a = a.recv().await.expect("subscriber a should receive notice");
        let notice_b = b.recv().await.expect("subscriber b should receive notice");
        assert_eq!(notice_a, notice_b);
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let notices = SyncNotices::new(0);
        notices.emit(SyncNotice::Presence(Event::default()));
        assert_eq!(notices.subscriber_count(), 0);
    }
}
