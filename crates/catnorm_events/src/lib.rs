//! Process-local event bus: one broadcast channel shared by every session.
//!
//! Built on `tokio::sync::broadcast` rather than a hand-rolled fan-out list:
//! a bounded ring buffer per subscriber gives slow-consumer isolation for
//! free (a lagging receiver gets `RecvError::Lagged` and catches up by
//! skipping, it never blocks the producer).

use catnorm_ids::SessionId;
use catnorm_protocol::Event;
use tokio::sync::broadcast;

/// Default ring buffer size per subscriber. Sized generously: a stage
/// emitting progress every 10 rows on a million-row source still leaves
/// headroom before a merely-slow subscriber starts dropping events.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Never blocks: if there are no subscribers, or every
    /// subscriber's buffer is full, the send is a no-op from the producer's
    /// point of view (`broadcast::Sender::send` only errors when there are
    /// zero receivers, which this bus treats as expected and ignores).
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to every event on the bus, filtering client-side on
    /// `session_id` is the caller's job via [`EventStream`].
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Subscribe scoped to a single session, or every session when `None`.
    pub fn subscribe_filtered(&self, session_id_filter: Option<SessionId>) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
            session_id_filter,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscription optionally scoped to one session. Lag is surfaced to the
/// caller as a skip rather than swallowed, so metrics can track how often
/// subscribers fall behind.
pub struct EventStream {
    receiver: broadcast::Receiver<Event>,
    session_id_filter: Option<SessionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// The bus has been dropped and will never emit again.
    Closed,
}

impl EventStream {
    /// Await the next event matching this subscription's filter, skipping
    /// non-matching events and silently resuming past lag gaps.
    pub async fn recv(&mut self) -> Result<Event, RecvOutcome> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    let matches = match self.session_id_filter {
                        Some(wanted) => wanted == event.session_id,
                        None => true,
                    };
                    if matches {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged, skipping to catch up");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Err(RecvOutcome::Closed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catnorm_protocol::EventPayload;

    #[tokio::test]
    async fn publish_reaches_matching_subscriber() {
        let bus = EventBus::new();
        let session_id = SessionId::new();
        let mut stream = bus.subscribe_filtered(Some(session_id));

        bus.publish(Event::new(session_id, EventPayload::DatabaseStarted));
        let received = stream.recv().await.unwrap();
        assert_eq!(received.session_id, session_id);
    }

    #[tokio::test]
    async fn subscriber_ignores_other_sessions() {
        let bus = EventBus::new();
        let wanted = SessionId::new();
        let other = SessionId::new();
        let mut stream = bus.subscribe_filtered(Some(wanted));

        bus.publish(Event::new(other, EventPayload::DatabaseStarted));
        bus.publish(Event::new(wanted, EventPayload::DatabaseCompleted));

        let received = stream.recv().await.unwrap();
        assert_eq!(received.session_id, wanted);
    }

    #[tokio::test]
    async fn unfiltered_subscription_sees_every_session() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe_filtered(None);
        let a = SessionId::new();
        let b = SessionId::new();
        bus.publish(Event::new(a, EventPayload::DatabaseStarted));
        bus.publish(Event::new(b, EventPayload::DatabaseStarted));

        let first = stream.recv().await.unwrap();
        let second = stream.recv().await.unwrap();
        assert_eq!(first.session_id, a);
        assert_eq!(second.session_id, b);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::new(SessionId::new(), EventPayload::DatabaseStarted));
    }

    #[tokio::test]
    async fn lagging_subscriber_catches_up_instead_of_blocking_producer() {
        let bus = EventBus::with_capacity(2);
        let session_id = SessionId::new();
        let mut stream = bus.subscribe_filtered(Some(session_id));

        for _ in 0..10 {
            bus.publish(Event::new(session_id, EventPayload::DatabaseStarted));
        }
        // should not hang despite the buffer having overflowed several times over
        let received = stream.recv().await.unwrap();
        assert_eq!(received.session_id, session_id);
    }
}
