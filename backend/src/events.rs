//! Event broadcasting from the streamer core to its consumers.
//!
//! The core never calls into consumer code. Events are pushed into a bounded
//! broadcast queue; each consumer drains its own receiver, either blocking
//! on a dedicated thread or as an async stream, and does any runtime-specific
//! marshalling on its side.

use futures::Stream;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};
use uplink_types::StreamerEvent;

/// Event broadcaster for streamer events.
#[derive(Clone)]
pub struct EventBroadcaster {
    /// Broadcast channel for events
    sender: Arc<broadcast::Sender<StreamerEvent>>,
}

impl EventBroadcaster {
    /// Create a new event broadcaster with a buffer size.
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Broadcast an event to all subscribers.
    pub fn broadcast(&self, event: StreamerEvent) {
        debug!("Broadcasting event: {}", event.description());
        // Nobody listening is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe and get a raw receiver.
    ///
    /// `try_recv`/`blocking_recv` work from plain threads, so a bridge to a
    /// foreign runtime can drain it without an async executor.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamerEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as an async stream. Lagged events are skipped with a warning.
    pub fn stream(&self) -> impl Stream<Item = StreamerEvent> {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|result| match result {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Event consumer lagging, skipping events: {}", e);
                None
            }
        })
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100) // Default buffer of 100 events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcaster_creation() {
        let broadcaster = EventBroadcaster::new(10);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_broadcast_without_subscribers_is_ignored() {
        let broadcaster = EventBroadcaster::new(10);
        broadcaster.broadcast(StreamerEvent::Error {
            session_id: None,
            message: "nobody listens".to_string(),
        });
    }

    #[test]
    fn test_subscriber_receives_in_order() {
        let broadcaster = EventBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        for running in [true, false] {
            broadcaster.broadcast(StreamerEvent::StateChanged {
                session_id: None,
                running,
                message: String::new(),
            });
        }

        assert!(matches!(
            rx.try_recv(),
            Ok(StreamerEvent::StateChanged { running: true, .. })
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(StreamerEvent::StateChanged { running: false, .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stream_yields_events() {
        let broadcaster = EventBroadcaster::new(10);
        let stream = broadcaster.stream();
        tokio::pin!(stream);

        broadcaster.broadcast(StreamerEvent::Error {
            session_id: None,
            message: "engine said no".to_string(),
        });

        let event = stream.next().await.unwrap();
        assert!(event.is_error());
    }
}
