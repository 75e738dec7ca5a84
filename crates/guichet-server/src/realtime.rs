//! Per-organization realtime event fan-out.
//!
//! Each organization gets one broadcast channel, created lazily on first
//! subscribe or publish.  Connected dashboards consume it over SSE; slow
//! consumers that fall more than [`CHANNEL_CAPACITY`] events behind are
//! lagged by the broadcast channel and recover through the client's
//! periodic resync.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use guichet_shared::events::RealtimeEvent;
use guichet_shared::types::OrgId;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventHub {
    channels: Arc<RwLock<HashMap<OrgId, broadcast::Sender<RealtimeEvent>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn subscribe(&self, org_id: OrgId) -> broadcast::Receiver<RealtimeEvent> {
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(org_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        tx.subscribe()
    }

    pub async fn publish(&self, org_id: OrgId, event: RealtimeEvent) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(&org_id) {
            // A send error just means nobody is listening right now.
            let _ = tx.send(event);
        }
    }

    /// Drop channels whose last subscriber has disconnected.
    pub async fn purge_idle(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
    }

    pub async fn active_channels(&self) -> usize {
        let channels = self.channels.read().await;
        channels.len()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn a subscription into an SSE response.  Lagged receivers produce a
/// gap, not an error; the event stream simply continues from the present.
pub fn sse_response(
    org_id: OrgId,
    receiver: broadcast::Receiver<RealtimeEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let topic = org_id.to_topic();
    let stream = BroadcastStream::new(receiver).filter_map(move |item| {
        let topic = topic.clone();
        async move {
            match item {
                Ok(event) => match event.to_json() {
                    Ok(json) => Some(Ok(Event::default().event(event.name()).data(json))),
                    Err(e) => {
                        debug!(topic = %topic, error = %e, "Dropping unserializable event");
                        None
                    }
                },
                Err(e) => {
                    debug!(topic = %topic, error = %e, "Subscriber lagged");
                    None
                }
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use guichet_shared::types::{ConversationId, MessageId, MessageStatus};

    fn status_event() -> RealtimeEvent {
        RealtimeEvent::MessageStatus {
            message_id: MessageId::new(),
            conversation_id: ConversationId::new(),
            status: MessageStatus::Delivered,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let hub = EventHub::new();
        let org = OrgId::new();

        let mut rx = hub.subscribe(org).await;
        hub.publish(org, status_event()).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "message_status");
    }

    #[tokio::test]
    async fn events_stay_inside_their_organization() {
        let hub = EventHub::new();
        let org_a = OrgId::new();
        let org_b = OrgId::new();

        let mut rx_a = hub.subscribe(org_a).await;
        let mut rx_b = hub.subscribe(org_b).await;

        hub.publish(org_a, status_event()).await;

        assert!(rx_a.recv().await.is_ok());
        assert!(matches!(
            rx_b.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn purge_drops_abandoned_channels() {
        let hub = EventHub::new();
        let org = OrgId::new();

        let rx = hub.subscribe(org).await;
        assert_eq!(hub.active_channels().await, 1);

        drop(rx);
        hub.purge_idle().await;
        assert_eq!(hub.active_channels().await, 0);
    }
}
