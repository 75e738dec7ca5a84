//! Realtime subscription and the resync backstop.
//!
//! The stream task keeps the organization's SSE connection open, decodes
//! pushed events and forwards them as [`SyncUpdate`]s.  When the
//! connection drops it retries on an explicit [`ReconnectPolicy`]: linear
//! backoff, a fixed attempt budget, then a terminal give-up that only a
//! fresh session clears.  Losing the stream is never fatal; it surfaces
//! as one [`SyncUpdate::Offline`] so the UI can show a passing warning.
//!
//! Independently, a timer refetches the currently open conversation every
//! [`RESYNC_INTERVAL_SECS`] seconds.  That snapshot catches whatever the
//! push path missed; it is a correctness backstop, not the primary way
//! updates arrive.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use guichet_shared::constants::{
    RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_ATTEMPTS, RESYNC_INTERVAL_SECS,
};
use guichet_shared::events::RealtimeEvent;
use guichet_shared::models::Message;
use guichet_shared::types::{ConversationId, OrgId};

use crate::api::ApiClient;
use crate::ops;

/// Everything the subscription delivers to the UI loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncUpdate {
    /// A pushed event, to be applied through the inbox.
    Event(RealtimeEvent),

    /// Fresh page of the open conversation, fetched by the backstop.
    Snapshot {
        conversation_id: ConversationId,
        messages: Vec<Message>,
    },

    /// The stream was abandoned after the attempt budget ran out.
    Offline,
}

/// Reconnect bookkeeping, separated from the task that uses it so the
/// arithmetic is testable without a socket.
#[derive(Debug)]
pub struct ReconnectPolicy {
    attempts: u32,
    max_attempts: u32,
    gave_up: bool,
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            max_attempts: RECONNECT_MAX_ATTEMPTS,
            gave_up: false,
        }
    }

    /// How long to wait before the next attempt, or `None` once the
    /// budget is spent.  Giving up is sticky until [`reset`](Self::reset).
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.gave_up {
            return None;
        }
        self.attempts += 1;
        if self.attempts > self.max_attempts {
            self.gave_up = true;
            return None;
        }
        Some(Duration::from_millis(
            u64::from(self.attempts) * RECONNECT_BASE_DELAY_MS,
        ))
    }

    /// Called after a successful connect: the next outage starts fresh.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.gave_up = false;
    }

    pub fn gave_up(&self) -> bool {
        self.gave_up
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner handle for the two background tasks.  Dropping it stops them;
/// [`release`](Self::release) is the explicit teardown used on sign-out.
pub struct RealtimeHandle {
    tasks: Vec<JoinHandle<()>>,
    open_tx: watch::Sender<Option<ConversationId>>,
}

impl RealtimeHandle {
    /// Tells the backstop which conversation to reconcile, or `None`
    /// while no thread is open.
    pub fn set_open_conversation(&self, conversation: Option<ConversationId>) {
        let _ = self.open_tx.send(conversation);
    }

    /// Stops the stream and the resync timer.
    pub fn release(self) {}
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Starts the subscription for one organization.  The receiver is the
/// UI loop's inbox feed; dropping it also winds the tasks down.
pub fn connect(
    api: ApiClient,
    org_id: OrgId,
) -> (RealtimeHandle, mpsc::UnboundedReceiver<SyncUpdate>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (open_tx, open_rx) = watch::channel(None);

    let stream = tokio::spawn(run_stream(api.clone(), org_id, tx.clone()));
    let resync = tokio::spawn(run_resync(api, org_id, open_rx, tx));

    (
        RealtimeHandle {
            tasks: vec![stream, resync],
            open_tx,
        },
        rx,
    )
}

async fn run_stream(api: ApiClient, org_id: OrgId, tx: mpsc::UnboundedSender<SyncUpdate>) {
    let mut policy = ReconnectPolicy::new();
    loop {
        match api.open_events(org_id).await {
            Ok(response) => {
                debug!(org = %org_id, "Event stream connected");
                policy.reset();
                let mut events = response.bytes_stream().eventsource();
                while let Some(item) = events.next().await {
                    match item {
                        Ok(event) => {
                            if event.data.is_empty() {
                                continue;
                            }
                            match RealtimeEvent::from_json(&event.data) {
                                Ok(update) => {
                                    if tx.send(SyncUpdate::Event(update)).is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "Undecodable event on the stream")
                                }
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Event stream interrupted");
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "Event stream connection failed"),
        }

        match policy.next_delay() {
            Some(delay) => tokio::time::sleep(delay).await,
            None => {
                warn!(
                    org = %org_id,
                    attempts = RECONNECT_MAX_ATTEMPTS,
                    "Event stream abandoned; resync keeps the open thread current"
                );
                let _ = tx.send(SyncUpdate::Offline);
                return;
            }
        }
    }
}

async fn run_resync(
    api: ApiClient,
    org_id: OrgId,
    open_rx: watch::Receiver<Option<ConversationId>>,
    tx: mpsc::UnboundedSender<SyncUpdate>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(RESYNC_INTERVAL_SECS));
    // The first tick fires immediately; the stream covers that moment.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let open = *open_rx.borrow();
        let Some(conversation_id) = open else {
            continue;
        };
        match ops::conversations::messages(
            &api,
            org_id,
            conversation_id,
            ops::conversations::PAGE_SIZE,
            0,
        )
        .await
        {
            Ok(messages) => {
                let update = SyncUpdate::Snapshot {
                    conversation_id,
                    messages,
                };
                if tx.send(update).is_err() {
                    return;
                }
            }
            Err(e) => warn!(error = %e, "Resync fetch failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_linearly_then_gives_up() {
        let mut policy = ReconnectPolicy::new();
        let delays: Vec<Option<Duration>> = (0..6).map(|_| policy.next_delay()).collect();

        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(1000)),
                Some(Duration::from_millis(2000)),
                Some(Duration::from_millis(3000)),
                Some(Duration::from_millis(4000)),
                Some(Duration::from_millis(5000)),
                None,
            ]
        );
        assert!(policy.gave_up());
    }

    #[test]
    fn test_give_up_is_sticky() {
        let mut policy = ReconnectPolicy::new();
        while policy.next_delay().is_some() {}
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.next_delay(), None);
        assert!(policy.gave_up());
    }

    #[test]
    fn test_reset_rearms_the_policy() {
        let mut policy = ReconnectPolicy::new();
        while policy.next_delay().is_some() {}
        assert!(policy.gave_up());

        policy.reset();
        assert!(!policy.gave_up());
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
    }
}
