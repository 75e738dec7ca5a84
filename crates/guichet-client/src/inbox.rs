//! Local cache of conversations and messages.
//!
//! The inbox applies realtime events as they arrive and optimistic rows
//! ahead of server confirmation.  Redelivered events are dropped through
//! a transient seen-set keyed by message id plus timestamp, the same key
//! [`RealtimeEvent::dedup_key`] exposes; the set lives only as long as
//! the session.  Ordering is tolerant by construction: a late event or a
//! resync snapshot may arrive in any order without corrupting the cache.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use guichet_shared::events::RealtimeEvent;
use guichet_shared::models::{Conversation, Message};
use guichet_shared::types::{
    ConversationId, Direction, MessageChannel, MessageId, MessageStatus, OrgId, UserId,
};

use crate::api::ApiClient;
use crate::error::ClientError;
use crate::ops;

#[derive(Default)]
pub struct Inbox {
    conversations: HashMap<ConversationId, Conversation>,
    /// Per-thread history, ascending by timestamp.
    messages: HashMap<ConversationId, Vec<Message>>,
    seen: HashSet<(MessageId, DateTime<Utc>)>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops everything, including the seen-set.  Called on sign-out.
    pub fn clear(&mut self) {
        self.conversations.clear();
        self.messages.clear();
        self.seen.clear();
    }

    pub fn replace_conversations(&mut self, conversations: Vec<Conversation>) {
        self.conversations = conversations.into_iter().map(|c| (c.id, c)).collect();
    }

    pub fn upsert_conversation(&mut self, conversation: Conversation) {
        self.conversations.insert(conversation.id, conversation);
    }

    /// Replaces a thread's history with a freshly fetched page and marks
    /// every row as seen, so the stream redelivering one of them is a
    /// no-op.  Used for the initial load and the periodic resync.
    pub fn replace_messages(&mut self, conversation_id: ConversationId, mut page: Vec<Message>) {
        page.sort_by_key(|m| m.timestamp);
        for message in &page {
            self.seen.insert((message.id, message.timestamp));
        }
        self.messages.insert(conversation_id, page);
    }

    /// Applies one pushed event.  Returns false when the event was a
    /// redelivery and nothing changed.
    pub fn apply_event(&mut self, event: &RealtimeEvent) -> bool {
        if let Some(key) = event.dedup_key() {
            if !self.seen.insert(key) {
                return false;
            }
        }
        match event {
            RealtimeEvent::MessageNew { message } => {
                self.insert_message(message.clone());
            }
            RealtimeEvent::ConversationNew { conversation }
            | RealtimeEvent::ConversationUpdated { conversation } => {
                self.conversations.insert(conversation.id, conversation.clone());
            }
            RealtimeEvent::MessageStatus {
                message_id,
                conversation_id,
                status,
                ..
            } => {
                if let Some(thread) = self.messages.get_mut(conversation_id) {
                    if let Some(message) = thread.iter_mut().find(|m| m.id == *message_id) {
                        // Receipts can arrive out of order; never regress.
                        if status.rank() > message.status.rank() {
                            message.status = *status;
                        }
                    }
                }
            }
        }
        true
    }

    /// Inserts a provisional outbound row and returns its id.  The row is
    /// pending until [`confirm_send`](Self::confirm_send) swaps in the
    /// server's copy or [`fail_send`](Self::fail_send) removes it.
    pub fn begin_send(
        &mut self,
        org_id: OrgId,
        conversation_id: ConversationId,
        author_id: UserId,
        body: &str,
    ) -> MessageId {
        let now = Utc::now();
        let message = Message {
            id: MessageId::new(),
            org_id,
            conversation_id,
            direction: Direction::Outbound,
            body: body.to_string(),
            status: MessageStatus::Pending,
            timestamp: now,
            author_id: Some(author_id),
            campaign_id: None,
            enrollment_id: None,
            error: None,
            created_at: now,
        };
        let id = message.id;
        self.insert_message(message);
        id
    }

    /// The send went through: drop the provisional row and adopt the
    /// server's.  If the stream already delivered it, the seen-set stops
    /// a second copy.
    pub fn confirm_send(
        &mut self,
        conversation_id: ConversationId,
        provisional: MessageId,
        message: Message,
    ) {
        self.remove_message(conversation_id, provisional);
        if self.seen.insert((message.id, message.timestamp)) {
            self.insert_message(message);
        }
    }

    /// The send failed: remove the provisional row, leaving the rest of
    /// the thread exactly as it was.
    pub fn fail_send(&mut self, conversation_id: ConversationId, provisional: MessageId) {
        self.remove_message(conversation_id, provisional);
    }

    pub fn conversation(&self, id: ConversationId) -> Option<&Conversation> {
        self.conversations.get(&id)
    }

    /// All threads, most recent activity first.  Threads that never got a
    /// message sort last.
    pub fn ordered_conversations(&self) -> Vec<&Conversation> {
        let mut all: Vec<&Conversation> = self.conversations.values().collect();
        all.sort_by(|a, b| match (b.last_message_at, a.last_message_at) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (None, None) => b.created_at.cmp(&a.created_at),
        });
        all
    }

    pub fn messages(&self, conversation_id: ConversationId) -> &[Message] {
        self.messages
            .get(&conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn insert_message(&mut self, message: Message) {
        let thread = self.messages.entry(message.conversation_id).or_default();
        let at = thread.partition_point(|m| m.timestamp <= message.timestamp);
        thread.insert(at, message);
    }

    fn remove_message(&mut self, conversation_id: ConversationId, id: MessageId) {
        if let Some(thread) = self.messages.get_mut(&conversation_id) {
            thread.retain(|m| m.id != id);
        }
    }
}

/// Sends a manual message with the optimistic pattern: the row shows up
/// pending right away, is swapped for the server's copy on success, and
/// disappears again when the call fails.
pub async fn send_with_rollback(
    api: &ApiClient,
    inbox: &mut Inbox,
    org_id: OrgId,
    conversation_id: ConversationId,
    channel: MessageChannel,
    author_id: UserId,
    body: &str,
) -> Result<Message, ClientError> {
    let provisional = inbox.begin_send(org_id, conversation_id, author_id, body);
    match ops::conversations::send_message(api, org_id, conversation_id, channel, body).await {
        Ok(message) => {
            inbox.confirm_send(conversation_id, provisional, message.clone());
            Ok(message)
        }
        Err(e) => {
            inbox.fail_send(conversation_id, provisional);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use chrono::Duration;

    fn conversation(org_id: OrgId, last: Option<DateTime<Utc>>) -> Conversation {
        Conversation {
            id: ConversationId::new(),
            org_id,
            contact_id: guichet_shared::types::ContactId::new(),
            last_message_at: last,
            unread_count: 0,
            created_at: Utc::now(),
        }
    }

    fn message(org_id: OrgId, conversation_id: ConversationId, body: &str) -> Message {
        Message {
            id: MessageId::new(),
            org_id,
            conversation_id,
            direction: Direction::Inbound,
            body: body.to_string(),
            status: MessageStatus::Delivered,
            timestamp: Utc::now(),
            author_id: None,
            campaign_id: None,
            enrollment_id: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn redelivered_event_is_dropped() {
        let mut inbox = Inbox::new();
        let org = OrgId::new();
        let conv = ConversationId::new();
        let msg = message(org, conv, "hello");
        let event = RealtimeEvent::MessageNew {
            message: msg.clone(),
        };

        assert!(inbox.apply_event(&event));
        assert!(!inbox.apply_event(&event));
        assert_eq!(inbox.messages(conv).len(), 1);
    }

    #[test]
    fn failed_send_rolls_back_only_its_row() {
        let mut inbox = Inbox::new();
        let org = OrgId::new();
        let conv = ConversationId::new();
        inbox.replace_messages(conv, vec![message(org, conv, "earlier"), message(org, conv, "later")]);

        let provisional = inbox.begin_send(org, conv, UserId::new(), "on its way");
        assert_eq!(inbox.messages(conv).len(), 3);

        inbox.fail_send(conv, provisional);
        let bodies: Vec<&str> = inbox.messages(conv).iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["earlier", "later"]);
        assert!(inbox
            .messages(conv)
            .iter()
            .all(|m| m.status != MessageStatus::Pending));
    }

    #[test]
    fn confirmed_send_adopts_the_server_row_and_blocks_the_echo() {
        let mut inbox = Inbox::new();
        let org = OrgId::new();
        let conv = ConversationId::new();

        let provisional = inbox.begin_send(org, conv, UserId::new(), "hi");
        let mut server_row = message(org, conv, "hi");
        server_row.direction = Direction::Outbound;
        server_row.status = MessageStatus::Sent;

        inbox.confirm_send(conv, provisional, server_row.clone());
        assert_eq!(inbox.messages(conv).len(), 1);
        assert_eq!(inbox.messages(conv)[0].id, server_row.id);

        // The stream echoes the same message later; it must not duplicate.
        let echoed = inbox.apply_event(&RealtimeEvent::MessageNew {
            message: server_row,
        });
        assert!(!echoed);
        assert_eq!(inbox.messages(conv).len(), 1);
    }

    #[test]
    fn stream_echo_arriving_before_the_confirm_does_not_duplicate() {
        let mut inbox = Inbox::new();
        let org = OrgId::new();
        let conv = ConversationId::new();

        let provisional = inbox.begin_send(org, conv, UserId::new(), "hi");
        let mut server_row = message(org, conv, "hi");
        server_row.direction = Direction::Outbound;
        server_row.status = MessageStatus::Sent;

        // Push beats the HTTP response.
        assert!(inbox.apply_event(&RealtimeEvent::MessageNew {
            message: server_row.clone(),
        }));
        inbox.confirm_send(conv, provisional, server_row.clone());

        let copies = inbox
            .messages(conv)
            .iter()
            .filter(|m| m.id == server_row.id)
            .count();
        assert_eq!(copies, 1);
        assert_eq!(inbox.messages(conv).len(), 1);
    }

    #[test]
    fn late_receipt_does_not_regress_status() {
        let mut inbox = Inbox::new();
        let org = OrgId::new();
        let conv = ConversationId::new();
        let mut msg = message(org, conv, "hi");
        msg.status = MessageStatus::Sent;
        let id = msg.id;
        inbox.replace_messages(conv, vec![msg]);

        let delivered = RealtimeEvent::MessageStatus {
            message_id: id,
            conversation_id: conv,
            status: MessageStatus::Delivered,
            timestamp: Utc::now(),
        };
        let late_sent = RealtimeEvent::MessageStatus {
            message_id: id,
            conversation_id: conv,
            status: MessageStatus::Sent,
            timestamp: Utc::now() + Duration::seconds(1),
        };

        assert!(inbox.apply_event(&delivered));
        assert!(inbox.apply_event(&late_sent));
        assert_eq!(inbox.messages(conv)[0].status, MessageStatus::Delivered);
    }

    #[test]
    fn snapshot_seeds_the_dedup_set() {
        let mut inbox = Inbox::new();
        let org = OrgId::new();
        let conv = ConversationId::new();
        let msg = message(org, conv, "already here");

        inbox.replace_messages(conv, vec![msg.clone()]);
        let applied = inbox.apply_event(&RealtimeEvent::MessageNew { message: msg });
        assert!(!applied);
        assert_eq!(inbox.messages(conv).len(), 1);
    }

    #[test]
    fn conversations_order_by_recency() {
        let mut inbox = Inbox::new();
        let org = OrgId::new();
        let now = Utc::now();

        let stale = conversation(org, Some(now - Duration::hours(2)));
        let fresh = conversation(org, Some(now));
        let empty = conversation(org, None);
        inbox.replace_conversations(vec![stale.clone(), empty.clone(), fresh.clone()]);

        let ordered: Vec<ConversationId> =
            inbox.ordered_conversations().iter().map(|c| c.id).collect();
        assert_eq!(ordered, vec![fresh.id, stale.id, empty.id]);
    }

    #[tokio::test]
    async fn unreachable_server_rolls_the_send_back() {
        // Nothing listens on this address, so the send must fail remotely.
        let api = ApiClient::new(&ClientConfig::new("http://127.0.0.1:1"));
        let mut inbox = Inbox::new();
        let org = OrgId::new();
        let conv = ConversationId::new();
        inbox.replace_messages(conv, vec![message(org, conv, "kept")]);

        let err = send_with_rollback(
            &api,
            &mut inbox,
            org,
            conv,
            MessageChannel::Email,
            UserId::new(),
            "never arrives",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ClientError::Remote(_)));
        let bodies: Vec<&str> = inbox.messages(conv).iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["kept"]);
    }
}
