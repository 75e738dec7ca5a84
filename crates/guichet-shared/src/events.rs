use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Conversation, Message};
use crate::types::{ConversationId, MessageId, MessageStatus};

/// All events pushed on an organization's realtime stream.
///
/// Serialized as tagged JSON so SSE consumers in any language can handle
/// them; the tag doubles as the SSE event name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// A message was added to a conversation (either direction).
    MessageNew { message: Message },

    /// A conversation appeared for the first time.
    ConversationNew { conversation: Conversation },

    /// A conversation's metadata changed (last activity, unread count).
    ConversationUpdated { conversation: Conversation },

    /// A delivery receipt moved a message's status forward.
    MessageStatus {
        message_id: MessageId,
        conversation_id: ConversationId,
        status: MessageStatus,
        /// When the receipt happened at the provider.
        timestamp: DateTime<Utc>,
    },
}

impl RealtimeEvent {
    /// SSE event name, equal to the JSON tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageNew { .. } => "message_new",
            Self::ConversationNew { .. } => "conversation_new",
            Self::ConversationUpdated { .. } => "conversation_updated",
            Self::MessageStatus { .. } => "message_status",
        }
    }

    /// Key used to drop redelivered events.  Only message-bearing events
    /// participate; conversation updates are idempotent by construction.
    pub fn dedup_key(&self) -> Option<(MessageId, DateTime<Utc>)> {
        match self {
            Self::MessageNew { message } => Some((message.id, message.timestamp)),
            Self::MessageStatus {
                message_id,
                timestamp,
                ..
            } => Some((*message_id, *timestamp)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}
