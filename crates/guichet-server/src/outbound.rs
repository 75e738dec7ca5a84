//! The one path every outbound message takes.
//!
//! Manual sends, campaign blasts and workflow steps all end here: resolve
//! the destination address, hand the rendered content to the channel's
//! provider, persist the message row and broadcast the realtime events the
//! dashboards react to.

use chrono::Utc;
use tokio::sync::Mutex;

use guichet_shared::events::RealtimeEvent;
use guichet_shared::models::{Contact, Message};
use guichet_shared::types::{
    CampaignId, Direction, EnrollmentId, MessageChannel, MessageId, MessageStatus, OrgId, UserId,
};
use guichet_store::Database;

use crate::error::ServerError;
use crate::realtime::EventHub;
use crate::senders::{OutboundPayload, SenderSet};

/// Content and provenance of one outbound message.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub org_id: OrgId,
    pub channel: MessageChannel,
    pub subject: Option<String>,
    pub body: String,
    /// Agent who typed the message, for manual sends.
    pub author_id: Option<UserId>,
    pub campaign_id: Option<CampaignId>,
    pub enrollment_id: Option<EnrollmentId>,
}

/// Destination address for the channel, or a human-readable reason why the
/// contact cannot be reached on it.
pub fn resolve_address(contact: &Contact, channel: MessageChannel) -> Result<String, String> {
    match channel {
        MessageChannel::Email => contact
            .email
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| "Contact has no email address".to_string()),
        MessageChannel::WhatsappTemplate => contact
            .phone
            .clone()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| "Contact has no phone number".to_string()),
    }
}

/// Persist an outbound message row and broadcast the matching events.
///
/// Creates the contact's conversation on first touch.  Publishes
/// `conversation_new` when that happens, then `message_new` and
/// `conversation_updated`.
pub async fn record_outbound(
    db: &Mutex<Database>,
    hub: &EventHub,
    contact: &Contact,
    outbound: &Outbound,
    status: MessageStatus,
    error: Option<String>,
) -> Result<Message, ServerError> {
    let now = Utc::now();

    let (message, conversation, created) = {
        let db = db.lock().await;
        let (conversation, created) =
            db.get_or_create_conversation(outbound.org_id, contact.id)?;

        let message = Message {
            id: MessageId::new(),
            org_id: outbound.org_id,
            conversation_id: conversation.id,
            direction: Direction::Outbound,
            body: outbound.body.clone(),
            status,
            timestamp: now,
            author_id: outbound.author_id,
            campaign_id: outbound.campaign_id,
            enrollment_id: outbound.enrollment_id,
            error,
            created_at: now,
        };
        db.insert_message(&message)?;
        db.touch_conversation(outbound.org_id, conversation.id, now, false)?;
        let conversation = db.get_conversation(outbound.org_id, conversation.id)?;

        (message, conversation, created)
    };

    if created {
        hub.publish(
            outbound.org_id,
            RealtimeEvent::ConversationNew {
                conversation: conversation.clone(),
            },
        )
        .await;
    }
    hub.publish(
        outbound.org_id,
        RealtimeEvent::MessageNew {
            message: message.clone(),
        },
    )
    .await;
    hub.publish(
        outbound.org_id,
        RealtimeEvent::ConversationUpdated { conversation },
    )
    .await;

    Ok(message)
}

/// Full delivery: resolve the address, call the provider, persist the
/// outcome.  Provider rejection and an unreachable contact are not errors
/// here; they come back as a persisted message with status `failed`, which
/// is what the dispatcher inspects for its retry decisions.
pub async fn deliver(
    db: &Mutex<Database>,
    hub: &EventHub,
    senders: &SenderSet,
    contact: &Contact,
    outbound: &Outbound,
) -> Result<Message, ServerError> {
    let (status, error) = match resolve_address(contact, outbound.channel) {
        Ok(to) => {
            let payload = OutboundPayload {
                to,
                subject: outbound.subject.clone(),
                body: outbound.body.clone(),
            };
            match senders.for_channel(outbound.channel).send(&payload).await {
                Ok(()) => (MessageStatus::Sent, None),
                Err(e) => (MessageStatus::Failed, Some(e.to_string())),
            }
        }
        Err(reason) => (MessageStatus::Failed, Some(reason)),
    };

    record_outbound(db, hub, contact, outbound, status, error).await
}
