//! Inbox endpoints: conversations, message history, manual sends, the
//! inbound webhook stand-in and delivery receipts.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use guichet_shared::constants::MAX_MESSAGE_BODY;
use guichet_shared::events::RealtimeEvent;
use guichet_shared::models::{Conversation, Message};
use guichet_shared::types::{
    ContactId, ConversationId, Direction, EnrollmentStatus, MessageChannel, MessageId,
    MessageStatus, OrgId,
};

use guichet_store::StoreError;

use crate::api::AppState;
use crate::auth::authenticate_org;
use crate::error::ServerError;
use crate::outbound::{self, Outbound};
use crate::permissions::{require, Permission};
use crate::senders::OutboundPayload;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orgs/:org_id/conversations", get(list_conversations))
        .route("/orgs/:org_id/conversations/:id", get(get_conversation))
        .route(
            "/orgs/:org_id/conversations/:id/messages",
            get(list_messages).post(send_message),
        )
        .route("/orgs/:org_id/conversations/:id/read", post(mark_read))
        .route("/orgs/:org_id/inbound", post(simulate_inbound))
        .route("/orgs/:org_id/messages/:id/status", post(apply_receipt))
}

const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 200;

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    offset: Option<u32>,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    channel: MessageChannel,
    body: String,
}

#[derive(Deserialize)]
struct InboundRequest {
    contact_id: ContactId,
    body: String,
}

#[derive(Deserialize)]
struct ReceiptRequest {
    status: MessageStatus,
    /// When the receipt happened at the provider; defaults to now.
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct ReceiptResponse {
    /// False when the receipt arrived late and the status already moved past.
    advanced: bool,
    message: Message,
}

fn check_body(body: &str) -> Result<(), ServerError> {
    if body.trim().is_empty() {
        return Err(ServerError::BadRequest("body: must not be empty".into()));
    }
    if body.len() > MAX_MESSAGE_BODY {
        return Err(ServerError::BadRequest(format!(
            "body: longer than {MAX_MESSAGE_BODY} bytes"
        )));
    }
    Ok(())
}

async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
) -> Result<Json<Vec<Conversation>>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.list_conversations(org_id)?))
}

async fn get_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, ConversationId)>,
) -> Result<Json<Conversation>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.get_conversation(org_id, id)?))
}

/// Newest first, so page zero is the bottom of the thread.
async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, ConversationId)>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;

    let limit = page.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
    let offset = page.offset.unwrap_or(0);
    let db = state.db.lock().await;
    db.get_conversation(org_id, id)?;
    Ok(Json(db.list_messages(org_id, id, limit, offset)?))
}

/// Manual send from the inbox.
///
/// The provider is called before anything is written: on rejection the
/// caller gets an error and no message row exists.
async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, ConversationId)>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Message>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;
    check_body(&req.body)?;

    let contact = {
        let db = state.db.lock().await;
        let conversation = db.get_conversation(org_id, id)?;
        db.get_contact(org_id, conversation.contact_id)?
    };
    let to = outbound::resolve_address(&contact, req.channel).map_err(ServerError::BadRequest)?;

    let payload = OutboundPayload {
        to,
        subject: None,
        body: req.body.clone(),
    };
    state
        .senders
        .for_channel(req.channel)
        .send(&payload)
        .await
        .map_err(|e| ServerError::Upstream(e.to_string()))?;

    let message = outbound::record_outbound(
        &state.db,
        &state.hub,
        &contact,
        &Outbound {
            org_id,
            channel: req.channel,
            subject: None,
            body: req.body,
            author_id: Some(session.user.id),
            campaign_id: None,
            enrollment_id: None,
        },
        MessageStatus::Sent,
        None,
    )
    .await?;
    Ok(Json(message))
}

async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, ConversationId)>,
) -> Result<Json<Conversation>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;

    let conversation = {
        let db = state.db.lock().await;
        if !db.mark_conversation_read(org_id, id)? {
            return Err(ServerError::NotFound("No such conversation".into()));
        }
        db.get_conversation(org_id, id)?
    };
    state
        .hub
        .publish(
            org_id,
            RealtimeEvent::ConversationUpdated {
                conversation: conversation.clone(),
            },
        )
        .await;
    Ok(Json(conversation))
}

/// Stand-in for the provider webhook: records a message from a contact.
async fn simulate_inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
    Json(req): Json<InboundRequest>,
) -> Result<Json<Message>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;
    check_body(&req.body)?;

    let now = Utc::now();
    let (message, conversation, created) = {
        let db = state.db.lock().await;
        let contact = db.get_contact(org_id, req.contact_id)?;
        let (conversation, created) = db.get_or_create_conversation(org_id, contact.id)?;

        let message = Message {
            id: MessageId::new(),
            org_id,
            conversation_id: conversation.id,
            direction: Direction::Inbound,
            body: req.body,
            status: MessageStatus::Delivered,
            timestamp: now,
            author_id: None,
            campaign_id: None,
            enrollment_id: None,
            error: None,
            created_at: now,
        };
        db.insert_message(&message)?;
        db.touch_conversation(org_id, conversation.id, now, true)?;
        let conversation = db.get_conversation(org_id, conversation.id)?;
        (message, conversation, created)
    };

    if created {
        state
            .hub
            .publish(
                org_id,
                RealtimeEvent::ConversationNew {
                    conversation: conversation.clone(),
                },
            )
            .await;
    }
    state
        .hub
        .publish(
            org_id,
            RealtimeEvent::MessageNew {
                message: message.clone(),
            },
        )
        .await;
    state
        .hub
        .publish(org_id, RealtimeEvent::ConversationUpdated { conversation })
        .await;

    info!(org = %org_id, contact = %req.contact_id, "Inbound message recorded");
    Ok(Json(message))
}

/// Delivery receipt.  Statuses only move forward; a late receipt is
/// acknowledged but changes nothing.  Receipts on campaign messages feed
/// the campaign's monotonic counters; a failed receipt on a workflow
/// message stops that contact's enrollment.
async fn apply_receipt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, MessageId)>,
    Json(req): Json<ReceiptRequest>,
) -> Result<Json<ReceiptResponse>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;

    let updated = {
        let db = state.db.lock().await;
        let updated =
            db.advance_message_status(org_id, id, req.status, req.error.as_deref())?;
        if let Some(message) = &updated {
            if let Some(campaign_id) = message.campaign_id {
                db.bump_campaign_stat(org_id, campaign_id, req.status)?;
            }
            if let Some(enrollment_id) = message.enrollment_id {
                // The enrollment may be gone if its workflow was deleted
                // after the send; the receipt is still valid then.
                if req.status == MessageStatus::Failed {
                    match db.get_enrollment(org_id, enrollment_id) {
                        Ok(mut enrollment) if enrollment.status == EnrollmentStatus::Active => {
                            enrollment.status = EnrollmentStatus::Failed;
                            enrollment.last_error = Some(
                                req.error
                                    .clone()
                                    .unwrap_or_else(|| "Delivery failed".to_string()),
                            );
                            enrollment.next_send_at = None;
                            enrollment.updated_at = Utc::now();
                            db.update_enrollment(&enrollment)?;
                        }
                        Ok(_) | Err(StoreError::NotFound) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        updated
    };

    match updated {
        Some(message) => {
            state
                .hub
                .publish(
                    org_id,
                    RealtimeEvent::MessageStatus {
                        message_id: message.id,
                        conversation_id: message.conversation_id,
                        status: message.status,
                        timestamp: req.timestamp.unwrap_or_else(Utc::now),
                    },
                )
                .await;
            Ok(Json(ReceiptResponse {
                advanced: true,
                message,
            }))
        }
        None => {
            let db = state.db.lock().await;
            let message = db.get_message(org_id, id)?;
            Ok(Json(ReceiptResponse {
                advanced: false,
                message,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{seed_member, test_context};
    use guichet_shared::models::Contact;
    use guichet_shared::types::Role;
    use std::collections::HashMap;

    fn contact(org: OrgId, name: &str, email: Option<&str>) -> Contact {
        let now = Utc::now();
        Contact {
            id: ContactId::new(),
            org_id: org,
            name: name.to_string(),
            email: email.map(str::to_string),
            phone: None,
            company: None,
            stage: None,
            custom: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn manual_send_persists_and_notifies() {
        let ctx = test_context();
        let (org, user, headers) = seed_member(&ctx.state, Role::Agent).await;

        let ada = contact(org, "Ada", Some("ada@acme.com"));
        {
            let db = ctx.state.db.lock().await;
            db.insert_contact(&ada).unwrap();
            db.get_or_create_conversation(org, ada.id).unwrap();
        }
        let conversation_id = {
            let db = ctx.state.db.lock().await;
            db.list_conversations(org).unwrap()[0].id
        };
        let mut events = ctx.state.hub.subscribe(org).await;

        let message = send_message(
            State(ctx.state.clone()),
            headers.clone(),
            Path((org, conversation_id)),
            Json(SendMessageRequest {
                channel: MessageChannel::Email,
                body: "Hello Ada".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(message.0.status, MessageStatus::Sent);
        assert_eq!(message.0.author_id, Some(user.id));
        assert_eq!(ctx.email.sent_count(), 1);
        assert_eq!(events.recv().await.unwrap().name(), "message_new");

        let stored = list_messages(
            State(ctx.state.clone()),
            headers,
            Path((org, conversation_id)),
            Query(PageQuery {
                limit: None,
                offset: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(stored.0.len(), 1);
        assert_eq!(stored.0[0].body, "Hello Ada");
    }

    #[tokio::test]
    async fn rejected_send_leaves_no_row() {
        let ctx = test_context();
        let (org, _user, headers) = seed_member(&ctx.state, Role::Agent).await;

        let ada = contact(org, "Ada", Some("ada@acme.com"));
        let conversation_id = {
            let db = ctx.state.db.lock().await;
            db.insert_contact(&ada).unwrap();
            db.get_or_create_conversation(org, ada.id).unwrap().0.id
        };
        ctx.email.set_failure("mailbox full");

        let err = send_message(
            State(ctx.state.clone()),
            headers.clone(),
            Path((org, conversation_id)),
            Json(SendMessageRequest {
                channel: MessageChannel::Email,
                body: "Hello Ada".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Upstream(_)));

        let stored = list_messages(
            State(ctx.state.clone()),
            headers,
            Path((org, conversation_id)),
            Query(PageQuery {
                limit: None,
                offset: None,
            }),
        )
        .await
        .unwrap();
        assert!(stored.0.is_empty());
    }

    #[tokio::test]
    async fn unreachable_contact_is_a_bad_request() {
        let ctx = test_context();
        let (org, _user, headers) = seed_member(&ctx.state, Role::Agent).await;

        let ada = contact(org, "Ada", None);
        let conversation_id = {
            let db = ctx.state.db.lock().await;
            db.insert_contact(&ada).unwrap();
            db.get_or_create_conversation(org, ada.id).unwrap().0.id
        };

        let err = send_message(
            State(ctx.state.clone()),
            headers,
            Path((org, conversation_id)),
            Json(SendMessageRequest {
                channel: MessageChannel::Email,
                body: "Hello".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
        assert_eq!(ctx.email.sent_count(), 0);
    }

    #[tokio::test]
    async fn inbound_creates_thread_and_counts_unread() {
        let ctx = test_context();
        let (org, _user, headers) = seed_member(&ctx.state, Role::Agent).await;

        let ada = contact(org, "Ada", None);
        {
            let db = ctx.state.db.lock().await;
            db.insert_contact(&ada).unwrap();
        }
        let mut events = ctx.state.hub.subscribe(org).await;

        let message = simulate_inbound(
            State(ctx.state.clone()),
            headers.clone(),
            Path(org),
            Json(InboundRequest {
                contact_id: ada.id,
                body: "Hi, I have a question".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(message.0.direction, Direction::Inbound);

        // New thread: conversation_new, then the message, then the update.
        assert_eq!(events.recv().await.unwrap().name(), "conversation_new");
        assert_eq!(events.recv().await.unwrap().name(), "message_new");
        assert_eq!(events.recv().await.unwrap().name(), "conversation_updated");

        let conversation = get_conversation(
            State(ctx.state.clone()),
            headers.clone(),
            Path((org, message.0.conversation_id)),
        )
        .await
        .unwrap();
        assert_eq!(conversation.0.unread_count, 1);

        let read = mark_read(
            State(ctx.state.clone()),
            headers,
            Path((org, message.0.conversation_id)),
        )
        .await
        .unwrap();
        assert_eq!(read.0.unread_count, 0);
    }

    #[tokio::test]
    async fn receipts_move_forward_only() {
        let ctx = test_context();
        let (org, _user, headers) = seed_member(&ctx.state, Role::Agent).await;

        let ada = contact(org, "Ada", Some("ada@acme.com"));
        let conversation_id = {
            let db = ctx.state.db.lock().await;
            db.insert_contact(&ada).unwrap();
            db.get_or_create_conversation(org, ada.id).unwrap().0.id
        };
        let message = send_message(
            State(ctx.state.clone()),
            headers.clone(),
            Path((org, conversation_id)),
            Json(SendMessageRequest {
                channel: MessageChannel::Email,
                body: "Hello".to_string(),
            }),
        )
        .await
        .unwrap();

        let read = apply_receipt(
            State(ctx.state.clone()),
            headers.clone(),
            Path((org, message.0.id)),
            Json(ReceiptRequest {
                status: MessageStatus::Read,
                timestamp: None,
                error: None,
            }),
        )
        .await
        .unwrap();
        assert!(read.0.advanced);
        assert_eq!(read.0.message.status, MessageStatus::Read);

        // The delivered receipt arrives afterwards; nothing moves back.
        let late = apply_receipt(
            State(ctx.state.clone()),
            headers,
            Path((org, message.0.id)),
            Json(ReceiptRequest {
                status: MessageStatus::Delivered,
                timestamp: None,
                error: None,
            }),
        )
        .await
        .unwrap();
        assert!(!late.0.advanced);
        assert_eq!(late.0.message.status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn pages_walk_backwards_through_history() {
        let ctx = test_context();
        let (org, _user, headers) = seed_member(&ctx.state, Role::Agent).await;

        let ada = contact(org, "Ada", Some("ada@acme.com"));
        let conversation_id = {
            let db = ctx.state.db.lock().await;
            db.insert_contact(&ada).unwrap();
            db.get_or_create_conversation(org, ada.id).unwrap().0.id
        };
        for i in 0..5 {
            let now = Utc::now() + chrono::Duration::milliseconds(i);
            let db = ctx.state.db.lock().await;
            db.insert_message(&Message {
                id: MessageId::new(),
                org_id: org,
                conversation_id,
                direction: Direction::Outbound,
                body: format!("m{i}"),
                status: MessageStatus::Sent,
                timestamp: now,
                author_id: None,
                campaign_id: None,
                enrollment_id: None,
                error: None,
                created_at: now,
            })
            .unwrap();
        }

        let first = list_messages(
            State(ctx.state.clone()),
            headers.clone(),
            Path((org, conversation_id)),
            Query(PageQuery {
                limit: Some(2),
                offset: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(first.0.len(), 2);
        assert_eq!(first.0[0].body, "m4");

        let second = list_messages(
            State(ctx.state.clone()),
            headers,
            Path((org, conversation_id)),
            Query(PageQuery {
                limit: Some(2),
                offset: Some(2),
            }),
        )
        .await
        .unwrap();
        assert_eq!(second.0[0].body, "m2");
    }

    #[tokio::test]
    async fn failed_receipt_stops_the_enrollment() {
        use guichet_shared::models::{ContactList, Enrollment, Workflow};
        use guichet_shared::types::{EnrollmentId, ListId, WorkflowId};

        let ctx = test_context();
        let (org, _user, headers) = seed_member(&ctx.state, Role::Agent).await;

        let ada = contact(org, "Ada", Some("ada@acme.com"));
        let now = Utc::now();
        let enrollment_id = EnrollmentId::new();
        let message_id = MessageId::new();
        {
            let db = ctx.state.db.lock().await;
            db.insert_contact(&ada).unwrap();

            let list = ContactList {
                id: ListId::new(),
                org_id: org,
                name: "Everyone".to_string(),
                filters: vec![],
                included: vec![],
                excluded: vec![],
                created_at: now,
                updated_at: now,
            };
            db.insert_list(&list).unwrap();

            let workflow = Workflow {
                id: WorkflowId::new(),
                org_id: org,
                name: "Onboarding".to_string(),
                list_id: list.id,
                active: true,
                created_at: now,
                updated_at: now,
            };
            db.insert_workflow(&workflow).unwrap();

            db.insert_enrollment(&Enrollment {
                id: enrollment_id,
                org_id: org,
                workflow_id: workflow.id,
                contact_id: ada.id,
                status: EnrollmentStatus::Active,
                current_step: 1,
                next_send_at: Some(now + chrono::Duration::days(1)),
                retry_count: 0,
                last_error: None,
                created_at: now,
                updated_at: now,
            })
            .unwrap();

            let (conversation, _) = db.get_or_create_conversation(org, ada.id).unwrap();
            db.insert_message(&Message {
                id: message_id,
                org_id: org,
                conversation_id: conversation.id,
                direction: Direction::Outbound,
                body: "Step one".to_string(),
                status: MessageStatus::Sent,
                timestamp: now,
                author_id: None,
                campaign_id: None,
                enrollment_id: Some(enrollment_id),
                error: None,
                created_at: now,
            })
            .unwrap();
        }

        let receipt = apply_receipt(
            State(ctx.state.clone()),
            headers,
            Path((org, message_id)),
            Json(ReceiptRequest {
                status: MessageStatus::Failed,
                timestamp: None,
                error: Some("Address rejected".to_string()),
            }),
        )
        .await
        .unwrap();
        assert!(receipt.0.advanced);

        let db = ctx.state.db.lock().await;
        let enrollment = db.get_enrollment(org, enrollment_id).unwrap();
        assert_eq!(enrollment.status, EnrollmentStatus::Failed);
        assert_eq!(enrollment.last_error.as_deref(), Some("Address rejected"));
        assert!(enrollment.next_send_at.is_none());
    }
}
