//! Inbox thread operations.

use serde::Serialize;

use guichet_shared::models::{Conversation, Message};
use guichet_shared::types::{ConversationId, MessageChannel, OrgId};

use crate::api::ApiClient;
use crate::error::ClientError;

/// Page size used when none is given.  Matches the server default.
pub const PAGE_SIZE: u32 = 50;

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    channel: MessageChannel,
    body: &'a str,
}

pub async fn list(api: &ApiClient, org_id: OrgId) -> Result<Vec<Conversation>, ClientError> {
    api.get(&format!("orgs/{org_id}/conversations")).await
}

pub async fn get(
    api: &ApiClient,
    org_id: OrgId,
    id: ConversationId,
) -> Result<Conversation, ClientError> {
    api.get(&format!("orgs/{org_id}/conversations/{id}")).await
}

/// One page of history, newest first.  `offset` walks backwards in time.
pub async fn messages(
    api: &ApiClient,
    org_id: OrgId,
    id: ConversationId,
    limit: u32,
    offset: u32,
) -> Result<Vec<Message>, ClientError> {
    let limit = limit.to_string();
    let offset = offset.to_string();
    api.get_query(
        &format!("orgs/{org_id}/conversations/{id}/messages"),
        &[("limit", limit.as_str()), ("offset", offset.as_str())],
    )
    .await
}

/// Sends a manual message.  The server only persists after the provider
/// accepted, so an `Err` here means no row exists remotely and any
/// optimistic copy must be dropped.
pub async fn send_message(
    api: &ApiClient,
    org_id: OrgId,
    id: ConversationId,
    channel: MessageChannel,
    body: &str,
) -> Result<Message, ClientError> {
    if body.trim().is_empty() {
        return Err(ClientError::Validation("body: must not be empty".into()));
    }
    api.post(
        &format!("orgs/{org_id}/conversations/{id}/messages"),
        &SendMessageRequest { channel, body },
    )
    .await
}

/// Clears the unread counter; returns the updated thread.
pub async fn mark_read(
    api: &ApiClient,
    org_id: OrgId,
    id: ConversationId,
) -> Result<Conversation, ClientError> {
    api.post(
        &format!("orgs/{org_id}/conversations/{id}/read"),
        &serde_json::json!({}),
    )
    .await
}
