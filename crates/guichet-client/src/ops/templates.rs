//! Message template operations.

use serde::{Deserialize, Serialize};

use guichet_shared::models::MessageTemplate;
use guichet_shared::types::{MessageChannel, OrgId, TemplateId};

use crate::api::ApiClient;
use crate::error::ClientError;

#[derive(Debug, Clone, Serialize)]
pub struct TemplateDraft {
    pub name: String,
    pub channel: MessageChannel,
    pub language: String,
    pub body: String,
}

#[derive(Deserialize)]
struct SyncOutcome {
    synced: usize,
}

pub async fn list(api: &ApiClient, org_id: OrgId) -> Result<Vec<MessageTemplate>, ClientError> {
    api.get(&format!("orgs/{org_id}/templates")).await
}

pub async fn create(
    api: &ApiClient,
    org_id: OrgId,
    draft: &TemplateDraft,
) -> Result<MessageTemplate, ClientError> {
    api.post(&format!("orgs/{org_id}/templates"), draft).await
}

pub async fn get(
    api: &ApiClient,
    org_id: OrgId,
    id: TemplateId,
) -> Result<MessageTemplate, ClientError> {
    api.get(&format!("orgs/{org_id}/templates/{id}")).await
}

pub async fn update(
    api: &ApiClient,
    org_id: OrgId,
    id: TemplateId,
    draft: &TemplateDraft,
) -> Result<MessageTemplate, ClientError> {
    api.put(&format!("orgs/{org_id}/templates/{id}"), draft).await
}

pub async fn delete(api: &ApiClient, org_id: OrgId, id: TemplateId) -> Result<(), ClientError> {
    api.delete(&format!("orgs/{org_id}/templates/{id}")).await
}

/// Pulls the provider's approved templates into the local table.  Returns
/// how many were created or refreshed.
pub async fn sync(api: &ApiClient, org_id: OrgId) -> Result<usize, ClientError> {
    let outcome: SyncOutcome = api
        .post(&format!("orgs/{org_id}/templates/sync"), &serde_json::json!({}))
        .await?;
    Ok(outcome.synced)
}
