//! Campaign operations.
//!
//! Dispatch is validated locally with the same rules the server applies,
//! so a request that would be refused remotely never leaves the client.
//! The recipient check runs first: an empty set fails even when nothing
//! else about the campaign or the integrations is known.

use chrono::{DateTime, Utc};
use serde::Serialize;

use guichet_shared::dispatch::{self, DispatchRequest};
use guichet_shared::models::{Campaign, Integration, VariableBinding};
use guichet_shared::types::{CampaignId, ContactId, MessageChannel, OrgId, TemplateId};

use crate::api::ApiClient;
use crate::error::ClientError;

#[derive(Debug, Clone, Serialize)]
pub struct CampaignDraft {
    pub name: String,
    pub channel: MessageChannel,
    pub recipient_ids: Vec<ContactId>,
    pub template_id: Option<TemplateId>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub mappings: Vec<VariableBinding>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct DispatchBody {
    scheduled_at: Option<DateTime<Utc>>,
}

/// Union of manual picks and resolved segment members, first occurrence
/// wins, order preserved.  A contact arriving through both paths is
/// counted once.
pub fn compose_recipients(manual: &[ContactId], segment: &[ContactId]) -> Vec<ContactId> {
    let mut out = Vec::with_capacity(manual.len() + segment.len());
    for id in manual.iter().chain(segment) {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

pub async fn list(api: &ApiClient, org_id: OrgId) -> Result<Vec<Campaign>, ClientError> {
    api.get(&format!("orgs/{org_id}/campaigns")).await
}

pub async fn create(
    api: &ApiClient,
    org_id: OrgId,
    draft: &CampaignDraft,
) -> Result<Campaign, ClientError> {
    if draft.name.trim().is_empty() {
        return Err(ClientError::Validation("name: must not be empty".into()));
    }
    api.post(&format!("orgs/{org_id}/campaigns"), draft).await
}

pub async fn get(api: &ApiClient, org_id: OrgId, id: CampaignId) -> Result<Campaign, ClientError> {
    api.get(&format!("orgs/{org_id}/campaigns/{id}")).await
}

pub async fn update(
    api: &ApiClient,
    org_id: OrgId,
    id: CampaignId,
    draft: &CampaignDraft,
) -> Result<Campaign, ClientError> {
    api.put(&format!("orgs/{org_id}/campaigns/{id}"), draft).await
}

pub async fn delete(api: &ApiClient, org_id: OrgId, id: CampaignId) -> Result<(), ClientError> {
    api.delete(&format!("orgs/{org_id}/campaigns/{id}")).await
}

/// Arms a draft campaign, immediately or at `scheduled_at`.
///
/// The request is checked against [`dispatch::validate`] before anything
/// is sent: recipients first, then the channel payload, then whether the
/// channel's provider is configured according to `integrations`.
pub async fn dispatch(
    api: &ApiClient,
    org_id: OrgId,
    campaign: &Campaign,
    integrations: &[Integration],
    scheduled_at: Option<DateTime<Utc>>,
) -> Result<Campaign, ClientError> {
    let mut request = DispatchRequest::from_campaign(campaign);
    request.scheduled_at = scheduled_at.or(campaign.scheduled_at);

    let provider = campaign.channel.provider();
    let configured = integrations
        .iter()
        .any(|i| i.provider == provider && i.configured);
    dispatch::validate(&request, configured)?;

    api.post(
        &format!("orgs/{org_id}/campaigns/{}/dispatch", campaign.id),
        &DispatchBody { scheduled_at },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use guichet_shared::models::CampaignStats;
    use guichet_shared::types::CampaignStatus;

    fn offline_api() -> ApiClient {
        // Nothing listens here; reaching the network would fail as Remote.
        ApiClient::new(&ClientConfig::new("http://127.0.0.1:1"))
    }

    fn email_campaign(recipients: usize) -> Campaign {
        Campaign {
            id: CampaignId::new(),
            org_id: OrgId::new(),
            name: "Welcome".to_string(),
            channel: MessageChannel::Email,
            recipient_ids: (0..recipients).map(|_| ContactId::new()).collect(),
            template_id: None,
            subject: Some("Hello".to_string()),
            body: Some("<p>Hi {{name}}</p>".to_string()),
            mappings: Vec::new(),
            scheduled_at: None,
            status: CampaignStatus::Draft,
            stats: CampaignStats::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn configured_email(org_id: OrgId) -> Integration {
        Integration {
            org_id,
            provider: "email".to_string(),
            configured: true,
            connected_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn empty_recipient_set_fails_before_any_request() {
        let api = offline_api();
        let campaign = email_campaign(0);
        let integrations = vec![configured_email(campaign.org_id)];

        let err = dispatch(&api, campaign.org_id, &campaign, &integrations, None)
            .await
            .unwrap_err();
        // Validation, not Remote: the refused request never hit the socket.
        assert!(matches!(err, ClientError::Validation(_)));
        assert!(err.to_string().contains("No recipients"));
    }

    #[tokio::test]
    async fn unconfigured_channel_is_refused_locally() {
        let api = offline_api();
        let campaign = email_campaign(2);

        let err = dispatch(&api, campaign.org_id, &campaign, &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn compose_recipients_counts_overlaps_once() {
        let a = ContactId::new();
        let b = ContactId::new();
        let c = ContactId::new();

        let combined = compose_recipients(&[a, b], &[b, c]);
        assert_eq!(combined, vec![a, b, c]);
    }
}
