//! Campaign endpoints.
//!
//! Campaigns are composed as drafts through plain CRUD and armed through
//! the dispatch RPC, which is where the full validation runs.  Once armed
//! the dispatcher owns the row; the routes only read it.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use guichet_shared::dispatch::{self, DispatchRequest};
use guichet_shared::models::{Campaign, CampaignStats, VariableBinding};
use guichet_shared::types::{
    CampaignId, CampaignStatus, ContactId, MessageChannel, OrgId, TemplateId,
};

use crate::api::AppState;
use crate::auth::authenticate_org;
use crate::dispatcher::DispatchCommand;
use crate::error::ServerError;
use crate::permissions::{require, Permission};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/orgs/:org_id/campaigns",
            get(list_campaigns).post(create_campaign),
        )
        .route(
            "/orgs/:org_id/campaigns/:id",
            get(get_campaign).put(update_campaign).delete(delete_campaign),
        )
        .route(
            "/orgs/:org_id/campaigns/:id/dispatch",
            post(dispatch_campaign),
        )
}

#[derive(Deserialize)]
struct CampaignDraft {
    name: String,
    channel: MessageChannel,
    #[serde(default)]
    recipient_ids: Vec<ContactId>,
    #[serde(default)]
    template_id: Option<TemplateId>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    mappings: Vec<VariableBinding>,
    #[serde(default)]
    scheduled_at: Option<DateTime<Utc>>,
}

impl CampaignDraft {
    fn validate(&self) -> Result<(), ServerError> {
        if self.name.trim().is_empty() {
            return Err(ServerError::BadRequest("name: must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Deserialize, Default)]
struct DispatchCampaignRequest {
    /// Overrides the draft's launch time when present.
    #[serde(default)]
    scheduled_at: Option<DateTime<Utc>>,
}

async fn list_campaigns(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
) -> Result<Json<Vec<Campaign>>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.list_campaigns(org_id)?))
}

async fn create_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
    Json(draft): Json<CampaignDraft>,
) -> Result<Json<Campaign>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;
    draft.validate()?;

    let now = Utc::now();
    let campaign = Campaign {
        id: CampaignId::new(),
        org_id,
        name: draft.name.trim().to_string(),
        channel: draft.channel,
        recipient_ids: draft.recipient_ids,
        template_id: draft.template_id,
        subject: draft.subject,
        body: draft.body,
        mappings: draft.mappings,
        scheduled_at: draft.scheduled_at,
        status: CampaignStatus::Draft,
        stats: CampaignStats::default(),
        created_at: now,
        updated_at: now,
    };
    {
        let db = state.db.lock().await;
        db.insert_campaign(&campaign)?;
    }
    Ok(Json(campaign))
}

async fn get_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, CampaignId)>,
) -> Result<Json<Campaign>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.get_campaign(org_id, id)?))
}

async fn update_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, CampaignId)>,
    Json(draft): Json<CampaignDraft>,
) -> Result<Json<Campaign>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;
    draft.validate()?;

    let db = state.db.lock().await;
    let mut campaign = db.get_campaign(org_id, id)?;
    if campaign.status != CampaignStatus::Draft {
        return Err(ServerError::Conflict(
            "Only draft campaigns can be edited".into(),
        ));
    }
    campaign.name = draft.name.trim().to_string();
    campaign.channel = draft.channel;
    campaign.recipient_ids = draft.recipient_ids;
    campaign.template_id = draft.template_id;
    campaign.subject = draft.subject;
    campaign.body = draft.body;
    campaign.mappings = draft.mappings;
    campaign.scheduled_at = draft.scheduled_at;
    campaign.updated_at = Utc::now();
    db.update_campaign(&campaign)?;
    Ok(Json(campaign))
}

async fn delete_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, CampaignId)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;

    let db = state.db.lock().await;
    let campaign = db.get_campaign(org_id, id)?;
    if campaign.status == CampaignStatus::Sending {
        return Err(ServerError::Conflict(
            "The campaign is sending right now".into(),
        ));
    }
    db.delete_campaign(org_id, id)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Arm a draft.  The request is validated the same way the client does it
/// (recipients, channel payload, integration), the launch time is stamped,
/// and for an immediate send the dispatcher is nudged so the blast starts
/// without waiting for the next tick.
async fn dispatch_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, CampaignId)>,
    Json(req): Json<DispatchCampaignRequest>,
) -> Result<Json<Campaign>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;

    let now = Utc::now();
    let campaign = {
        let db = state.db.lock().await;
        let mut campaign = db.get_campaign(org_id, id)?;
        if campaign.status != CampaignStatus::Draft {
            return Err(ServerError::Conflict("Campaign already dispatched".into()));
        }

        let mut check = DispatchRequest::from_campaign(&campaign);
        check.scheduled_at = req.scheduled_at.or(campaign.scheduled_at);
        let configured = db.integration_configured(org_id, campaign.channel.provider())?;
        dispatch::validate(&check, configured)?;

        // Immediate sends get the dispatch time as their launch time, so
        // the due scan can find them if the nudge below gets lost.
        campaign.scheduled_at = Some(check.scheduled_at.unwrap_or(now));
        campaign.updated_at = now;
        db.update_campaign(&campaign)?;
        db.set_campaign_status(org_id, id, CampaignStatus::Scheduled)?;
        db.get_campaign(org_id, id)?
    };

    let launch_at = campaign.scheduled_at.unwrap_or(now);
    if launch_at <= now {
        let command = DispatchCommand::RunCampaign {
            org_id,
            campaign_id: id,
        };
        if let Err(e) = state.dispatch.send(command).await {
            warn!(campaign = %id, error = %e, "Dispatcher nudge failed; the due scan will catch it");
        }
    }
    info!(org = %org_id, campaign = %id, launch = %launch_at, "Campaign dispatched");
    Ok(Json(campaign))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{seed_member, test_context, TestContext};
    use guichet_shared::dispatch::DispatchError;
    use guichet_shared::models::{Contact, Integration};
    use guichet_shared::types::Role;
    use std::collections::HashMap;

    async fn connect_email(ctx: &TestContext, org: OrgId) {
        let db = ctx.state.db.lock().await;
        db.upsert_integration(&Integration {
            org_id: org,
            provider: "email".to_string(),
            configured: true,
            connected_at: Some(Utc::now()),
        })
        .unwrap();
    }

    async fn seed_contact(ctx: &TestContext, org: OrgId) -> ContactId {
        let now = Utc::now();
        let contact = Contact {
            id: ContactId::new(),
            org_id: org,
            name: "Ada".to_string(),
            email: Some("ada@acme.com".to_string()),
            phone: None,
            company: None,
            stage: None,
            custom: HashMap::new(),
            created_at: now,
            updated_at: now,
        };
        let db = ctx.state.db.lock().await;
        db.insert_contact(&contact).unwrap();
        contact.id
    }

    fn email_draft(recipients: Vec<ContactId>) -> CampaignDraft {
        CampaignDraft {
            name: "Launch announcement".to_string(),
            channel: MessageChannel::Email,
            recipient_ids: recipients,
            template_id: None,
            subject: Some("Big news".to_string()),
            body: Some("Hello {{name}}".to_string()),
            mappings: vec![],
            scheduled_at: None,
        }
    }

    #[tokio::test]
    async fn immediate_dispatch_stamps_launch_and_nudges() {
        let mut ctx = test_context();
        let (org, _user, headers) = seed_member(&ctx.state, Role::Agent).await;
        connect_email(&ctx, org).await;
        let recipient = seed_contact(&ctx, org).await;

        let created = create_campaign(
            State(ctx.state.clone()),
            headers.clone(),
            Path(org),
            Json(email_draft(vec![recipient])),
        )
        .await
        .unwrap();
        assert_eq!(created.0.status, CampaignStatus::Draft);
        assert!(created.0.scheduled_at.is_none());

        let armed = dispatch_campaign(
            State(ctx.state.clone()),
            headers,
            Path((org, created.0.id)),
            Json(DispatchCampaignRequest::default()),
        )
        .await
        .unwrap();
        assert_eq!(armed.0.status, CampaignStatus::Scheduled);
        assert!(armed.0.scheduled_at.is_some());

        match ctx.dispatch_rx.try_recv().unwrap() {
            DispatchCommand::RunCampaign { campaign_id, .. } => {
                assert_eq!(campaign_id, created.0.id);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_recipients_refused_before_any_send() {
        let mut ctx = test_context();
        let (org, _user, headers) = seed_member(&ctx.state, Role::Agent).await;
        connect_email(&ctx, org).await;

        let created = create_campaign(
            State(ctx.state.clone()),
            headers.clone(),
            Path(org),
            Json(email_draft(vec![])),
        )
        .await
        .unwrap();

        let err = dispatch_campaign(
            State(ctx.state.clone()),
            headers,
            Path((org, created.0.id)),
            Json(DispatchCampaignRequest::default()),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ServerError::Dispatch(DispatchError::NoRecipients)
        ));
        assert_eq!(ctx.email.sent_count(), 0);
        assert!(ctx.dispatch_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unconfigured_integration_is_refused() {
        let ctx = test_context();
        let (org, _user, headers) = seed_member(&ctx.state, Role::Agent).await;
        let recipient = seed_contact(&ctx, org).await;

        let created = create_campaign(
            State(ctx.state.clone()),
            headers.clone(),
            Path(org),
            Json(email_draft(vec![recipient])),
        )
        .await
        .unwrap();

        let err = dispatch_campaign(
            State(ctx.state.clone()),
            headers,
            Path((org, created.0.id)),
            Json(DispatchCampaignRequest::default()),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ServerError::Dispatch(DispatchError::IntegrationNotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn future_launch_waits_for_the_scan() {
        let mut ctx = test_context();
        let (org, _user, headers) = seed_member(&ctx.state, Role::Agent).await;
        connect_email(&ctx, org).await;
        let recipient = seed_contact(&ctx, org).await;

        let created = create_campaign(
            State(ctx.state.clone()),
            headers.clone(),
            Path(org),
            Json(email_draft(vec![recipient])),
        )
        .await
        .unwrap();

        let launch = Utc::now() + chrono::Duration::hours(2);
        let armed = dispatch_campaign(
            State(ctx.state.clone()),
            headers,
            Path((org, created.0.id)),
            Json(DispatchCampaignRequest {
                scheduled_at: Some(launch),
            }),
        )
        .await
        .unwrap();
        assert_eq!(armed.0.status, CampaignStatus::Scheduled);
        assert_eq!(armed.0.scheduled_at, Some(launch));
        assert!(ctx.dispatch_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatch_and_edit_refuse_armed_campaigns() {
        let ctx = test_context();
        let (org, _user, headers) = seed_member(&ctx.state, Role::Agent).await;
        connect_email(&ctx, org).await;
        let recipient = seed_contact(&ctx, org).await;

        let created = create_campaign(
            State(ctx.state.clone()),
            headers.clone(),
            Path(org),
            Json(email_draft(vec![recipient])),
        )
        .await
        .unwrap();
        dispatch_campaign(
            State(ctx.state.clone()),
            headers.clone(),
            Path((org, created.0.id)),
            Json(DispatchCampaignRequest::default()),
        )
        .await
        .unwrap();

        let again = dispatch_campaign(
            State(ctx.state.clone()),
            headers.clone(),
            Path((org, created.0.id)),
            Json(DispatchCampaignRequest::default()),
        )
        .await
        .unwrap_err();
        assert!(matches!(again, ServerError::Conflict(_)));

        let edit = update_campaign(
            State(ctx.state.clone()),
            headers,
            Path((org, created.0.id)),
            Json(email_draft(vec![recipient])),
        )
        .await
        .unwrap_err();
        assert!(matches!(edit, ServerError::Conflict(_)));
    }
}
