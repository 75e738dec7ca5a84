//! Message-template endpoints.
//!
//! The variable list of a template is derived state: it is recomputed from
//! the body on every save, so a stale list can never reach a campaign or
//! workflow step.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use guichet_shared::models::MessageTemplate;
use guichet_shared::template::extract_variables;
use guichet_shared::types::{MessageChannel, OrgId, TemplateId};

use crate::api::AppState;
use crate::auth::authenticate_org;
use crate::error::ServerError;
use crate::permissions::{require, Permission};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/orgs/:org_id/templates",
            get(list_templates).post(create_template),
        )
        .route("/orgs/:org_id/templates/sync", post(sync_templates))
        .route(
            "/orgs/:org_id/templates/:id",
            get(get_template).put(update_template).delete(delete_template),
        )
}

#[derive(Deserialize)]
struct TemplateDraft {
    name: String,
    channel: MessageChannel,
    #[serde(default = "default_language")]
    language: String,
    body: String,
}

fn default_language() -> String {
    "en".to_string()
}

impl TemplateDraft {
    fn validate(&self) -> Result<(), ServerError> {
        if self.name.trim().is_empty() {
            return Err(ServerError::BadRequest("name: must not be empty".into()));
        }
        if self.body.trim().is_empty() {
            return Err(ServerError::BadRequest("body: must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SyncResponse {
    synced: usize,
}

async fn list_templates(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
) -> Result<Json<Vec<MessageTemplate>>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.list_templates(org_id)?))
}

async fn create_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
    Json(draft): Json<TemplateDraft>,
) -> Result<Json<MessageTemplate>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;
    draft.validate()?;

    let now = Utc::now();
    let template = MessageTemplate {
        id: TemplateId::new(),
        org_id,
        name: draft.name.trim().to_string(),
        channel: draft.channel,
        language: draft.language,
        variables: extract_variables(&draft.body),
        body: draft.body,
        remote_id: None,
        created_at: now,
        updated_at: now,
    };
    {
        let db = state.db.lock().await;
        db.insert_template(&template)?;
    }
    Ok(Json(template))
}

async fn get_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, TemplateId)>,
) -> Result<Json<MessageTemplate>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.get_template(org_id, id)?))
}

async fn update_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, TemplateId)>,
    Json(draft): Json<TemplateDraft>,
) -> Result<Json<MessageTemplate>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;
    draft.validate()?;

    let db = state.db.lock().await;
    let mut template = db.get_template(org_id, id)?;
    template.name = draft.name.trim().to_string();
    template.channel = draft.channel;
    template.language = draft.language;
    template.variables = extract_variables(&draft.body);
    template.body = draft.body;
    template.updated_at = Utc::now();
    db.update_template(&template)?;
    Ok(Json(template))
}

async fn delete_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, TemplateId)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;

    let db = state.db.lock().await;
    if !db.delete_template(org_id, id)? {
        return Err(ServerError::NotFound("No such template".into()));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Pull the provider's approved template catalog.  Templates already seen
/// (matched on the provider's id) are updated in place, new ones are
/// created for the template channel.
async fn sync_templates(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
) -> Result<Json<SyncResponse>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;

    let remote = state
        .senders
        .catalog
        .list_remote_templates()
        .await
        .map_err(|e| ServerError::Upstream(e.to_string()))?;

    let now = Utc::now();
    let synced = {
        let db = state.db.lock().await;
        let mut synced = 0;
        for entry in remote {
            let template = MessageTemplate {
                id: TemplateId::new(),
                org_id,
                name: entry.name,
                channel: MessageChannel::WhatsappTemplate,
                language: entry.language,
                variables: extract_variables(&entry.body),
                body: entry.body,
                remote_id: Some(entry.remote_id),
                created_at: now,
                updated_at: now,
            };
            db.upsert_synced_template(&template)?;
            synced += 1;
        }
        synced
    };
    info!(org = %org_id, synced, "Template catalog synced");
    Ok(Json(SyncResponse { synced }))
}
