//! Contact-list (segment) endpoints.
//!
//! Membership is never materialized: the members handler resolves the
//! filters plus the manual include/exclude lists against the current
//! contact table, so every read reflects contacts created or edited since
//! the list was saved.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use guichet_shared::models::{Contact, ContactList, SegmentFilter};
use guichet_shared::segment;
use guichet_shared::types::{ContactId, ListId, OrgId};

use crate::api::AppState;
use crate::auth::authenticate_org;
use crate::error::ServerError;
use crate::permissions::{require, Permission};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orgs/:org_id/lists", get(list_lists).post(create_list))
        .route("/orgs/:org_id/lists/preview", post(preview_members))
        .route(
            "/orgs/:org_id/lists/:id",
            get(get_list).put(update_list).delete(delete_list),
        )
        .route("/orgs/:org_id/lists/:id/members", get(list_members))
}

#[derive(Deserialize)]
struct ListDraft {
    name: String,
    #[serde(default)]
    filters: Vec<SegmentFilter>,
    #[serde(default)]
    included: Vec<ContactId>,
    #[serde(default)]
    excluded: Vec<ContactId>,
}

impl ListDraft {
    fn validate(&self) -> Result<(), ServerError> {
        if self.name.trim().is_empty() {
            return Err(ServerError::BadRequest("name: must not be empty".into()));
        }
        for (index, filter) in self.filters.iter().enumerate() {
            if filter.field.trim().is_empty() {
                return Err(ServerError::BadRequest(format!(
                    "filters[{index}]: field must not be empty"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct MembersResponse {
    members: Vec<Contact>,
    total: usize,
}

#[derive(Deserialize)]
struct PreviewRequest {
    #[serde(default)]
    filters: Vec<SegmentFilter>,
    #[serde(default)]
    included: Vec<ContactId>,
    #[serde(default)]
    excluded: Vec<ContactId>,
}

#[derive(Serialize)]
struct PreviewResponse {
    member_ids: Vec<ContactId>,
    total: usize,
}

async fn list_lists(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
) -> Result<Json<Vec<ContactList>>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.list_lists(org_id)?))
}

async fn create_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
    Json(draft): Json<ListDraft>,
) -> Result<Json<ContactList>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;
    draft.validate()?;

    let now = Utc::now();
    let list = ContactList {
        id: ListId::new(),
        org_id,
        name: draft.name.trim().to_string(),
        filters: draft.filters,
        included: draft.included,
        excluded: draft.excluded,
        created_at: now,
        updated_at: now,
    };
    {
        let db = state.db.lock().await;
        db.insert_list(&list)?;
    }
    Ok(Json(list))
}

async fn get_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, ListId)>,
) -> Result<Json<ContactList>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.get_list(org_id, id)?))
}

async fn update_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, ListId)>,
    Json(draft): Json<ListDraft>,
) -> Result<Json<ContactList>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;
    draft.validate()?;

    let db = state.db.lock().await;
    let existing = db.get_list(org_id, id)?;
    let updated = ContactList {
        id: existing.id,
        org_id,
        name: draft.name.trim().to_string(),
        filters: draft.filters,
        included: draft.included,
        excluded: draft.excluded,
        created_at: existing.created_at,
        updated_at: Utc::now(),
    };
    db.update_list(&updated)?;
    Ok(Json(updated))
}

async fn delete_list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, ListId)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;

    let db = state.db.lock().await;
    if !db.delete_list(org_id, id)? {
        return Err(ServerError::NotFound("No such list".into()));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn list_members(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, ListId)>,
) -> Result<Json<MembersResponse>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;

    let (list, contacts) = {
        let db = state.db.lock().await;
        (db.get_list(org_id, id)?, db.list_contacts(org_id)?)
    };
    let member_ids: std::collections::HashSet<ContactId> =
        segment::resolve_members(&list, &contacts).into_iter().collect();
    let members: Vec<Contact> = contacts
        .into_iter()
        .filter(|c| member_ids.contains(&c.id))
        .collect();
    let total = members.len();
    Ok(Json(MembersResponse { members, total }))
}

/// Resolves an unsaved filter set so the editor can show a live count.
async fn preview_members(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
    Json(req): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;

    let contacts = {
        let db = state.db.lock().await;
        db.list_contacts(org_id)?
    };
    let now = Utc::now();
    let scratch = ContactList {
        id: ListId::new(),
        org_id,
        name: String::new(),
        filters: req.filters,
        included: req.included,
        excluded: req.excluded,
        created_at: now,
        updated_at: now,
    };
    let member_ids = segment::resolve_members(&scratch, &contacts);
    let total = member_ids.len();
    Ok(Json(PreviewResponse { member_ids, total }))
}
