//! Contact and custom-property endpoints.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use guichet_shared::models::{Contact, PropertyDefinition};
use guichet_shared::segment;
use guichet_shared::types::{ContactId, OrgId, PropertyId, PropertyKind};
use guichet_store::StoreError;

use crate::api::AppState;
use crate::auth::authenticate_org;
use crate::error::ServerError;
use crate::permissions::{require, Permission};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/orgs/:org_id/contacts",
            get(list_contacts).post(create_contact),
        )
        .route("/orgs/:org_id/contacts/import", post(import_contacts))
        .route(
            "/orgs/:org_id/contacts/:id",
            get(get_contact).put(update_contact).delete(delete_contact),
        )
        .route(
            "/orgs/:org_id/properties",
            get(list_properties).post(create_property),
        )
        .route(
            "/orgs/:org_id/properties/:id",
            axum::routing::put(update_property).delete(delete_property),
        )
}

/// Editable fields of a contact; ids and timestamps are server-side.
#[derive(Deserialize)]
struct ContactDraft {
    name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    custom: HashMap<String, String>,
}

impl ContactDraft {
    fn validate(&self) -> Result<(), ServerError> {
        if self.name.trim().is_empty() {
            return Err(ServerError::BadRequest("name: must not be empty".into()));
        }
        Ok(())
    }

    fn into_contact(self, org_id: OrgId) -> Contact {
        let now = Utc::now();
        Contact {
            id: ContactId::new(),
            org_id,
            name: self.name.trim().to_string(),
            email: normalize(self.email),
            phone: normalize(self.phone),
            company: normalize(self.company),
            stage: normalize(self.stage),
            custom: self.custom,
            created_at: now,
            updated_at: now,
        }
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Deserialize)]
struct ContactQuery {
    /// Case-insensitive substring over name, email, phone and company.
    #[serde(default)]
    q: Option<String>,
}

#[derive(Deserialize)]
struct ImportRequest {
    contacts: Vec<ContactDraft>,
}

#[derive(Debug, Serialize)]
struct ImportResponse {
    imported: usize,
}

async fn list_contacts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
    Query(query): Query<ContactQuery>,
) -> Result<Json<Vec<Contact>>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;

    let mut contacts = {
        let db = state.db.lock().await;
        db.list_contacts(org_id)?
    };
    if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        contacts.retain(|c| segment::search_matches(c, q));
    }
    Ok(Json(contacts))
}

async fn create_contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
    Json(draft): Json<ContactDraft>,
) -> Result<Json<Contact>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;
    draft.validate()?;

    let contact = draft.into_contact(org_id);
    {
        let db = state.db.lock().await;
        db.insert_contact(&contact)?;
    }
    Ok(Json(contact))
}

/// Atomic bulk import: either every row is valid and inserted, or the whole
/// batch is refused naming the first bad row.
async fn import_contacts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<ImportResponse>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;

    if req.contacts.is_empty() {
        return Err(ServerError::BadRequest("contacts: must not be empty".into()));
    }
    for (index, draft) in req.contacts.iter().enumerate() {
        draft
            .validate()
            .map_err(|_| ServerError::BadRequest(format!("contacts[{index}]: name is empty")))?;
    }

    let contacts: Vec<Contact> = req
        .contacts
        .into_iter()
        .map(|draft| draft.into_contact(org_id))
        .collect();
    let imported = {
        let mut db = state.db.lock().await;
        db.insert_contacts(&contacts)?
    };
    info!(org = %org_id, imported, "Contacts imported");
    Ok(Json(ImportResponse { imported }))
}

async fn get_contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, ContactId)>,
) -> Result<Json<Contact>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.get_contact(org_id, id)?))
}

async fn update_contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, ContactId)>,
    Json(draft): Json<ContactDraft>,
) -> Result<Json<Contact>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;
    draft.validate()?;

    let db = state.db.lock().await;
    let existing = db.get_contact(org_id, id)?;
    let updated = Contact {
        id: existing.id,
        org_id,
        created_at: existing.created_at,
        updated_at: Utc::now(),
        ..draft.into_contact(org_id)
    };
    db.update_contact(&updated)?;
    Ok(Json(updated))
}

async fn delete_contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, ContactId)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;

    let db = state.db.lock().await;
    if !db.delete_contact(org_id, id)? {
        return Err(ServerError::NotFound("No such contact".into()));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

// ---------------------------------------------------------------------------
// Custom properties
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PropertyDraft {
    key: String,
    label: String,
    kind: PropertyKind,
    #[serde(default)]
    options: Vec<String>,
}

fn check_property(label: &str, kind: PropertyKind, options: &[String]) -> Result<(), ServerError> {
    if label.trim().is_empty() {
        return Err(ServerError::BadRequest("label: must not be empty".into()));
    }
    if kind == PropertyKind::Select && options.is_empty() {
        return Err(ServerError::BadRequest(
            "options: a select property needs at least one option".into(),
        ));
    }
    Ok(())
}

async fn list_properties(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
) -> Result<Json<Vec<PropertyDefinition>>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.list_properties(org_id)?))
}

async fn create_property(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
    Json(draft): Json<PropertyDraft>,
) -> Result<Json<PropertyDefinition>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::ManageProperties)?;

    let key = draft.key.trim().to_lowercase().replace(' ', "_");
    if key.is_empty() {
        return Err(ServerError::BadRequest("key: must not be empty".into()));
    }
    // Built-in columns are addressed by the same namespace in segments and
    // bindings, so a custom property cannot shadow one.
    if Contact::BUILTIN_FIELDS.contains(&key.as_str()) {
        return Err(ServerError::Conflict(format!(
            "key: '{key}' is a built-in field"
        )));
    }
    check_property(&draft.label, draft.kind, &draft.options)?;

    let property = PropertyDefinition {
        id: PropertyId::new(),
        org_id,
        key,
        label: draft.label.trim().to_string(),
        kind: draft.kind,
        options: draft.options,
        created_at: Utc::now(),
    };
    {
        let db = state.db.lock().await;
        match db.insert_property(&property) {
            Ok(()) => {}
            Err(StoreError::AlreadyExists) => {
                return Err(ServerError::Conflict(format!(
                    "key: '{}' already exists",
                    property.key
                )))
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Json(property))
}

#[derive(Deserialize)]
struct PropertyUpdate {
    label: String,
    kind: PropertyKind,
    #[serde(default)]
    options: Vec<String>,
}

/// The key is immutable: stored contact values are addressed by it.
async fn update_property(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, PropertyId)>,
    Json(update): Json<PropertyUpdate>,
) -> Result<Json<PropertyDefinition>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::ManageProperties)?;
    check_property(&update.label, update.kind, &update.options)?;

    let db = state.db.lock().await;
    let mut property = db.get_property(org_id, id)?;
    property.label = update.label.trim().to_string();
    property.kind = update.kind;
    property.options = update.options;
    db.update_property(&property)?;
    Ok(Json(property))
}

async fn delete_property(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, PropertyId)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::ManageProperties)?;

    let db = state.db.lock().await;
    if !db.delete_property(org_id, id)? {
        return Err(ServerError::NotFound("No such property".into()));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}
