//! Contact and custom-property operations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use guichet_shared::models::{Contact, PropertyDefinition};
use guichet_shared::types::{ContactId, OrgId, PropertyId, PropertyKind};

use crate::api::ApiClient;
use crate::error::ClientError;

/// A contact as composed in the editor.  Ids and timestamps are assigned
/// by the server.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContactDraft {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub stage: Option<String>,
    pub custom: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertyDraft {
    pub key: String,
    pub label: String,
    pub kind: PropertyKind,
    pub options: Vec<String>,
}

#[derive(Serialize)]
struct ImportPayload<'a> {
    contacts: &'a [ContactDraft],
}

#[derive(Deserialize)]
struct ImportOutcome {
    imported: usize,
}

/// Lists contacts, optionally narrowed by a free-text search over name,
/// email, phone and company.
pub async fn list(
    api: &ApiClient,
    org_id: OrgId,
    search: Option<&str>,
) -> Result<Vec<Contact>, ClientError> {
    let path = format!("orgs/{org_id}/contacts");
    match search {
        Some(term) => api.get_query(&path, &[("q", term)]).await,
        None => api.get(&path).await,
    }
}

pub async fn create(
    api: &ApiClient,
    org_id: OrgId,
    draft: &ContactDraft,
) -> Result<Contact, ClientError> {
    if draft.name.trim().is_empty() {
        return Err(ClientError::Validation("name: must not be empty".into()));
    }
    api.post(&format!("orgs/{org_id}/contacts"), draft).await
}

pub async fn get(api: &ApiClient, org_id: OrgId, id: ContactId) -> Result<Contact, ClientError> {
    api.get(&format!("orgs/{org_id}/contacts/{id}")).await
}

pub async fn update(
    api: &ApiClient,
    org_id: OrgId,
    id: ContactId,
    draft: &ContactDraft,
) -> Result<Contact, ClientError> {
    if draft.name.trim().is_empty() {
        return Err(ClientError::Validation("name: must not be empty".into()));
    }
    api.put(&format!("orgs/{org_id}/contacts/{id}"), draft).await
}

pub async fn delete(api: &ApiClient, org_id: OrgId, id: ContactId) -> Result<(), ClientError> {
    api.delete(&format!("orgs/{org_id}/contacts/{id}")).await
}

/// Bulk import.  The server applies all rows or none; the count comes back
/// on success.
pub async fn import(
    api: &ApiClient,
    org_id: OrgId,
    drafts: &[ContactDraft],
) -> Result<usize, ClientError> {
    if drafts.is_empty() {
        return Err(ClientError::Validation("import: no rows".into()));
    }
    let outcome: ImportOutcome = api
        .post(
            &format!("orgs/{org_id}/contacts/import"),
            &ImportPayload { contacts: drafts },
        )
        .await?;
    Ok(outcome.imported)
}

pub async fn list_properties(
    api: &ApiClient,
    org_id: OrgId,
) -> Result<Vec<PropertyDefinition>, ClientError> {
    api.get(&format!("orgs/{org_id}/properties")).await
}

pub async fn create_property(
    api: &ApiClient,
    org_id: OrgId,
    draft: &PropertyDraft,
) -> Result<PropertyDefinition, ClientError> {
    api.post(&format!("orgs/{org_id}/properties"), draft).await
}

pub async fn update_property(
    api: &ApiClient,
    org_id: OrgId,
    id: PropertyId,
    draft: &PropertyDraft,
) -> Result<PropertyDefinition, ClientError> {
    api.put(&format!("orgs/{org_id}/properties/{id}"), draft)
        .await
}

pub async fn delete_property(
    api: &ApiClient,
    org_id: OrgId,
    id: PropertyId,
) -> Result<(), ClientError> {
    api.delete(&format!("orgs/{org_id}/properties/{id}")).await
}
