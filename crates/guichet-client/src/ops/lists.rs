//! Contact list operations.  Membership stays resolved-on-demand; the
//! members and preview calls return the current resolution, never a
//! stored snapshot.

use serde::{Deserialize, Serialize};

use guichet_shared::models::{Contact, ContactList, SegmentFilter};
use guichet_shared::types::{ContactId, ListId, OrgId};

use crate::api::ApiClient;
use crate::error::ClientError;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ListDraft {
    pub name: String,
    pub filters: Vec<SegmentFilter>,
    pub included: Vec<ContactId>,
    pub excluded: Vec<ContactId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Membership {
    pub members: Vec<Contact>,
    pub total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Preview {
    pub member_ids: Vec<ContactId>,
    pub total: usize,
}

pub async fn list(api: &ApiClient, org_id: OrgId) -> Result<Vec<ContactList>, ClientError> {
    api.get(&format!("orgs/{org_id}/lists")).await
}

pub async fn create(
    api: &ApiClient,
    org_id: OrgId,
    draft: &ListDraft,
) -> Result<ContactList, ClientError> {
    if draft.name.trim().is_empty() {
        return Err(ClientError::Validation("name: must not be empty".into()));
    }
    api.post(&format!("orgs/{org_id}/lists"), draft).await
}

pub async fn get(api: &ApiClient, org_id: OrgId, id: ListId) -> Result<ContactList, ClientError> {
    api.get(&format!("orgs/{org_id}/lists/{id}")).await
}

pub async fn update(
    api: &ApiClient,
    org_id: OrgId,
    id: ListId,
    draft: &ListDraft,
) -> Result<ContactList, ClientError> {
    if draft.name.trim().is_empty() {
        return Err(ClientError::Validation("name: must not be empty".into()));
    }
    api.put(&format!("orgs/{org_id}/lists/{id}"), draft).await
}

pub async fn delete(api: &ApiClient, org_id: OrgId, id: ListId) -> Result<(), ClientError> {
    api.delete(&format!("orgs/{org_id}/lists/{id}")).await
}

/// Current membership of a saved list, as full contact rows.
pub async fn members(api: &ApiClient, org_id: OrgId, id: ListId) -> Result<Membership, ClientError> {
    api.get(&format!("orgs/{org_id}/lists/{id}/members")).await
}

/// Live count and ids for an unsaved draft, for the editor's preview pane.
pub async fn preview(
    api: &ApiClient,
    org_id: OrgId,
    draft: &ListDraft,
) -> Result<Preview, ClientError> {
    api.post(&format!("orgs/{org_id}/lists/preview"), draft).await
}
