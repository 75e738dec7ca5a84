//! Organization operations: onboarding, members, integrations.

use serde::{Deserialize, Serialize};

use guichet_shared::models::{Integration, Organization, User};
use guichet_shared::types::{OrgId, Role, UserId};

use crate::api::ApiClient;
use crate::error::ClientError;

/// Result of onboarding: the new organization plus a fresh session whose
/// claims carry it.  The old token stops matching the user's org.
#[derive(Debug, Clone, Deserialize)]
pub struct OnboardingOutcome {
    pub organization: Organization,
    pub user: User,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InviteOutcome {
    pub user: User,
    /// Invitation link token, also mailed to the address.
    pub verification_token: String,
}

#[derive(Serialize)]
struct CreateOrgRequest<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct InviteRequest<'a> {
    email: &'a str,
    display_name: &'a str,
    role: Role,
}

#[derive(Serialize)]
struct SetRoleRequest {
    role: Role,
}

pub async fn create_organization(
    api: &ApiClient,
    name: &str,
) -> Result<OnboardingOutcome, ClientError> {
    if name.trim().is_empty() {
        return Err(ClientError::Validation("name: must not be empty".into()));
    }
    api.post("orgs", &CreateOrgRequest { name }).await
}

pub async fn get_organization(api: &ApiClient, org_id: OrgId) -> Result<Organization, ClientError> {
    api.get(&format!("orgs/{org_id}")).await
}

pub async fn rename_organization(
    api: &ApiClient,
    org_id: OrgId,
    name: &str,
) -> Result<Organization, ClientError> {
    api.put(&format!("orgs/{org_id}"), &CreateOrgRequest { name })
        .await
}

pub async fn list_members(api: &ApiClient, org_id: OrgId) -> Result<Vec<User>, ClientError> {
    api.get(&format!("orgs/{org_id}/members")).await
}

pub async fn invite_member(
    api: &ApiClient,
    org_id: OrgId,
    email: &str,
    display_name: &str,
    role: Role,
) -> Result<InviteOutcome, ClientError> {
    api.post(
        &format!("orgs/{org_id}/members/invite"),
        &InviteRequest {
            email,
            display_name,
            role,
        },
    )
    .await
}

pub async fn set_member_role(
    api: &ApiClient,
    org_id: OrgId,
    user_id: UserId,
    role: Role,
) -> Result<User, ClientError> {
    api.put(
        &format!("orgs/{org_id}/members/{user_id}/role"),
        &SetRoleRequest { role },
    )
    .await
}

pub async fn list_integrations(
    api: &ApiClient,
    org_id: OrgId,
) -> Result<Vec<Integration>, ClientError> {
    api.get(&format!("orgs/{org_id}/integrations")).await
}

/// Marks a provider as connected.  The popup-based provider linking ends
/// with this call once the provider's own flow has completed.
pub async fn connect_integration(
    api: &ApiClient,
    org_id: OrgId,
    provider: &str,
) -> Result<Integration, ClientError> {
    api.post(
        &format!("orgs/{org_id}/integrations/{provider}/connect"),
        &serde_json::json!({}),
    )
    .await
}
