//! Organization endpoints: onboarding, members, invitations, integrations.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use guichet_shared::constants::{SESSION_TTL_SECS, VERIFICATION_TTL_SECS};
use guichet_shared::models::{Integration, Organization, User};
use guichet_shared::token::{SessionToken, VerificationToken};
use guichet_shared::types::{MessageChannel, OrgId, Role, UserId, VerificationPurpose};
use guichet_store::StoreError;

use crate::api::AppState;
use crate::auth::{authenticate, authenticate_org};
use crate::error::ServerError;
use crate::permissions::{require, Permission};
use crate::routes::auth::send_verification_email;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orgs", post(create_org))
        .route("/orgs/:org_id", get(get_org).put(rename_org))
        .route("/orgs/:org_id/members", get(list_members))
        .route("/orgs/:org_id/members/invite", post(invite_member))
        .route("/orgs/:org_id/members/:user_id/role", put(set_member_role))
        .route("/orgs/:org_id/integrations", get(list_integrations))
        .route(
            "/orgs/:org_id/integrations/:provider/connect",
            post(connect_integration),
        )
}

#[derive(Deserialize)]
struct CreateOrgRequest {
    name: String,
}

#[derive(Debug, Serialize)]
struct CreateOrgResponse {
    organization: Organization,
    user: User,
    /// Fresh session whose claims carry the new organization.
    token: String,
}

#[derive(Deserialize)]
struct InviteRequest {
    email: String,
    display_name: String,
    role: Role,
}

#[derive(Debug, Serialize)]
struct InviteResponse {
    user: User,
    /// Also mailed; surfaced so an admin can hand the link over directly.
    verification_token: String,
}

#[derive(Deserialize)]
struct SetRoleRequest {
    role: Role,
}

/// Onboarding: create the organization, adopt the caller as its admin and
/// seed one unconfigured integration row per provider.
async fn create_org(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateOrgRequest>,
) -> Result<Json<CreateOrgResponse>, ServerError> {
    let session = authenticate(&state, &headers).await?;
    if session.user.org_id.is_some() {
        return Err(ServerError::Conflict(
            "Already a member of an organization".into(),
        ));
    }
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ServerError::BadRequest("name: must not be empty".into()));
    }

    let org = Organization {
        id: OrgId::new(),
        name,
        created_at: Utc::now(),
    };
    let user = {
        let db = state.db.lock().await;
        db.insert_organization(&org)?;
        db.set_user_org(session.user.id, org.id, Role::Admin)?;
        for channel in [MessageChannel::WhatsappTemplate, MessageChannel::Email] {
            db.upsert_integration(&Integration {
                org_id: org.id,
                provider: channel.provider().to_string(),
                configured: false,
                connected_at: None,
            })?;
        }
        db.get_user(session.user.id)?
    };

    let token = SessionToken::issue(&state.keys.signing, user.id, user.org_id, SESSION_TTL_SECS);
    info!(org = %org.id, user = %user.id, "Organization created");
    Ok(Json(CreateOrgResponse {
        organization: org,
        user,
        token: token.encode(),
    }))
}

async fn get_org(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
) -> Result<Json<Organization>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.get_organization(org_id)?))
}

async fn rename_org(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
    Json(req): Json<CreateOrgRequest>,
) -> Result<Json<Organization>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::ManageOrg)?;

    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ServerError::BadRequest("name: must not be empty".into()));
    }
    let db = state.db.lock().await;
    db.update_organization_name(org_id, &name)?;
    Ok(Json(db.get_organization(org_id)?))
}

async fn list_members(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
) -> Result<Json<Vec<User>>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.list_org_members(org_id)?))
}

/// Create the invited account attached to this organization and mail the
/// password-set link.  The account cannot log in until the link is used.
async fn invite_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
    Json(req): Json<InviteRequest>,
) -> Result<Json<InviteResponse>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::ManageOrg)?;

    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ServerError::BadRequest(
            "email: a valid address is required".into(),
        ));
    }
    let display_name = req.display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(ServerError::BadRequest(
            "display_name: must not be empty".into(),
        ));
    }

    let user = User {
        id: UserId::new(),
        org_id: Some(org_id),
        email: email.clone(),
        display_name,
        role: req.role,
        email_verified: false,
        created_at: Utc::now(),
    };
    {
        let db = state.db.lock().await;
        match db.insert_user(&user) {
            Ok(()) => {}
            Err(StoreError::AlreadyExists) => {
                return Err(ServerError::Conflict(
                    "An account with this email already exists".into(),
                ))
            }
            Err(e) => return Err(e.into()),
        }
    }

    let token = VerificationToken::issue(
        &state.keys.signing,
        user.id,
        email.clone(),
        VerificationPurpose::InvitationPasswordSet,
        VERIFICATION_TTL_SECS,
    );
    let code = token.encode();
    send_verification_email(&state, &email, "You have been invited", &code).await;

    info!(org = %org_id, user = %user.id, role = req.role.as_str(), "Member invited");
    Ok(Json(InviteResponse {
        user,
        verification_token: code,
    }))
}

async fn set_member_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, user_id)): Path<(OrgId, UserId)>,
    Json(req): Json<SetRoleRequest>,
) -> Result<Json<User>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::ManageOrg)?;
    // Guards against an organization locking out its last admin.
    if user_id == session.user.id {
        return Err(ServerError::BadRequest(
            "You cannot change your own role".into(),
        ));
    }

    let db = state.db.lock().await;
    if !db.set_user_role(org_id, user_id, req.role)? {
        return Err(ServerError::NotFound("No such member".into()));
    }
    info!(org = %org_id, user = %user_id, role = req.role.as_str(), "Role changed");
    Ok(Json(db.get_user(user_id)?))
}

async fn list_integrations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
) -> Result<Json<Vec<Integration>>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.list_integrations(org_id)?))
}

/// Completion RPC for the provider connect flow: marks the integration
/// configured so dispatch over its channel is allowed.
async fn connect_integration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, provider)): Path<(OrgId, String)>,
) -> Result<Json<Integration>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::ManageOrg)?;

    let known = [
        MessageChannel::WhatsappTemplate.provider(),
        MessageChannel::Email.provider(),
    ];
    if !known.contains(&provider.as_str()) {
        return Err(ServerError::BadRequest(format!(
            "Unknown provider: {provider}"
        )));
    }

    let integration = Integration {
        org_id,
        provider: provider.clone(),
        configured: true,
        connected_at: Some(Utc::now()),
    };
    {
        let db = state.db.lock().await;
        db.upsert_integration(&integration)?;
    }
    info!(org = %org_id, provider = %provider, "Integration connected");
    Ok(Json(integration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{bearer, seed_member, test_context};
    use crate::routes::auth::{login, verify, LoginRequest, VerifyRequest};

    async fn seed_orgless_user(state: &AppState) -> (User, HeaderMap) {
        let user_id = UserId::new();
        let user = User {
            id: user_id,
            org_id: None,
            email: format!("{}@example.com", &user_id.to_string()[..8]),
            display_name: "Ada".to_string(),
            role: Role::Agent,
            email_verified: true,
            created_at: Utc::now(),
        };
        {
            let db = state.db.lock().await;
            db.insert_user(&user).unwrap();
        }
        let token = SessionToken::issue(&state.keys.signing, user.id, None, 3600);
        (user, bearer(&token.encode()))
    }

    #[tokio::test]
    async fn onboarding_creates_org_and_promotes_admin() {
        let ctx = test_context();
        let (user, headers) = seed_orgless_user(&ctx.state).await;

        let created = create_org(
            State(ctx.state.clone()),
            headers,
            Json(CreateOrgRequest {
                name: "  Acme  ".to_string(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(created.0.organization.name, "Acme");
        assert_eq!(created.0.user.id, user.id);
        assert_eq!(created.0.user.org_id, Some(created.0.organization.id));
        assert_eq!(created.0.user.role, Role::Admin);

        // Both providers got an unconfigured integration row.
        let fresh = bearer(&created.0.token);
        let integrations = list_integrations(
            State(ctx.state.clone()),
            fresh,
            Path(created.0.organization.id),
        )
        .await
        .unwrap();
        assert_eq!(integrations.0.len(), 2);
        assert!(integrations.0.iter().all(|i| !i.configured));
    }

    #[tokio::test]
    async fn second_onboarding_is_a_conflict() {
        let ctx = test_context();
        let (_org, _user, headers) = seed_member(&ctx.state, Role::Admin).await;
        let err = create_org(
            State(ctx.state.clone()),
            headers,
            Json(CreateOrgRequest {
                name: "Another".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Conflict(_)));
    }

    #[tokio::test]
    async fn invited_member_completes_the_link_flow() {
        let ctx = test_context();
        let (org, _admin, headers) = seed_member(&ctx.state, Role::Admin).await;

        let invited = invite_member(
            State(ctx.state.clone()),
            headers,
            Path(org),
            Json(InviteRequest {
                email: "bob@example.com".to_string(),
                display_name: "Bob".to_string(),
                role: Role::Agent,
            }),
        )
        .await
        .unwrap();
        assert_eq!(invited.0.user.org_id, Some(org));
        assert_eq!(invited.0.user.role, Role::Agent);

        // No password yet, so login is refused.
        let err = login(
            State(ctx.state.clone()),
            Json(LoginRequest {
                email: "bob@example.com".to_string(),
                password: "chosen-password".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Unauthorized(_)));

        // The link sets the password and opens a session.
        let verified = verify(
            State(ctx.state.clone()),
            Json(VerifyRequest {
                token: invited.0.verification_token.clone(),
                password: Some("chosen-password".to_string()),
            }),
        )
        .await
        .unwrap();
        assert!(verified.0.user.email_verified);

        login(
            State(ctx.state.clone()),
            Json(LoginRequest {
                email: "bob@example.com".to_string(),
                password: "chosen-password".to_string(),
            }),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn agents_cannot_invite() {
        let ctx = test_context();
        let (org, _user, headers) = seed_member(&ctx.state, Role::Agent).await;
        let err = invite_member(
            State(ctx.state.clone()),
            headers,
            Path(org),
            Json(InviteRequest {
                email: "bob@example.com".to_string(),
                display_name: "Bob".to_string(),
                role: Role::Agent,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
    }

    #[tokio::test]
    async fn tokens_are_scoped_to_their_organization() {
        let ctx = test_context();
        let (_org_a, _user_a, headers_a) = seed_member(&ctx.state, Role::Admin).await;
        let (org_b, _user_b, _headers_b) = seed_member(&ctx.state, Role::Admin).await;

        let err = get_org(State(ctx.state.clone()), headers_a, Path(org_b))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
    }

    #[tokio::test]
    async fn connect_flips_the_integration_flag() {
        let ctx = test_context();
        let (org, _user, headers) = seed_member(&ctx.state, Role::Admin).await;

        let connected = connect_integration(
            State(ctx.state.clone()),
            headers,
            Path((org, "whatsapp".to_string())),
        )
        .await
        .unwrap();
        assert!(connected.0.configured);

        let db = ctx.state.db.lock().await;
        assert!(db.integration_configured(org, "whatsapp").unwrap());
        assert!(!db.integration_configured(org, "email").unwrap());
    }

    #[tokio::test]
    async fn role_change_cannot_target_yourself() {
        let ctx = test_context();
        let (org, admin, headers) = seed_member(&ctx.state, Role::Admin).await;

        let err = set_member_role(
            State(ctx.state.clone()),
            headers,
            Path((org, admin.id)),
            Json(SetRoleRequest { role: Role::Agent }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }
}
