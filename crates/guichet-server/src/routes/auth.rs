//! Account endpoints: signup, login, email verification, current user.
//!
//! Verification links are signed [`VerificationToken`]s; consuming one both
//! proves the address and opens a session, so the link flow lands straight
//! on the dashboard.

use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use guichet_shared::constants::{SESSION_TTL_SECS, VERIFICATION_TTL_SECS};
use guichet_shared::models::User;
use guichet_shared::token::{SessionToken, VerificationToken};
use guichet_shared::types::{Role, UserId, VerificationPurpose};
use guichet_store::StoreError;

use crate::api::AppState;
use crate::auth::{self, authenticate};
use crate::error::ServerError;
use crate::senders::OutboundPayload;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/verify", post(verify))
        .route("/me", get(me))
}

#[derive(Deserialize)]
struct SignupRequest {
    email: String,
    password: String,
    display_name: String,
}

#[derive(Debug, Serialize)]
struct SignupResponse {
    user: User,
    /// Also delivered by mail; returned here so self-hosted setups without
    /// a mail provider can finish the flow.
    verification_token: String,
}

#[derive(Deserialize)]
pub(crate) struct LoginRequest {
    pub(crate) email: String,
    pub(crate) password: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionResponse {
    pub(crate) token: String,
    pub(crate) user: User,
}

#[derive(Deserialize)]
pub(crate) struct VerifyRequest {
    pub(crate) token: String,
    /// Required when the token's purpose is invitation-password-set.
    pub(crate) password: Option<String>,
}

#[derive(Debug, Serialize)]
struct MeResponse {
    user: User,
}

async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Json<SignupResponse>, ServerError> {
    if !state.config.registration_open {
        return Err(ServerError::Forbidden("Registration is closed".into()));
    }

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
    check_password(&req.password)?;

    let hash = auth::hash_password(&req.password)?;
    let user = User {
        id: UserId::new(),
        org_id: None,
        email: email.clone(),
        display_name,
        role: Role::Agent,
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
        db.set_password_hash(user.id, &hash)?;
    }

    let token = VerificationToken::issue(
        &state.keys.signing,
        user.id,
        email.clone(),
        VerificationPurpose::SignupConfirmation,
        VERIFICATION_TTL_SECS,
    );
    let code = token.encode();
    send_verification_email(&state, &email, "Confirm your account", &code).await;

    info!(user = %user.id, "Account created");
    Ok(Json(SignupResponse {
        user,
        verification_token: code,
    }))
}

pub(crate) async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, ServerError> {
    let email = req.email.trim().to_lowercase();

    let (user, hash) = {
        let db = state.db.lock().await;
        let user = match db.get_user_by_email(&email) {
            Ok(user) => user,
            Err(StoreError::NotFound) => return Err(bad_credentials()),
            Err(e) => return Err(e.into()),
        };
        let hash = db.get_password_hash(user.id)?;
        (user, hash)
    };

    // No hash yet means an invitation that was never completed.
    let Some(hash) = hash else {
        return Err(bad_credentials());
    };
    if !auth::verify_password(&req.password, &hash) {
        return Err(bad_credentials());
    }

    let token = SessionToken::issue(&state.keys.signing, user.id, user.org_id, SESSION_TTL_SECS);
    info!(user = %user.id, "Session opened");
    Ok(Json(SessionResponse {
        token: token.encode(),
        user,
    }))
}

/// Consume a verification link.  Both purposes mark the address verified;
/// the invitation purpose additionally sets the chosen password.
pub(crate) async fn verify(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<SessionResponse>, ServerError> {
    let token = VerificationToken::decode(&req.token)?;
    let claims = token.verify(&state.keys.verifying)?.clone();

    match claims.purpose {
        VerificationPurpose::SignupConfirmation => {
            let db = state.db.lock().await;
            if !db.mark_email_verified(claims.user_id)? {
                return Err(ServerError::Unauthorized("Unknown user".into()));
            }
        }
        VerificationPurpose::InvitationPasswordSet => {
            let password = req.password.as_deref().unwrap_or("");
            check_password(password)?;
            let hash = auth::hash_password(password)?;

            let db = state.db.lock().await;
            if !db.set_password_hash(claims.user_id, &hash)? {
                return Err(ServerError::Unauthorized("Unknown user".into()));
            }
            db.mark_email_verified(claims.user_id)?;
        }
    }

    let user = {
        let db = state.db.lock().await;
        db.get_user(claims.user_id)?
    };
    let session = SessionToken::issue(&state.keys.signing, user.id, user.org_id, SESSION_TTL_SECS);
    info!(user = %user.id, purpose = ?claims.purpose, "Verification completed");
    Ok(Json(SessionResponse {
        token: session.encode(),
        user,
    }))
}

async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, ServerError> {
    let session = authenticate(&state, &headers).await?;
    Ok(Json(MeResponse { user: session.user }))
}

fn check_password(password: &str) -> Result<(), ServerError> {
    if password.len() < 8 {
        return Err(ServerError::BadRequest(
            "password: must be at least 8 characters".into(),
        ));
    }
    Ok(())
}

fn bad_credentials() -> ServerError {
    ServerError::Unauthorized("Invalid email or password".into())
}

/// Mail a verification link through the email channel sender.  Failure is
/// logged, not returned: the token is also in the API response.
pub(crate) async fn send_verification_email(
    state: &AppState,
    to: &str,
    subject: &str,
    code: &str,
) {
    let link = format!("{}/verify?token={}", state.config.public_url, code);
    let payload = OutboundPayload {
        to: to.to_string(),
        subject: Some(subject.to_string()),
        body: format!("Open this link to continue: {link}"),
    };
    if let Err(e) = state.senders.email.send(&payload).await {
        warn!(to = %to, error = %e, "Verification email not delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{bearer, test_context};
    use crate::config::ServerConfig;
    use std::sync::Arc;

    fn signup_req(email: &str) -> Json<SignupRequest> {
        Json(SignupRequest {
            email: email.to_string(),
            password: "hunter2hunter2".to_string(),
            display_name: "Ada".to_string(),
        })
    }

    #[tokio::test]
    async fn signup_then_login_opens_a_session() {
        let ctx = test_context();

        let signed_up = signup(State(ctx.state.clone()), signup_req("ada@example.com"))
            .await
            .unwrap();
        assert_eq!(signed_up.0.user.email, "ada@example.com");
        assert!(signed_up.0.user.org_id.is_none());
        // The verification mail went out through the email sender.
        assert_eq!(ctx.email.sent_count(), 1);

        let logged_in = login(
            State(ctx.state.clone()),
            Json(LoginRequest {
                email: "Ada@Example.com".to_string(),
                password: "hunter2hunter2".to_string(),
            }),
        )
        .await
        .unwrap();

        let who = me(State(ctx.state.clone()), bearer(&logged_in.0.token))
            .await
            .unwrap();
        assert_eq!(who.0.user.id, signed_up.0.user.id);
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_refused() {
        let ctx = test_context();
        signup(State(ctx.state.clone()), signup_req("ada@example.com"))
            .await
            .unwrap();

        let err = login(
            State(ctx.state.clone()),
            Json(LoginRequest {
                email: "ada@example.com".to_string(),
                password: "not-the-password".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let ctx = test_context();
        signup(State(ctx.state.clone()), signup_req("ada@example.com"))
            .await
            .unwrap();
        let err = signup(State(ctx.state.clone()), signup_req("ada@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Conflict(_)));
    }

    #[tokio::test]
    async fn closed_registration_refuses_signup() {
        let mut ctx = test_context();
        let config = ServerConfig {
            registration_open: false,
            ..ServerConfig::default()
        };
        ctx.state.config = Arc::new(config);

        let err = signup(State(ctx.state.clone()), signup_req("ada@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
    }

    #[tokio::test]
    async fn verification_link_confirms_and_signs_in() {
        let ctx = test_context();
        let signed_up = signup(State(ctx.state.clone()), signup_req("ada@example.com"))
            .await
            .unwrap();
        assert!(!signed_up.0.user.email_verified);

        let verified = verify(
            State(ctx.state.clone()),
            Json(VerifyRequest {
                token: signed_up.0.verification_token.clone(),
                password: None,
            }),
        )
        .await
        .unwrap();
        assert!(verified.0.user.email_verified);

        // The returned session token is usable right away.
        let who = me(State(ctx.state.clone()), bearer(&verified.0.token))
            .await
            .unwrap();
        assert_eq!(who.0.user.id, signed_up.0.user.id);
    }

    #[tokio::test]
    async fn garbage_verification_token_is_unauthorized() {
        let ctx = test_context();
        let err = verify(
            State(ctx.state.clone()),
            Json(VerifyRequest {
                token: "not-a-token".to_string(),
                password: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn me_without_token_is_unauthorized() {
        let ctx = test_context();
        let err = me(State(ctx.state.clone()), HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Unauthorized(_)));
    }
}
