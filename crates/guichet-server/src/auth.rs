//! Session authentication and password handling.
//!
//! Bearer tokens are Ed25519-signed [`SessionToken`]s minted at login.  The
//! token carries the user id only; role and organization membership are read
//! from the user row on every request so a role change or removal takes
//! effect immediately.

use axum::http::HeaderMap;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use guichet_shared::models::User;
use guichet_shared::token::SessionToken;
use guichet_shared::types::{OrgId, Role};
use guichet_store::StoreError;

use crate::api::AppState;
use crate::error::ServerError;

// ---------------------------------------------------------------------------
// Signing keys
// ---------------------------------------------------------------------------

/// The server's token-signing keypair.
pub struct ServerKeys {
    pub signing: SigningKey,
    pub verifying: VerifyingKey,
}

impl ServerKeys {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&seed);
        let verifying = signing.verifying_key();
        Self { signing, verifying }
    }

    /// Fresh random keypair.  Tokens signed with it die with the process.
    pub fn ephemeral() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let verifying = signing.verifying_key();
        Self { signing, verifying }
    }
}

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

pub fn hash_password(plain: &str) -> Result<String, ServerError> {
    bcrypt::hash(plain, bcrypt::DEFAULT_COST)
        .map_err(|e| ServerError::Internal(format!("Password hashing failed: {e}")))
}

pub fn verify_password(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// An authenticated caller.
pub struct Session {
    pub user: User,
}

impl Session {
    /// The caller's organization, or an error when they have not completed
    /// onboarding yet.
    pub fn org_id(&self) -> Result<OrgId, ServerError> {
        self.user
            .org_id
            .ok_or_else(|| ServerError::Forbidden("No organization".into()))
    }

    pub fn role(&self) -> Role {
        self.user.role
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let auth = headers.get("authorization")?.to_str().ok()?;
    auth.strip_prefix("Bearer ")
}

/// Verify the bearer token and load the caller's current user row.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Session, ServerError> {
    let raw = bearer_token(headers)
        .ok_or_else(|| ServerError::Unauthorized("Missing bearer token".into()))?;

    let token = SessionToken::decode(raw)?;
    let claims = token.verify(&state.keys.verifying)?;

    let user = {
        let db = state.db.lock().await;
        match db.get_user(claims.user_id) {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                return Err(ServerError::Unauthorized("Unknown user".into()))
            }
            Err(e) => return Err(e.into()),
        }
    };

    Ok(Session { user })
}

/// Authenticate and check that the caller belongs to the organization in the
/// request path.  Every org-scoped route goes through this.
pub async fn authenticate_org(
    state: &AppState,
    headers: &HeaderMap,
    org_id: OrgId,
) -> Result<Session, ServerError> {
    let session = authenticate(state, headers).await?;
    if session.org_id()? != org_id {
        return Err(ServerError::Forbidden("Wrong organization".into()));
    }
    Ok(session)
}
