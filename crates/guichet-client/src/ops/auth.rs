//! Account operations: signup, login, verification links, current user.

use serde::{Deserialize, Serialize};

use guichet_shared::models::User;

use crate::api::ApiClient;
use crate::error::ClientError;

/// An opened session: the bearer token plus the account it belongs to.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub token: String,
    pub user: User,
}

/// Signup result.  The verification token is the same one mailed to the
/// address, surfaced for instances without a mail provider.
#[derive(Debug, Clone, Deserialize)]
pub struct SignupOutcome {
    pub user: User,
    pub verification_token: String,
}

#[derive(Serialize)]
struct SignupRequest<'a> {
    email: &'a str,
    password: &'a str,
    display_name: &'a str,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
    password: Option<&'a str>,
}

#[derive(Deserialize)]
struct MeResponse {
    user: User,
}

pub async fn sign_up(
    api: &ApiClient,
    email: &str,
    password: &str,
    display_name: &str,
) -> Result<SignupOutcome, ClientError> {
    if email.trim().is_empty() {
        return Err(ClientError::Validation("email: must not be empty".into()));
    }
    if password.is_empty() {
        return Err(ClientError::Validation(
            "password: must not be empty".into(),
        ));
    }
    api.post(
        "auth/signup",
        &SignupRequest {
            email,
            password,
            display_name,
        },
    )
    .await
}

pub async fn log_in(api: &ApiClient, email: &str, password: &str) -> Result<SessionInfo, ClientError> {
    api.post("auth/login", &LoginRequest { email, password })
        .await
}

/// Consumes a verification link token.  `password` is required when the
/// link is an invitation, ignored otherwise.
pub async fn verify_email(
    api: &ApiClient,
    token: &str,
    password: Option<&str>,
) -> Result<SessionInfo, ClientError> {
    api.post("auth/verify", &VerifyRequest { token, password })
        .await
}

pub async fn current_user(api: &ApiClient) -> Result<User, ClientError> {
    let response: MeResponse = api.get("auth/me").await?;
    Ok(response.user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    #[tokio::test]
    async fn blank_credentials_never_reach_the_network() {
        // Nothing listens on this address; a request would fail as Remote.
        let api = ApiClient::new(&ClientConfig::new("http://127.0.0.1:1"));

        let err = sign_up(&api, "  ", "hunter2hunter2", "Ada").await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));

        let err = sign_up(&api, "ada@example.com", "", "Ada").await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
    }
}
