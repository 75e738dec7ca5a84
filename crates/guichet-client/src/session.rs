//! Top-level screen router.
//!
//! The one explicit state machine in the client: which full-screen view is
//! showing.  Everything below the dashboard is ordinary component state.

use guichet_shared::models::User;
use guichet_shared::types::VerificationPurpose;

use crate::error::ClientError;

/// The four top-level screens.
///
/// Routing rules: a pending verification link always wins; otherwise no
/// session means login, a session without an organization means
/// onboarding, and a session with one lands on the dashboard.  Each of
/// the first three leads to the dashboard on success, and signing out
/// returns to login from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    Onboarding,
    /// Consuming an emailed link.  Signup confirmations just need the
    /// click; invitations also ask for the first password.
    Verification(VerificationPurpose),
    Dashboard,
}

impl Screen {
    /// Where the app should be for the given session state.
    pub fn route(user: Option<&User>, pending_link: Option<VerificationPurpose>) -> Screen {
        if let Some(purpose) = pending_link {
            return Screen::Verification(purpose);
        }
        match user {
            None => Screen::Login,
            Some(user) if user.org_id.is_some() => Screen::Dashboard,
            Some(_) => Screen::Onboarding,
        }
    }

    /// Screen to fall back to when a call fails.  Only an auth failure
    /// moves the router; every other error leaves the screen alone.
    pub fn for_error(error: &ClientError) -> Option<Screen> {
        match error {
            ClientError::Auth(_) => Some(Screen::Login),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use guichet_shared::types::{OrgId, Role, UserId};

    fn user(org: Option<OrgId>) -> User {
        User {
            id: UserId::new(),
            org_id: org,
            email: "ada@example.com".to_string(),
            display_name: "Ada".to_string(),
            role: Role::Admin,
            email_verified: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_unauthenticated_routes_to_login() {
        assert_eq!(Screen::route(None, None), Screen::Login);
    }

    #[test]
    fn test_member_without_org_routes_to_onboarding() {
        let u = user(None);
        assert_eq!(Screen::route(Some(&u), None), Screen::Onboarding);
    }

    #[test]
    fn test_member_with_org_routes_to_dashboard() {
        let u = user(Some(OrgId::new()));
        assert_eq!(Screen::route(Some(&u), None), Screen::Dashboard);
    }

    #[test]
    fn test_verification_link_wins_over_everything() {
        let u = user(Some(OrgId::new()));
        assert_eq!(
            Screen::route(None, Some(VerificationPurpose::SignupConfirmation)),
            Screen::Verification(VerificationPurpose::SignupConfirmation)
        );
        assert_eq!(
            Screen::route(Some(&u), Some(VerificationPurpose::InvitationPasswordSet)),
            Screen::Verification(VerificationPurpose::InvitationPasswordSet)
        );
    }

    #[test]
    fn test_only_auth_errors_move_the_router() {
        assert_eq!(
            Screen::for_error(&ClientError::Auth("expired".into())),
            Some(Screen::Login)
        );
        assert_eq!(Screen::for_error(&ClientError::Remote("500".into())), None);
        assert_eq!(
            Screen::for_error(&ClientError::Realtime("dropped".into())),
            None
        );
        assert_eq!(
            Screen::for_error(&ClientError::Validation("name".into())),
            None
        );
    }
}
