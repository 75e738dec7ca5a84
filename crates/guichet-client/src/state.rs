//! Application state owned by the UI shell.
//!
//! One [`AppState`] instance is created at startup and threaded through
//! the frontend.  Nothing here is ambient or global: opening a session
//! initializes the realtime pieces and hands back the update feed, and
//! signing out tears all of it down again.

use tokio::sync::mpsc;
use tracing::warn;

use guichet_shared::models::Organization;
use guichet_shared::types::{ConversationId, OrgId, VerificationPurpose};

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::inbox::Inbox;
use crate::ops::auth::SessionInfo;
use crate::realtime::{self, RealtimeHandle, SyncUpdate};
use crate::session::Screen;

pub struct AppState {
    /// HTTP client; carries the session token while one is open.
    pub api: ApiClient,

    /// The signed-in account, `None` on the login screen.
    pub session: Option<SessionInfo>,

    /// The tenant, loaded after onboarding or at session start.
    pub organization: Option<Organization>,

    /// Which top-level screen is showing.
    pub screen: Screen,

    /// Conversation and message cache fed by the realtime updates.
    pub inbox: Inbox,

    realtime: Option<RealtimeHandle>,
}

impl AppState {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            api: ApiClient::new(config),
            session: None,
            organization: None,
            screen: Screen::Login,
            inbox: Inbox::new(),
            realtime: None,
        }
    }

    /// Session start: adopts the token, routes the screen and, when the
    /// account already belongs to an organization, opens the realtime
    /// subscription.  The returned receiver is the UI loop's update feed;
    /// accounts still in onboarding get `None` and subscribe after
    /// creating their organization (by calling this again with the fresh
    /// session).  Must run inside the tokio runtime.
    pub fn start_session(
        &mut self,
        session: SessionInfo,
    ) -> Option<mpsc::UnboundedReceiver<SyncUpdate>> {
        // A re-login replaces any previous subscription.
        if let Some(previous) = self.realtime.take() {
            previous.release();
        }

        self.api = self.api.with_token(session.token.as_str());
        self.screen = Screen::route(Some(&session.user), None);
        let org_id = session.user.org_id;
        self.session = Some(session);

        let org_id = org_id?;
        let (handle, updates) = realtime::connect(self.api.clone(), org_id);
        self.realtime = Some(handle);
        Some(updates)
    }

    /// Routes to the verification screen for an emailed link.
    pub fn open_verification(&mut self, purpose: VerificationPurpose) {
        self.screen = Screen::Verification(purpose);
    }

    pub fn org_id(&self) -> Option<OrgId> {
        self.session.as_ref().and_then(|s| s.user.org_id)
    }

    /// Tells the resync backstop which thread is on screen.
    pub fn set_open_conversation(&self, conversation: Option<ConversationId>) {
        if let Some(handle) = &self.realtime {
            handle.set_open_conversation(conversation);
        }
    }

    /// Applies one update from the feed.  Returns false for redelivered
    /// events the inbox dropped, so callers can skip a re-render.
    pub fn apply_update(&mut self, update: SyncUpdate) -> bool {
        match update {
            SyncUpdate::Event(event) => self.inbox.apply_event(&event),
            SyncUpdate::Snapshot {
                conversation_id,
                messages,
            } => {
                self.inbox.replace_messages(conversation_id, messages);
                true
            }
            SyncUpdate::Offline => {
                warn!("Realtime stream offline; the resync timer carries updates now");
                true
            }
        }
    }

    /// Reacts to a failed remote call.  A rejected or expired session
    /// tears everything down and lands on login; any other error leaves
    /// the screen alone.
    pub fn handle_error(&mut self, error: &ClientError) {
        if let Some(screen) = Screen::for_error(error) {
            self.sign_out();
            self.screen = screen;
        }
    }

    /// Sign-out teardown: releases the subscription and its timers, drops
    /// the caches and the token, and lands back on the login screen.
    pub fn sign_out(&mut self) {
        if let Some(handle) = self.realtime.take() {
            handle.release();
        }
        self.inbox.clear();
        self.session = None;
        self.organization = None;
        self.api = self.api.without_token();
        self.screen = Screen::Login;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use guichet_shared::models::User;
    use guichet_shared::types::{Role, UserId};

    fn offline_state() -> AppState {
        AppState::new(&ClientConfig::new("http://127.0.0.1:1"))
    }

    fn session(org: Option<OrgId>) -> SessionInfo {
        SessionInfo {
            token: "token".to_string(),
            user: User {
                id: UserId::new(),
                org_id: org,
                email: "ada@example.com".to_string(),
                display_name: "Ada".to_string(),
                role: Role::Admin,
                email_verified: true,
                created_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn session_with_org_lands_on_dashboard_and_subscribes() {
        let mut state = offline_state();
        let updates = state.start_session(session(Some(OrgId::new())));

        assert!(updates.is_some());
        assert_eq!(state.screen, Screen::Dashboard);
        assert!(state.api.has_token());
        assert!(state.org_id().is_some());
    }

    #[tokio::test]
    async fn session_without_org_goes_to_onboarding() {
        let mut state = offline_state();
        let updates = state.start_session(session(None));

        assert!(updates.is_none());
        assert_eq!(state.screen, Screen::Onboarding);
        assert!(state.api.has_token());
        assert_eq!(state.org_id(), None);
    }

    #[tokio::test]
    async fn sign_out_tears_everything_down() {
        let mut state = offline_state();
        let _updates = state.start_session(session(Some(OrgId::new())));

        state.sign_out();
        assert_eq!(state.screen, Screen::Login);
        assert!(state.session.is_none());
        assert!(!state.api.has_token());
        assert!(state.inbox.ordered_conversations().is_empty());
    }

    #[tokio::test]
    async fn auth_failure_falls_back_to_login() {
        let mut state = offline_state();
        let _updates = state.start_session(session(Some(OrgId::new())));
        assert_eq!(state.screen, Screen::Dashboard);

        state.handle_error(&ClientError::Remote("500".into()));
        assert_eq!(state.screen, Screen::Dashboard);

        state.handle_error(&ClientError::Auth("token expired".into()));
        assert_eq!(state.screen, Screen::Login);
        assert!(state.session.is_none());
        assert!(!state.api.has_token());
    }

    #[tokio::test]
    async fn verification_link_routes_to_the_verification_screen() {
        let mut state = offline_state();
        state.open_verification(VerificationPurpose::InvitationPasswordSet);
        assert_eq!(
            state.screen,
            Screen::Verification(VerificationPurpose::InvitationPasswordSet)
        );
    }
}
