//! HTTP API assembly: shared state, router, and the serve loop.
//!
//! Endpoint handlers live under [`crate::routes`], one module per domain
//! area.  Everything org-scoped sits below `/orgs/:org_id` and goes through
//! [`crate::auth::authenticate_org`], so a token for one organization can
//! never read or write another's rows.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::Method,
    middleware,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use guichet_shared::constants::{API_VERSION, MAX_REQUEST_BODY};
use guichet_store::Database;

use crate::auth::ServerKeys;
use crate::config::ServerConfig;
use crate::dispatcher::DispatchCommand;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::realtime::EventHub;
use crate::routes;
use crate::senders::SenderSet;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub keys: Arc<ServerKeys>,
    pub hub: EventHub,
    pub senders: SenderSet,
    /// Nudges the dispatcher ahead of its next tick.
    pub dispatch: mpsc::Sender<DispatchCommand>,
    pub rate_limiter: RateLimiter,
    pub credential_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    // Credential endpoints sit behind a second, much stricter bucket.
    let auth_routes = routes::auth::router().layer(middleware::from_fn_with_state(
        state.credential_limiter.clone(),
        rate_limit_middleware,
    ));

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .nest("/auth", auth_routes)
        .merge(routes::orgs::router())
        .merge(routes::contacts::router())
        .merge(routes::lists::router())
        .merge(routes::conversations::router())
        .merge(routes::templates::router())
        .merge(routes::campaigns::router())
        .merge(routes::workflows::router())
        .merge(routes::tasks::router())
        .merge(routes::events::router())
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    api_version: &'static str,
    registration_open: bool,
    /// Provider keys the channel senders are wired for.
    providers: Vec<&'static str>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        api_version: API_VERSION,
        registration_open: state.config.registration_open,
        providers: vec![
            state.senders.whatsapp.provider(),
            state.senders.email.provider(),
        ],
    })
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::senders::testing::{RecordingSender, StubCatalog};
    use axum::http::HeaderMap;
    use chrono::Utc;
    use guichet_shared::models::{Organization, User};
    use guichet_shared::token::SessionToken;
    use guichet_shared::types::{OrgId, Role, UserId};

    /// Everything a handler test needs: state wired to a temp database and
    /// recording senders, plus the receiving end of the dispatch channel.
    pub(crate) struct TestContext {
        pub state: AppState,
        pub email: Arc<RecordingSender>,
        pub whatsapp: Arc<RecordingSender>,
        pub catalog: Arc<StubCatalog>,
        pub dispatch_rx: mpsc::Receiver<DispatchCommand>,
        _dir: tempfile::TempDir,
    }

    pub(crate) fn test_context() -> TestContext {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("api.db")).unwrap();
        let email = Arc::new(RecordingSender::new("email"));
        let whatsapp = Arc::new(RecordingSender::new("whatsapp"));
        let catalog = Arc::new(StubCatalog::new(Vec::new()));
        let (dispatch_tx, dispatch_rx) = mpsc::channel(16);

        let state = AppState {
            db: Arc::new(Mutex::new(db)),
            keys: Arc::new(ServerKeys::ephemeral()),
            hub: EventHub::new(),
            senders: SenderSet {
                whatsapp: whatsapp.clone(),
                email: email.clone(),
                catalog: catalog.clone(),
            },
            dispatch: dispatch_tx,
            rate_limiter: RateLimiter::general(),
            credential_limiter: RateLimiter::credentials(),
            config: Arc::new(ServerConfig::default()),
        };
        TestContext {
            state,
            email,
            whatsapp,
            catalog,
            dispatch_rx,
            _dir: dir,
        }
    }

    pub(crate) fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {token}").parse().unwrap());
        headers
    }

    /// Insert an organization plus one member and mint a session for them.
    pub(crate) async fn seed_member(
        state: &AppState,
        role: Role,
    ) -> (OrgId, User, HeaderMap) {
        let org = Organization {
            id: OrgId::new(),
            name: "Acme".to_string(),
            created_at: Utc::now(),
        };
        let user_id = UserId::new();
        let user = User {
            id: user_id,
            org_id: Some(org.id),
            email: format!("{}@example.com", &user_id.to_string()[..8]),
            display_name: "Ada".to_string(),
            role,
            email_verified: true,
            created_at: Utc::now(),
        };
        {
            let db = state.db.lock().await;
            db.insert_organization(&org).unwrap();
            db.insert_user(&user).unwrap();
        }
        let token = SessionToken::issue(&state.keys.signing, user.id, Some(org.id), 3600);
        (org.id, user, bearer(&token.encode()))
    }
}
