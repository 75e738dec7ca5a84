//! The per-organization realtime stream.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};

use guichet_shared::types::OrgId;

use crate::api::AppState;
use crate::auth::authenticate_org;
use crate::error::ServerError;
use crate::realtime;

pub fn router() -> Router<AppState> {
    Router::new().route("/orgs/:org_id/events", get(event_stream))
}

/// SSE stream of the organization's realtime events.  The connection stays
/// open until the client drops it; keep-alives come from the SSE layer.
async fn event_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
) -> Result<impl IntoResponse, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let receiver = state.hub.subscribe(org_id).await;
    Ok(realtime::sse_response(org_id, receiver))
}
