//! Workflow endpoints: the sequence definition, its steps, and enrollment
//! management.
//!
//! Step positions are owned by the store: a replace writes the submitted
//! order as 1..N and a delete closes the gap, so clients never see a hole.
//! Anything that should enroll people right away (activation, an explicit
//! resync) nudges the dispatcher instead of waiting for its next tick.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use guichet_shared::models::{Enrollment, VariableBinding, Workflow, WorkflowStep};
use guichet_shared::types::{
    ContactId, EnrollmentId, EnrollmentStatus, ListId, MessageChannel, OrgId, TemplateId,
    WorkflowId,
};

use crate::api::AppState;
use crate::auth::authenticate_org;
use crate::dispatcher::{schedule_for, DispatchCommand};
use crate::error::ServerError;
use crate::permissions::{require, Permission};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/orgs/:org_id/workflows",
            get(list_workflows).post(create_workflow),
        )
        .route(
            "/orgs/:org_id/workflows/:id",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/orgs/:org_id/workflows/:id/steps", put(replace_steps))
        .route(
            "/orgs/:org_id/workflows/:id/steps/:step_id",
            axum::routing::delete(delete_step),
        )
        .route(
            "/orgs/:org_id/workflows/:id/enrollments",
            get(list_enrollments),
        )
        .route("/orgs/:org_id/workflows/:id/enroll", post(enroll))
        .route("/orgs/:org_id/workflows/:id/unenroll", post(unenroll))
        .route("/orgs/:org_id/workflows/:id/resync", post(resync))
}

#[derive(Deserialize)]
struct WorkflowDraft {
    name: String,
    list_id: ListId,
    #[serde(default)]
    active: bool,
}

/// One step as submitted by the editor.  Ids and positions are assigned
/// server-side.
#[derive(Deserialize)]
struct StepDraft {
    channel: MessageChannel,
    #[serde(default)]
    template_id: Option<TemplateId>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    mappings: Vec<VariableBinding>,
    #[serde(default)]
    delay_days: u32,
    #[serde(default)]
    send_time: Option<chrono::NaiveTime>,
}

impl StepDraft {
    fn check(&self, index: usize) -> Result<(), ServerError> {
        let blank = |s: &Option<String>| s.as_deref().map(str::trim).unwrap_or("").is_empty();
        match self.channel {
            MessageChannel::WhatsappTemplate => {
                if self.template_id.is_none() {
                    return Err(ServerError::BadRequest(format!(
                        "steps[{index}]: template steps need a template"
                    )));
                }
            }
            MessageChannel::Email => {
                if blank(&self.subject) || blank(&self.body) {
                    return Err(ServerError::BadRequest(format!(
                        "steps[{index}]: email steps need a subject and a body"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct WorkflowDetail {
    workflow: Workflow,
    steps: Vec<WorkflowStep>,
}

#[derive(Deserialize)]
struct EnrollRequest {
    contact_id: ContactId,
}

#[derive(Serialize)]
struct ResyncResponse {
    queued: bool,
}

async fn list_workflows(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
) -> Result<Json<Vec<Workflow>>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.list_workflows(org_id)?))
}

async fn create_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
    Json(draft): Json<WorkflowDraft>,
) -> Result<Json<Workflow>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;
    if draft.name.trim().is_empty() {
        return Err(ServerError::BadRequest("name: must not be empty".into()));
    }

    let now = Utc::now();
    let workflow = Workflow {
        id: WorkflowId::new(),
        org_id,
        name: draft.name.trim().to_string(),
        list_id: draft.list_id,
        active: draft.active,
        created_at: now,
        updated_at: now,
    };
    {
        let db = state.db.lock().await;
        db.get_list(org_id, draft.list_id)?;
        db.insert_workflow(&workflow)?;
    }
    if workflow.active {
        nudge_sync(&state, org_id, workflow.id).await;
    }
    Ok(Json(workflow))
}

async fn get_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, WorkflowId)>,
) -> Result<Json<WorkflowDetail>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    let workflow = db.get_workflow(org_id, id)?;
    let steps = db.list_steps(org_id, id)?;
    Ok(Json(WorkflowDetail { workflow, steps }))
}

async fn update_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, WorkflowId)>,
    Json(draft): Json<WorkflowDraft>,
) -> Result<Json<Workflow>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;
    if draft.name.trim().is_empty() {
        return Err(ServerError::BadRequest("name: must not be empty".into()));
    }

    let (workflow, newly_active) = {
        let db = state.db.lock().await;
        let mut workflow = db.get_workflow(org_id, id)?;
        db.get_list(org_id, draft.list_id)?;
        let newly_active = draft.active && !workflow.active;
        workflow.name = draft.name.trim().to_string();
        workflow.list_id = draft.list_id;
        workflow.active = draft.active;
        workflow.updated_at = Utc::now();
        db.update_workflow(&workflow)?;
        (workflow, newly_active)
    };
    if newly_active {
        nudge_sync(&state, org_id, id).await;
    }
    Ok(Json(workflow))
}

async fn delete_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, WorkflowId)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;

    let mut db = state.db.lock().await;
    // Steps and enrollments go first so the due scan never sees orphans.
    db.replace_steps(org_id, id, &[])?;
    for enrollment in db.list_enrollments(org_id, id)? {
        db.delete_enrollment(org_id, enrollment.id)?;
    }
    if !db.delete_workflow(org_id, id)? {
        return Err(ServerError::NotFound("No such workflow".into()));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn replace_steps(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, WorkflowId)>,
    Json(drafts): Json<Vec<StepDraft>>,
) -> Result<Json<Vec<WorkflowStep>>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;
    for (index, draft) in drafts.iter().enumerate() {
        draft.check(index)?;
    }

    let steps: Vec<WorkflowStep> = drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| WorkflowStep {
            id: Uuid::new_v4(),
            workflow_id: id,
            position: (index + 1) as u32,
            channel: draft.channel,
            template_id: draft.template_id,
            subject: draft.subject,
            body: draft.body,
            mappings: draft.mappings,
            delay_days: draft.delay_days,
            send_time: draft.send_time,
        })
        .collect();

    let mut db = state.db.lock().await;
    db.replace_steps(org_id, id, &steps)?;
    Ok(Json(db.list_steps(org_id, id)?))
}

async fn delete_step(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id, step_id)): Path<(OrgId, WorkflowId, Uuid)>,
) -> Result<Json<Vec<WorkflowStep>>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;

    let mut db = state.db.lock().await;
    if !db.delete_step(org_id, id, step_id)? {
        return Err(ServerError::NotFound("No such step".into()));
    }
    Ok(Json(db.list_steps(org_id, id)?))
}

async fn list_enrollments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, WorkflowId)>,
) -> Result<Json<Vec<Enrollment>>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    db.get_workflow(org_id, id)?;
    Ok(Json(db.list_enrollments(org_id, id)?))
}

/// Enroll one contact by hand.
///
/// A paused enrollment is resumed where it left off; an active one is a
/// conflict.  Contacts that already ran the workflow to completion get a
/// fresh enrollment, unlike the list scan, which enrolls everyone once.
async fn enroll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, WorkflowId)>,
    Json(req): Json<EnrollRequest>,
) -> Result<Json<Enrollment>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;

    let now = Utc::now();
    let db = state.db.lock().await;
    let workflow = db.get_workflow(org_id, id)?;
    if !workflow.active {
        return Err(ServerError::Conflict("The workflow is not active".into()));
    }
    db.get_contact(org_id, req.contact_id)?;
    if db.active_enrollment_for(org_id, id, req.contact_id)?.is_some() {
        return Err(ServerError::Conflict("Already enrolled".into()));
    }

    let steps = db.list_steps(org_id, id)?;
    if steps.is_empty() {
        return Err(ServerError::BadRequest("The workflow has no steps".into()));
    }

    let paused = db
        .list_enrollments(org_id, id)?
        .into_iter()
        .find(|e| e.contact_id == req.contact_id && e.status == EnrollmentStatus::Paused);

    let enrollment = match paused {
        Some(mut enrollment) => {
            let next = steps
                .iter()
                .find(|s| s.position == enrollment.current_step + 1);
            match next {
                Some(step) => {
                    enrollment.status = EnrollmentStatus::Active;
                    enrollment.next_send_at = Some(schedule_for(step, now));
                    enrollment.retry_count = 0;
                    enrollment.updated_at = now;
                }
                None => {
                    // The workflow shrank below the resume point.
                    enrollment.status = EnrollmentStatus::Completed;
                    enrollment.next_send_at = None;
                    enrollment.updated_at = now;
                }
            }
            db.update_enrollment(&enrollment)?;
            enrollment
        }
        None => {
            let enrollment = Enrollment {
                id: EnrollmentId::new(),
                org_id,
                workflow_id: id,
                contact_id: req.contact_id,
                status: EnrollmentStatus::Active,
                current_step: 0,
                next_send_at: Some(schedule_for(&steps[0], now)),
                retry_count: 0,
                last_error: None,
                created_at: now,
                updated_at: now,
            };
            db.insert_enrollment(&enrollment)?;
            enrollment
        }
    };
    info!(org = %org_id, workflow = %id, contact = %req.contact_id, "Contact enrolled");
    Ok(Json(enrollment))
}

/// Pause the contact's active enrollment.  The sequence can be resumed
/// later through the enroll call.
async fn unenroll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, WorkflowId)>,
    Json(req): Json<EnrollRequest>,
) -> Result<Json<Enrollment>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;

    let db = state.db.lock().await;
    let mut enrollment = db
        .active_enrollment_for(org_id, id, req.contact_id)?
        .ok_or_else(|| ServerError::NotFound("No active enrollment".into()))?;
    enrollment.status = EnrollmentStatus::Paused;
    enrollment.updated_at = Utc::now();
    db.update_enrollment(&enrollment)?;
    Ok(Json(enrollment))
}

/// Queue a membership rescan so list changes enroll without waiting for
/// the next dispatcher tick.
async fn resync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, WorkflowId)>,
) -> Result<Json<ResyncResponse>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;

    {
        let db = state.db.lock().await;
        let workflow = db.get_workflow(org_id, id)?;
        if !workflow.active {
            return Err(ServerError::Conflict("The workflow is not active".into()));
        }
    }
    nudge_sync(&state, org_id, id).await;
    Ok(Json(ResyncResponse { queued: true }))
}

async fn nudge_sync(state: &AppState, org_id: OrgId, workflow_id: WorkflowId) {
    let command = DispatchCommand::SyncWorkflow {
        org_id,
        workflow_id,
    };
    if let Err(e) = state.dispatch.send(command).await {
        warn!(workflow = %workflow_id, error = %e, "Dispatcher nudge failed; the tick scan will catch it");
    }
}
