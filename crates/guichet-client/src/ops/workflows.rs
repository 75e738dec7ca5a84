//! Workflow and enrollment operations.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use guichet_shared::models::{Enrollment, VariableBinding, Workflow, WorkflowStep};
use guichet_shared::types::{ContactId, ListId, MessageChannel, OrgId, TemplateId, WorkflowId};

use crate::api::ApiClient;
use crate::error::ClientError;

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowDraft {
    pub name: String,
    pub list_id: ListId,
    pub active: bool,
}

/// One step as composed in the editor.  Positions are assigned by the
/// server from the submitted order.
#[derive(Debug, Clone, Serialize)]
pub struct StepDraft {
    pub channel: MessageChannel,
    pub template_id: Option<TemplateId>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub mappings: Vec<VariableBinding>,
    pub delay_days: u32,
    pub send_time: Option<NaiveTime>,
}

/// A workflow together with its ordered steps.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDetail {
    pub workflow: Workflow,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Serialize)]
struct EnrollRequest {
    contact_id: ContactId,
}

#[derive(Deserialize)]
struct ResyncOutcome {
    queued: bool,
}

pub async fn list(api: &ApiClient, org_id: OrgId) -> Result<Vec<Workflow>, ClientError> {
    api.get(&format!("orgs/{org_id}/workflows")).await
}

pub async fn create(
    api: &ApiClient,
    org_id: OrgId,
    draft: &WorkflowDraft,
) -> Result<Workflow, ClientError> {
    if draft.name.trim().is_empty() {
        return Err(ClientError::Validation("name: must not be empty".into()));
    }
    api.post(&format!("orgs/{org_id}/workflows"), draft).await
}

pub async fn get(
    api: &ApiClient,
    org_id: OrgId,
    id: WorkflowId,
) -> Result<WorkflowDetail, ClientError> {
    api.get(&format!("orgs/{org_id}/workflows/{id}")).await
}

pub async fn update(
    api: &ApiClient,
    org_id: OrgId,
    id: WorkflowId,
    draft: &WorkflowDraft,
) -> Result<Workflow, ClientError> {
    api.put(&format!("orgs/{org_id}/workflows/{id}"), draft).await
}

pub async fn delete(api: &ApiClient, org_id: OrgId, id: WorkflowId) -> Result<(), ClientError> {
    api.delete(&format!("orgs/{org_id}/workflows/{id}")).await
}

/// Replaces the whole step sequence with `steps`, in the given order.
pub async fn replace_steps(
    api: &ApiClient,
    org_id: OrgId,
    id: WorkflowId,
    steps: &[StepDraft],
) -> Result<Vec<WorkflowStep>, ClientError> {
    api.put(&format!("orgs/{org_id}/workflows/{id}/steps"), steps)
        .await
}

/// Removes one step; the reply is the renumbered remainder.
pub async fn delete_step(
    api: &ApiClient,
    org_id: OrgId,
    id: WorkflowId,
    step_id: Uuid,
) -> Result<Vec<WorkflowStep>, ClientError> {
    api.delete_json(&format!("orgs/{org_id}/workflows/{id}/steps/{step_id}"))
        .await
}

pub async fn list_enrollments(
    api: &ApiClient,
    org_id: OrgId,
    id: WorkflowId,
) -> Result<Vec<Enrollment>, ClientError> {
    api.get(&format!("orgs/{org_id}/workflows/{id}/enrollments"))
        .await
}

/// Enrolls one contact.  A paused enrollment resumes; an active one is a
/// conflict the server reports.
pub async fn enroll(
    api: &ApiClient,
    org_id: OrgId,
    id: WorkflowId,
    contact_id: ContactId,
) -> Result<Enrollment, ClientError> {
    api.post(
        &format!("orgs/{org_id}/workflows/{id}/enroll"),
        &EnrollRequest { contact_id },
    )
    .await
}

/// Pauses a contact's enrollment; enrolling again later resumes it.
pub async fn unenroll(
    api: &ApiClient,
    org_id: OrgId,
    id: WorkflowId,
    contact_id: ContactId,
) -> Result<Enrollment, ClientError> {
    api.post(
        &format!("orgs/{org_id}/workflows/{id}/unenroll"),
        &EnrollRequest { contact_id },
    )
    .await
}

/// Asks the server to re-run the source list and enroll new matches.
pub async fn resync(api: &ApiClient, org_id: OrgId, id: WorkflowId) -> Result<bool, ClientError> {
    let outcome: ResyncOutcome = api
        .post(
            &format!("orgs/{org_id}/workflows/{id}/resync"),
            &serde_json::json!({}),
        )
        .await?;
    Ok(outcome.queued)
}
