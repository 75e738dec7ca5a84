//! Task board operations.

use chrono::{DateTime, Utc};
use serde::Serialize;

use guichet_shared::models::Task;
use guichet_shared::types::{ConversationId, OrgId, TaskId, TaskStatus, UserId};

use crate::api::ApiClient;
use crate::error::ClientError;

#[derive(Debug, Clone, Serialize)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Option<UserId>,
    pub conversation_id: Option<ConversationId>,
    pub due_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
}

impl Default for TaskDraft {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: None,
            assignee_id: None,
            conversation_id: None,
            due_at: None,
            status: TaskStatus::Todo,
        }
    }
}

pub async fn list(api: &ApiClient, org_id: OrgId) -> Result<Vec<Task>, ClientError> {
    api.get(&format!("orgs/{org_id}/tasks")).await
}

pub async fn create(api: &ApiClient, org_id: OrgId, draft: &TaskDraft) -> Result<Task, ClientError> {
    if draft.title.trim().is_empty() {
        return Err(ClientError::Validation("title: must not be empty".into()));
    }
    api.post(&format!("orgs/{org_id}/tasks"), draft).await
}

pub async fn get(api: &ApiClient, org_id: OrgId, id: TaskId) -> Result<Task, ClientError> {
    api.get(&format!("orgs/{org_id}/tasks/{id}")).await
}

pub async fn update(
    api: &ApiClient,
    org_id: OrgId,
    id: TaskId,
    draft: &TaskDraft,
) -> Result<Task, ClientError> {
    if draft.title.trim().is_empty() {
        return Err(ClientError::Validation("title: must not be empty".into()));
    }
    api.put(&format!("orgs/{org_id}/tasks/{id}"), draft).await
}

pub async fn delete(api: &ApiClient, org_id: OrgId, id: TaskId) -> Result<(), ClientError> {
    api.delete(&format!("orgs/{org_id}/tasks/{id}")).await
}
