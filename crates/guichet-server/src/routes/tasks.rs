//! Task-board endpoints.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use guichet_shared::models::Task;
use guichet_shared::types::{ConversationId, OrgId, TaskId, TaskStatus, UserId};

use crate::api::AppState;
use crate::auth::authenticate_org;
use crate::error::ServerError;
use crate::permissions::{require, Permission};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orgs/:org_id/tasks", get(list_tasks).post(create_task))
        .route(
            "/orgs/:org_id/tasks/:id",
            get(get_task).put(update_task).delete(delete_task),
        )
}

#[derive(Deserialize)]
struct TaskDraft {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    assignee_id: Option<UserId>,
    #[serde(default)]
    conversation_id: Option<ConversationId>,
    #[serde(default)]
    due_at: Option<DateTime<Utc>>,
    #[serde(default = "default_status")]
    status: TaskStatus,
}

fn default_status() -> TaskStatus {
    TaskStatus::Todo
}

impl TaskDraft {
    fn validate(&self) -> Result<(), ServerError> {
        if self.title.trim().is_empty() {
            return Err(ServerError::BadRequest("title: must not be empty".into()));
        }
        Ok(())
    }
}

async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
) -> Result<Json<Vec<Task>>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.list_tasks(org_id)?))
}

async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<OrgId>,
    Json(draft): Json<TaskDraft>,
) -> Result<Json<Task>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;
    draft.validate()?;

    let now = Utc::now();
    let task = Task {
        id: TaskId::new(),
        org_id,
        title: draft.title.trim().to_string(),
        description: draft.description,
        assignee_id: draft.assignee_id,
        conversation_id: draft.conversation_id,
        due_at: draft.due_at,
        status: draft.status,
        created_at: now,
        updated_at: now,
    };
    {
        let db = state.db.lock().await;
        if let Some(conversation_id) = task.conversation_id {
            db.get_conversation(org_id, conversation_id)?;
        }
        db.insert_task(&task)?;
    }
    Ok(Json(task))
}

async fn get_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, TaskId)>,
) -> Result<Json<Task>, ServerError> {
    authenticate_org(&state, &headers, org_id).await?;
    let db = state.db.lock().await;
    Ok(Json(db.get_task(org_id, id)?))
}

async fn update_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, TaskId)>,
    Json(draft): Json<TaskDraft>,
) -> Result<Json<Task>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;
    draft.validate()?;

    let db = state.db.lock().await;
    let mut task = db.get_task(org_id, id)?;
    if let Some(conversation_id) = draft.conversation_id {
        db.get_conversation(org_id, conversation_id)?;
    }
    task.title = draft.title.trim().to_string();
    task.description = draft.description;
    task.assignee_id = draft.assignee_id;
    task.conversation_id = draft.conversation_id;
    task.due_at = draft.due_at;
    task.status = draft.status;
    task.updated_at = Utc::now();
    db.update_task(&task)?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((org_id, id)): Path<(OrgId, TaskId)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let session = authenticate_org(&state, &headers, org_id).await?;
    require(session.role(), Permission::Operate)?;

    let db = state.db.lock().await;
    if !db.delete_task(org_id, id)? {
        return Err(ServerError::NotFound("No such task".into()));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{seed_member, test_context};
    use guichet_shared::types::Role;

    fn draft(title: &str, status: TaskStatus) -> TaskDraft {
        TaskDraft {
            title: title.to_string(),
            description: None,
            assignee_id: None,
            conversation_id: None,
            due_at: None,
            status,
        }
    }

    #[tokio::test]
    async fn cards_move_across_the_board() {
        let ctx = test_context();
        let (org, user, headers) = seed_member(&ctx.state, Role::Agent).await;

        let created = create_task(
            State(ctx.state.clone()),
            headers.clone(),
            Path(org),
            Json(TaskDraft {
                title: "Call Ada back".to_string(),
                description: Some("She asked about pricing".to_string()),
                assignee_id: Some(user.id),
                conversation_id: None,
                due_at: None,
                status: TaskStatus::Todo,
            }),
        )
        .await
        .unwrap();
        assert_eq!(created.0.status, TaskStatus::Todo);

        let mut update = draft("Call Ada back", TaskStatus::Done);
        update.assignee_id = Some(user.id);
        let done = update_task(
            State(ctx.state.clone()),
            headers.clone(),
            Path((org, created.0.id)),
            Json(update),
        )
        .await
        .unwrap();
        assert_eq!(done.0.status, TaskStatus::Done);

        let all = list_tasks(State(ctx.state.clone()), headers, Path(org))
            .await
            .unwrap();
        assert_eq!(all.0.len(), 1);
        assert_eq!(all.0[0].status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn linked_conversation_must_exist() {
        let ctx = test_context();
        let (org, _user, headers) = seed_member(&ctx.state, Role::Agent).await;

        let mut bad = draft("Follow up", TaskStatus::Todo);
        bad.conversation_id = Some(ConversationId::new());
        let err = create_task(State(ctx.state.clone()), headers, Path(org), Json(bad))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::Store(guichet_store::StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn blank_title_is_refused() {
        let ctx = test_context();
        let (org, _user, headers) = seed_member(&ctx.state, Role::Agent).await;

        let err = create_task(
            State(ctx.state.clone()),
            headers,
            Path(org),
            Json(draft("   ", TaskStatus::Todo)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
    }
}
