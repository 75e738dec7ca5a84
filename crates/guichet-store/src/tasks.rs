use rusqlite::params;

use guichet_shared::models::Task;
use guichet_shared::types::{ConversationId, OrgId, TaskId, TaskStatus, UserId};

use crate::convert::{col_keyword, col_opt_ts, col_opt_uuid, col_ts, col_uuid};
use crate::database::Database;
use crate::error::{not_found, Result};

const TASK_COLS: &str =
    "id, org_id, title, description, assignee_id, conversation_id, due_at, status, created_at, updated_at";

impl Database {
    pub fn insert_task(&self, task: &Task) -> Result<()> {
        self.conn().execute(
            &format!("INSERT INTO tasks ({TASK_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                task.id.to_string(),
                task.org_id.to_string(),
                task.title,
                task.description,
                task.assignee_id.map(|u| u.to_string()),
                task.conversation_id.map(|c| c.to_string()),
                task.due_at.map(|t| t.to_rfc3339()),
                task.status.as_str(),
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, org: OrgId, id: TaskId) -> Result<Task> {
        self.conn()
            .query_row(
                &format!("SELECT {TASK_COLS} FROM tasks WHERE id = ?1 AND org_id = ?2"),
                params![id.to_string(), org.to_string()],
                row_to_task,
            )
            .map_err(not_found)
    }

    pub fn list_tasks(&self, org: OrgId) -> Result<Vec<Task>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {TASK_COLS} FROM tasks WHERE org_id = ?1 ORDER BY created_at"
        ))?;

        let rows = stmt.query_map(params![org.to_string()], row_to_task)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    pub fn update_task(&self, task: &Task) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE tasks
             SET title = ?3, description = ?4, assignee_id = ?5, conversation_id = ?6,
                 due_at = ?7, status = ?8, updated_at = ?9
             WHERE id = ?1 AND org_id = ?2",
            params![
                task.id.to_string(),
                task.org_id.to_string(),
                task.title,
                task.description,
                task.assignee_id.map(|u| u.to_string()),
                task.conversation_id.map(|c| c.to_string()),
                task.due_at.map(|t| t.to_rfc3339()),
                task.status.as_str(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_task(&self, org: OrgId, id: TaskId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM tasks WHERE id = ?1 AND org_id = ?2",
            params![id.to_string(), org.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: TaskId(col_uuid(row, 0)?),
        org_id: OrgId(col_uuid(row, 1)?),
        title: row.get(2)?,
        description: row.get(3)?,
        assignee_id: col_opt_uuid(row, 4)?.map(UserId),
        conversation_id: col_opt_uuid(row, 5)?.map(ConversationId),
        due_at: col_opt_ts(row, 6)?,
        status: col_keyword(row, 7, TaskStatus::parse)?,
        created_at: col_ts(row, 8)?,
        updated_at: col_ts(row, 9)?,
    })
}
