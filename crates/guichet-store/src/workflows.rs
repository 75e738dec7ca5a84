use rusqlite::params;
use uuid::Uuid;

use guichet_shared::models::{Workflow, WorkflowStep};
use guichet_shared::types::{ListId, MessageChannel, OrgId, TemplateId, WorkflowId};

use crate::convert::{col_json, col_keyword, col_opt_time, col_opt_uuid, col_ts, col_uuid};
use crate::database::Database;
use crate::error::{not_found, Result};

const WORKFLOW_COLS: &str = "id, org_id, name, list_id, active, created_at, updated_at";
const STEP_COLS: &str =
    "id, workflow_id, position, channel, template_id, subject, body, mappings, delay_days, send_time";

impl Database {
    pub fn insert_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.conn().execute(
            &format!("INSERT INTO workflows ({WORKFLOW_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                workflow.id.to_string(),
                workflow.org_id.to_string(),
                workflow.name,
                workflow.list_id.to_string(),
                workflow.active,
                workflow.created_at.to_rfc3339(),
                workflow.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_workflow(&self, org: OrgId, id: WorkflowId) -> Result<Workflow> {
        self.conn()
            .query_row(
                &format!("SELECT {WORKFLOW_COLS} FROM workflows WHERE id = ?1 AND org_id = ?2"),
                params![id.to_string(), org.to_string()],
                row_to_workflow,
            )
            .map_err(not_found)
    }

    pub fn list_workflows(&self, org: OrgId) -> Result<Vec<Workflow>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {WORKFLOW_COLS} FROM workflows WHERE org_id = ?1 ORDER BY name"
        ))?;

        let rows = stmt.query_map(params![org.to_string()], row_to_workflow)?;

        let mut workflows = Vec::new();
        for row in rows {
            workflows.push(row?);
        }
        Ok(workflows)
    }

    /// All active workflows across tenants, for the dispatcher's
    /// enrollment scan.
    pub fn list_active_workflows(&self) -> Result<Vec<Workflow>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {WORKFLOW_COLS} FROM workflows WHERE active = 1"
        ))?;

        let rows = stmt.query_map([], row_to_workflow)?;

        let mut workflows = Vec::new();
        for row in rows {
            workflows.push(row?);
        }
        Ok(workflows)
    }

    pub fn update_workflow(&self, workflow: &Workflow) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE workflows SET name = ?3, list_id = ?4, active = ?5, updated_at = ?6
             WHERE id = ?1 AND org_id = ?2",
            params![
                workflow.id.to_string(),
                workflow.org_id.to_string(),
                workflow.name,
                workflow.list_id.to_string(),
                workflow.active,
                workflow.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_workflow(&self, org: OrgId, id: WorkflowId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM workflows WHERE id = ?1 AND org_id = ?2",
            params![id.to_string(), org.to_string()],
        )?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    pub fn list_steps(&self, org: OrgId, workflow: WorkflowId) -> Result<Vec<WorkflowStep>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {STEP_COLS} FROM workflow_steps
             WHERE workflow_id IN (SELECT id FROM workflows WHERE id = ?1 AND org_id = ?2)
             ORDER BY position"
        ))?;

        let rows = stmt.query_map(
            params![workflow.to_string(), org.to_string()],
            row_to_step,
        )?;

        let mut steps = Vec::new();
        for row in rows {
            steps.push(row?);
        }
        Ok(steps)
    }

    /// The step at `position`, used by the dispatcher to pick the next send.
    pub fn get_step_at(
        &self,
        org: OrgId,
        workflow: WorkflowId,
        position: u32,
    ) -> Result<WorkflowStep> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {STEP_COLS} FROM workflow_steps
                     WHERE workflow_id IN (SELECT id FROM workflows WHERE id = ?1 AND org_id = ?2)
                       AND position = ?3"
                ),
                params![workflow.to_string(), org.to_string(), position],
                row_to_step,
            )
            .map_err(not_found)
    }

    /// Replace a workflow's whole step list in one transaction, assigning
    /// dense 1..N positions in the given order.
    pub fn replace_steps(
        &mut self,
        org: OrgId,
        workflow: WorkflowId,
        steps: &[WorkflowStep],
    ) -> Result<()> {
        // Ownership check up front so a bad org cannot clear steps.
        self.get_workflow(org, workflow)?;

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "DELETE FROM workflow_steps WHERE workflow_id = ?1",
            params![workflow.to_string()],
        )?;
        for (index, step) in steps.iter().enumerate() {
            tx.execute(
                &format!(
                    "INSERT INTO workflow_steps ({STEP_COLS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    step.id.to_string(),
                    workflow.to_string(),
                    (index + 1) as u32,
                    step.channel.as_str(),
                    step.template_id.map(|t| t.to_string()),
                    step.subject,
                    step.body,
                    serde_json::to_string(&step.mappings)?,
                    step.delay_days,
                    step.send_time.map(|t| t.format("%H:%M:%S").to_string()),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove one step and close the gap so positions stay dense.
    pub fn delete_step(&mut self, org: OrgId, workflow: WorkflowId, step_id: Uuid) -> Result<bool> {
        self.get_workflow(org, workflow)?;

        let tx = self.conn_mut().transaction()?;
        let position: Option<u32> = tx
            .query_row(
                "SELECT position FROM workflow_steps WHERE id = ?1 AND workflow_id = ?2",
                params![step_id.to_string(), workflow.to_string()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some(position) = position else {
            return Ok(false);
        };

        tx.execute(
            "DELETE FROM workflow_steps WHERE id = ?1",
            params![step_id.to_string()],
        )?;
        tx.execute(
            "UPDATE workflow_steps SET position = position - 1
             WHERE workflow_id = ?1 AND position > ?2",
            params![workflow.to_string(), position],
        )?;
        tx.commit()?;
        Ok(true)
    }
}

fn row_to_workflow(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workflow> {
    Ok(Workflow {
        id: WorkflowId(col_uuid(row, 0)?),
        org_id: OrgId(col_uuid(row, 1)?),
        name: row.get(2)?,
        list_id: ListId(col_uuid(row, 3)?),
        active: row.get(4)?,
        created_at: col_ts(row, 5)?,
        updated_at: col_ts(row, 6)?,
    })
}

fn row_to_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkflowStep> {
    Ok(WorkflowStep {
        id: col_uuid(row, 0)?,
        workflow_id: WorkflowId(col_uuid(row, 1)?),
        position: row.get(2)?,
        channel: col_keyword(row, 3, MessageChannel::parse)?,
        template_id: col_opt_uuid(row, 4)?.map(TemplateId),
        subject: row.get(5)?,
        body: row.get(6)?,
        mappings: col_json(row, 7)?,
        delay_days: row.get(8)?,
        send_time: col_opt_time(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use guichet_shared::models::{ContactList, Organization};

    fn open_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    fn seed_workflow(db: &Database) -> (OrgId, WorkflowId) {
        let org = Organization {
            id: OrgId::new(),
            name: "Acme".to_string(),
            created_at: Utc::now(),
        };
        db.insert_organization(&org).unwrap();

        let list = ContactList {
            id: ListId::new(),
            org_id: org.id,
            name: "VIPs".to_string(),
            filters: Vec::new(),
            included: Vec::new(),
            excluded: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        db.insert_list(&list).unwrap();

        let workflow = Workflow {
            id: WorkflowId::new(),
            org_id: org.id,
            name: "Welcome".to_string(),
            list_id: list.id,
            active: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        db.insert_workflow(&workflow).unwrap();
        (org.id, workflow.id)
    }

    fn step(workflow: WorkflowId, position: u32) -> WorkflowStep {
        WorkflowStep {
            id: Uuid::new_v4(),
            workflow_id: workflow,
            position,
            channel: MessageChannel::Email,
            template_id: None,
            subject: Some(format!("Step {position}")),
            body: Some("Hi {{name}}".to_string()),
            mappings: Vec::new(),
            delay_days: 1,
            send_time: None,
        }
    }

    #[test]
    fn steps_stay_dense_after_delete() {
        let (mut db, _dir) = open_db();
        let (org, workflow) = seed_workflow(&db);

        let steps = vec![step(workflow, 1), step(workflow, 2), step(workflow, 3)];
        let middle = steps[1].id;
        db.replace_steps(org, workflow, &steps).unwrap();

        assert!(db.delete_step(org, workflow, middle).unwrap());

        let remaining = db.list_steps(org, workflow).unwrap();
        let positions: Vec<u32> = remaining.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![1, 2]);
        assert_eq!(remaining[1].subject.as_deref(), Some("Step 3"));
    }

    #[test]
    fn replace_steps_renumbers_densely() {
        let (mut db, _dir) = open_db();
        let (org, workflow) = seed_workflow(&db);

        // Positions in the input are ignored; order decides.
        let steps = vec![step(workflow, 7), step(workflow, 2)];
        db.replace_steps(org, workflow, &steps).unwrap();

        let loaded = db.list_steps(org, workflow).unwrap();
        let positions: Vec<u32> = loaded.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![1, 2]);
    }

    #[test]
    fn foreign_org_cannot_touch_steps() {
        let (mut db, _dir) = open_db();
        let (org, workflow) = seed_workflow(&db);
        db.replace_steps(org, workflow, &[step(workflow, 1)]).unwrap();

        let stranger = OrgId::new();
        assert!(db.replace_steps(stranger, workflow, &[]).is_err());
        assert_eq!(db.list_steps(org, workflow).unwrap().len(), 1);
    }
}
