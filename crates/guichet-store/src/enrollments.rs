use chrono::{DateTime, Utc};
use rusqlite::params;

use guichet_shared::models::Enrollment;
use guichet_shared::types::{ContactId, EnrollmentId, EnrollmentStatus, OrgId, WorkflowId};

use crate::convert::{col_keyword, col_opt_ts, col_ts, col_uuid};
use crate::database::Database;
use crate::error::{conflict, not_found, Result};

const ENROLLMENT_COLS: &str = "id, org_id, workflow_id, contact_id, status, current_step, \
                               next_send_at, retry_count, last_error, created_at, updated_at";

impl Database {
    /// Enroll a contact.  A second active enrollment for the same
    /// (workflow, contact) pair fails with `AlreadyExists`; completed or
    /// failed runs do not block re-enrollment.
    pub fn insert_enrollment(&self, enrollment: &Enrollment) -> Result<()> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO enrollments ({ENROLLMENT_COLS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    enrollment.id.to_string(),
                    enrollment.org_id.to_string(),
                    enrollment.workflow_id.to_string(),
                    enrollment.contact_id.to_string(),
                    enrollment.status.as_str(),
                    enrollment.current_step,
                    enrollment.next_send_at.map(|t| t.to_rfc3339()),
                    enrollment.retry_count,
                    enrollment.last_error,
                    enrollment.created_at.to_rfc3339(),
                    enrollment.updated_at.to_rfc3339(),
                ],
            )
            .map_err(conflict)?;
        Ok(())
    }

    pub fn get_enrollment(&self, org: OrgId, id: EnrollmentId) -> Result<Enrollment> {
        self.conn()
            .query_row(
                &format!("SELECT {ENROLLMENT_COLS} FROM enrollments WHERE id = ?1 AND org_id = ?2"),
                params![id.to_string(), org.to_string()],
                row_to_enrollment,
            )
            .map_err(not_found)
    }

    pub fn list_enrollments(&self, org: OrgId, workflow: WorkflowId) -> Result<Vec<Enrollment>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ENROLLMENT_COLS} FROM enrollments
             WHERE org_id = ?1 AND workflow_id = ?2
             ORDER BY created_at"
        ))?;

        let rows = stmt.query_map(
            params![org.to_string(), workflow.to_string()],
            row_to_enrollment,
        )?;

        let mut enrollments = Vec::new();
        for row in rows {
            enrollments.push(row?);
        }
        Ok(enrollments)
    }

    /// The live run for this contact, if any.
    pub fn active_enrollment_for(
        &self,
        org: OrgId,
        workflow: WorkflowId,
        contact: ContactId,
    ) -> Result<Option<Enrollment>> {
        let result = self.conn().query_row(
            &format!(
                "SELECT {ENROLLMENT_COLS} FROM enrollments
                 WHERE org_id = ?1 AND workflow_id = ?2 AND contact_id = ?3
                   AND status = 'active'"
            ),
            params![org.to_string(), workflow.to_string(), contact.to_string()],
            row_to_enrollment,
        );
        match result {
            Ok(enrollment) => Ok(Some(enrollment)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Active enrollments whose next send is due, across all tenants.
    /// The dispatcher calls this every tick.
    pub fn list_due_enrollments(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Enrollment>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ENROLLMENT_COLS} FROM enrollments
             WHERE status = 'active' AND next_send_at IS NOT NULL AND next_send_at <= ?1
             ORDER BY next_send_at
             LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![now.to_rfc3339(), limit], row_to_enrollment)?;

        let mut enrollments = Vec::new();
        for row in rows {
            enrollments.push(row?);
        }
        Ok(enrollments)
    }

    /// Persist dispatcher progress: step advance, retry bump, pause or a
    /// terminal state.  The whole progress slice is written as one unit.
    pub fn update_enrollment(&self, enrollment: &Enrollment) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE enrollments
             SET status = ?3, current_step = ?4, next_send_at = ?5, retry_count = ?6,
                 last_error = ?7, updated_at = ?8
             WHERE id = ?1 AND org_id = ?2",
            params![
                enrollment.id.to_string(),
                enrollment.org_id.to_string(),
                enrollment.status.as_str(),
                enrollment.current_step,
                enrollment.next_send_at.map(|t| t.to_rfc3339()),
                enrollment.retry_count,
                enrollment.last_error,
                enrollment.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_enrollment(&self, org: OrgId, id: EnrollmentId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM enrollments WHERE id = ?1 AND org_id = ?2",
            params![id.to_string(), org.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_enrollment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Enrollment> {
    Ok(Enrollment {
        id: EnrollmentId(col_uuid(row, 0)?),
        org_id: OrgId(col_uuid(row, 1)?),
        workflow_id: WorkflowId(col_uuid(row, 2)?),
        contact_id: ContactId(col_uuid(row, 3)?),
        status: col_keyword(row, 4, EnrollmentStatus::parse)?,
        current_step: row.get(5)?,
        next_send_at: col_opt_ts(row, 6)?,
        retry_count: row.get(7)?,
        last_error: row.get(8)?,
        created_at: col_ts(row, 9)?,
        updated_at: col_ts(row, 10)?,
    })
}
