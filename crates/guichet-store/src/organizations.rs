use rusqlite::params;

use guichet_shared::models::Organization;
use guichet_shared::types::OrgId;

use crate::convert::{col_ts, col_uuid};
use crate::database::Database;
use crate::error::{not_found, Result};

impl Database {
    pub fn insert_organization(&self, org: &Organization) -> Result<()> {
        self.conn().execute(
            "INSERT INTO organizations (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![
                org.id.to_string(),
                org.name,
                org.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_organization(&self, id: OrgId) -> Result<Organization> {
        self.conn()
            .query_row(
                "SELECT id, name, created_at FROM organizations WHERE id = ?1",
                params![id.to_string()],
                row_to_organization,
            )
            .map_err(not_found)
    }

    pub fn update_organization_name(&self, id: OrgId, name: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE organizations SET name = ?2 WHERE id = ?1",
            params![id.to_string(), name],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_organization(row: &rusqlite::Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: OrgId(col_uuid(row, 0)?),
        name: row.get(1)?,
        created_at: col_ts(row, 2)?,
    })
}
