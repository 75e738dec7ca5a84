use rusqlite::params;

use guichet_shared::models::PropertyDefinition;
use guichet_shared::types::{OrgId, PropertyId, PropertyKind};

use crate::convert::{col_json, col_keyword, col_ts, col_uuid};
use crate::database::Database;
use crate::error::{conflict, not_found, Result};

impl Database {
    /// Insert a property definition.  Fails with `AlreadyExists` when the
    /// key is already defined for the organization.
    pub fn insert_property(&self, prop: &PropertyDefinition) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO properties (id, org_id, key, label, kind, options, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    prop.id.to_string(),
                    prop.org_id.to_string(),
                    prop.key,
                    prop.label,
                    prop.kind.as_str(),
                    serde_json::to_string(&prop.options)?,
                    prop.created_at.to_rfc3339(),
                ],
            )
            .map_err(conflict)?;
        Ok(())
    }

    pub fn get_property(&self, org: OrgId, id: PropertyId) -> Result<PropertyDefinition> {
        self.conn()
            .query_row(
                "SELECT id, org_id, key, label, kind, options, created_at
                 FROM properties WHERE id = ?1 AND org_id = ?2",
                params![id.to_string(), org.to_string()],
                row_to_property,
            )
            .map_err(not_found)
    }

    pub fn list_properties(&self, org: OrgId) -> Result<Vec<PropertyDefinition>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, org_id, key, label, kind, options, created_at
             FROM properties WHERE org_id = ?1 ORDER BY created_at",
        )?;

        let rows = stmt.query_map(params![org.to_string()], row_to_property)?;

        let mut properties = Vec::new();
        for row in rows {
            properties.push(row?);
        }
        Ok(properties)
    }

    pub fn update_property(&self, prop: &PropertyDefinition) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE properties SET label = ?3, kind = ?4, options = ?5
             WHERE id = ?1 AND org_id = ?2",
            params![
                prop.id.to_string(),
                prop.org_id.to_string(),
                prop.label,
                prop.kind.as_str(),
                serde_json::to_string(&prop.options)?,
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_property(&self, org: OrgId, id: PropertyId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM properties WHERE id = ?1 AND org_id = ?2",
            params![id.to_string(), org.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_property(row: &rusqlite::Row<'_>) -> rusqlite::Result<PropertyDefinition> {
    Ok(PropertyDefinition {
        id: PropertyId(col_uuid(row, 0)?),
        org_id: OrgId(col_uuid(row, 1)?),
        key: row.get(2)?,
        label: row.get(3)?,
        kind: col_keyword(row, 4, PropertyKind::parse)?,
        options: col_json(row, 5)?,
        created_at: col_ts(row, 6)?,
    })
}
