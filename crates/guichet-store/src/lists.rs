use rusqlite::params;

use guichet_shared::models::ContactList;
use guichet_shared::types::{ListId, OrgId};

use crate::convert::{col_json, col_ts, col_uuid};
use crate::database::Database;
use crate::error::{not_found, Result};

const LIST_COLS: &str = "id, org_id, name, filters, included, excluded, created_at, updated_at";

impl Database {
    pub fn insert_list(&self, list: &ContactList) -> Result<()> {
        self.conn().execute(
            &format!("INSERT INTO lists ({LIST_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                list.id.to_string(),
                list.org_id.to_string(),
                list.name,
                serde_json::to_string(&list.filters)?,
                serde_json::to_string(&list.included)?,
                serde_json::to_string(&list.excluded)?,
                list.created_at.to_rfc3339(),
                list.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_list(&self, org: OrgId, id: ListId) -> Result<ContactList> {
        self.conn()
            .query_row(
                &format!("SELECT {LIST_COLS} FROM lists WHERE id = ?1 AND org_id = ?2"),
                params![id.to_string(), org.to_string()],
                row_to_list,
            )
            .map_err(not_found)
    }

    pub fn list_lists(&self, org: OrgId) -> Result<Vec<ContactList>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {LIST_COLS} FROM lists WHERE org_id = ?1 ORDER BY name"
        ))?;

        let rows = stmt.query_map(params![org.to_string()], row_to_list)?;

        let mut lists = Vec::new();
        for row in rows {
            lists.push(row?);
        }
        Ok(lists)
    }

    pub fn update_list(&self, list: &ContactList) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE lists
             SET name = ?3, filters = ?4, included = ?5, excluded = ?6, updated_at = ?7
             WHERE id = ?1 AND org_id = ?2",
            params![
                list.id.to_string(),
                list.org_id.to_string(),
                list.name,
                serde_json::to_string(&list.filters)?,
                serde_json::to_string(&list.included)?,
                serde_json::to_string(&list.excluded)?,
                list.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_list(&self, org: OrgId, id: ListId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM lists WHERE id = ?1 AND org_id = ?2",
            params![id.to_string(), org.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_list(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContactList> {
    Ok(ContactList {
        id: ListId(col_uuid(row, 0)?),
        org_id: OrgId(col_uuid(row, 1)?),
        name: row.get(2)?,
        filters: col_json(row, 3)?,
        included: col_json(row, 4)?,
        excluded: col_json(row, 5)?,
        created_at: col_ts(row, 6)?,
        updated_at: col_ts(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use guichet_shared::models::{Comparison, Organization, SegmentFilter};
    use guichet_shared::types::ContactId;

    fn open_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    fn seed_org(db: &Database) -> OrgId {
        let org = Organization {
            id: OrgId::new(),
            name: "Acme".to_string(),
            created_at: Utc::now(),
        };
        db.insert_organization(&org).unwrap();
        org.id
    }

    #[test]
    fn save_reload_preserves_filters_and_member_sets() {
        let (db, _dir) = open_db();
        let org = seed_org(&db);

        let list = ContactList {
            id: ListId::new(),
            org_id: org,
            name: "VIPs".to_string(),
            filters: vec![
                SegmentFilter {
                    field: "company".to_string(),
                    comparison: Comparison::Contains,
                    value: "acme".to_string(),
                },
                SegmentFilter {
                    field: "seats".to_string(),
                    comparison: Comparison::GreaterThan,
                    value: "5".to_string(),
                },
            ],
            included: vec![ContactId::new(), ContactId::new()],
            excluded: vec![ContactId::new()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        db.insert_list(&list).unwrap();

        let loaded = db.get_list(org, list.id).unwrap();
        // Filter order and both member sets must survive verbatim.
        assert_eq!(loaded.filters, list.filters);
        assert_eq!(loaded.included, list.included);
        assert_eq!(loaded.excluded, list.excluded);
    }
}
