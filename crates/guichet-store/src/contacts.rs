use rusqlite::params;

use guichet_shared::models::Contact;
use guichet_shared::types::{ContactId, OrgId};

use crate::convert::{col_json, col_ts, col_uuid};
use crate::database::Database;
use crate::error::{not_found, Result};

const CONTACT_COLS: &str =
    "id, org_id, name, email, phone, company, stage, custom, created_at, updated_at";

impl Database {
    pub fn insert_contact(&self, contact: &Contact) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO contacts ({CONTACT_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                contact.id.to_string(),
                contact.org_id.to_string(),
                contact.name,
                contact.email,
                contact.phone,
                contact.company,
                contact.stage,
                serde_json::to_string(&contact.custom)?,
                contact.created_at.to_rfc3339(),
                contact.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Bulk import.  All or nothing: one bad row rolls the batch back.
    pub fn insert_contacts(&mut self, contacts: &[Contact]) -> Result<usize> {
        let tx = self.conn_mut().transaction()?;
        for contact in contacts {
            tx.execute(
                &format!(
                    "INSERT INTO contacts ({CONTACT_COLS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    contact.id.to_string(),
                    contact.org_id.to_string(),
                    contact.name,
                    contact.email,
                    contact.phone,
                    contact.company,
                    contact.stage,
                    serde_json::to_string(&contact.custom)?,
                    contact.created_at.to_rfc3339(),
                    contact.updated_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(contacts.len())
    }

    pub fn get_contact(&self, org: OrgId, id: ContactId) -> Result<Contact> {
        self.conn()
            .query_row(
                &format!("SELECT {CONTACT_COLS} FROM contacts WHERE id = ?1 AND org_id = ?2"),
                params![id.to_string(), org.to_string()],
                row_to_contact,
            )
            .map_err(not_found)
    }

    pub fn list_contacts(&self, org: OrgId) -> Result<Vec<Contact>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CONTACT_COLS} FROM contacts WHERE org_id = ?1 ORDER BY name"
        ))?;

        let rows = stmt.query_map(params![org.to_string()], row_to_contact)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    pub fn update_contact(&self, contact: &Contact) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE contacts
             SET name = ?3, email = ?4, phone = ?5, company = ?6, stage = ?7,
                 custom = ?8, updated_at = ?9
             WHERE id = ?1 AND org_id = ?2",
            params![
                contact.id.to_string(),
                contact.org_id.to_string(),
                contact.name,
                contact.email,
                contact.phone,
                contact.company,
                contact.stage,
                serde_json::to_string(&contact.custom)?,
                contact.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_contact(&self, org: OrgId, id: ContactId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM contacts WHERE id = ?1 AND org_id = ?2",
            params![id.to_string(), org.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: ContactId(col_uuid(row, 0)?),
        org_id: OrgId(col_uuid(row, 1)?),
        name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        company: row.get(5)?,
        stage: row.get(6)?,
        custom: col_json(row, 7)?,
        created_at: col_ts(row, 8)?,
        updated_at: col_ts(row, 9)?,
    })
}
