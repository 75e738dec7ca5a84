use rusqlite::params;

use guichet_shared::models::MessageTemplate;
use guichet_shared::types::{MessageChannel, OrgId, TemplateId};

use crate::convert::{col_json, col_keyword, col_ts, col_uuid};
use crate::database::Database;
use crate::error::{not_found, Result};

const TEMPLATE_COLS: &str =
    "id, org_id, name, channel, language, body, variables, remote_id, created_at, updated_at";

impl Database {
    pub fn insert_template(&self, template: &MessageTemplate) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO templates ({TEMPLATE_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                template.id.to_string(),
                template.org_id.to_string(),
                template.name,
                template.channel.as_str(),
                template.language,
                template.body,
                serde_json::to_string(&template.variables)?,
                template.remote_id,
                template.created_at.to_rfc3339(),
                template.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_template(&self, org: OrgId, id: TemplateId) -> Result<MessageTemplate> {
        self.conn()
            .query_row(
                &format!("SELECT {TEMPLATE_COLS} FROM templates WHERE id = ?1 AND org_id = ?2"),
                params![id.to_string(), org.to_string()],
                row_to_template,
            )
            .map_err(not_found)
    }

    pub fn list_templates(&self, org: OrgId) -> Result<Vec<MessageTemplate>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {TEMPLATE_COLS} FROM templates WHERE org_id = ?1 ORDER BY name"
        ))?;

        let rows = stmt.query_map(params![org.to_string()], row_to_template)?;

        let mut templates = Vec::new();
        for row in rows {
            templates.push(row?);
        }
        Ok(templates)
    }

    pub fn update_template(&self, template: &MessageTemplate) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE templates
             SET name = ?3, channel = ?4, language = ?5, body = ?6, variables = ?7,
                 remote_id = ?8, updated_at = ?9
             WHERE id = ?1 AND org_id = ?2",
            params![
                template.id.to_string(),
                template.org_id.to_string(),
                template.name,
                template.channel.as_str(),
                template.language,
                template.body,
                serde_json::to_string(&template.variables)?,
                template.remote_id,
                template.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_template(&self, org: OrgId, id: TemplateId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM templates WHERE id = ?1 AND org_id = ?2",
            params![id.to_string(), org.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Template sync: match on the provider's id and update in place, or
    /// insert a fresh row.  Returns the stored template's id.
    pub fn upsert_synced_template(&self, template: &MessageTemplate) -> Result<TemplateId> {
        let remote_id = match &template.remote_id {
            Some(remote_id) => remote_id,
            None => {
                self.insert_template(template)?;
                return Ok(template.id);
            }
        };

        let existing: Option<String> = self
            .conn()
            .query_row(
                "SELECT id FROM templates WHERE org_id = ?1 AND remote_id = ?2",
                params![template.org_id.to_string(), remote_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match existing {
            Some(id) => {
                let id = TemplateId(uuid::Uuid::parse_str(&id)?);
                let mut updated = template.clone();
                updated.id = id;
                self.update_template(&updated)?;
                Ok(id)
            }
            None => {
                self.insert_template(template)?;
                Ok(template.id)
            }
        }
    }
}

fn row_to_template(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageTemplate> {
    Ok(MessageTemplate {
        id: TemplateId(col_uuid(row, 0)?),
        org_id: OrgId(col_uuid(row, 1)?),
        name: row.get(2)?,
        channel: col_keyword(row, 3, MessageChannel::parse)?,
        language: row.get(4)?,
        body: row.get(5)?,
        variables: col_json(row, 6)?,
        remote_id: row.get(7)?,
        created_at: col_ts(row, 8)?,
        updated_at: col_ts(row, 9)?,
    })
}
