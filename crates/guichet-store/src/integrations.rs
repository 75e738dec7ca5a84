use rusqlite::params;

use guichet_shared::models::Integration;
use guichet_shared::types::OrgId;

use crate::convert::{col_opt_ts, col_uuid};
use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Record a provider's connection state, creating or replacing the row.
    pub fn upsert_integration(&self, integration: &Integration) -> Result<()> {
        self.conn().execute(
            "INSERT INTO integrations (org_id, provider, configured, connected_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (org_id, provider) DO UPDATE
             SET configured = excluded.configured, connected_at = excluded.connected_at",
            params![
                integration.org_id.to_string(),
                integration.provider,
                integration.configured,
                integration.connected_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Whether `provider` is configured for `org`.  A missing row reads as
    /// not configured, so dispatch checks need no special casing.
    pub fn integration_configured(&self, org: OrgId, provider: &str) -> Result<bool> {
        match self.conn().query_row(
            "SELECT configured FROM integrations WHERE org_id = ?1 AND provider = ?2",
            params![org.to_string(), provider],
            |row| row.get::<_, bool>(0),
        ) {
            Ok(configured) => Ok(configured),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_integrations(&self, org: OrgId) -> Result<Vec<Integration>> {
        let mut stmt = self.conn().prepare(
            "SELECT org_id, provider, configured, connected_at
             FROM integrations WHERE org_id = ?1 ORDER BY provider",
        )?;

        let rows = stmt.query_map(params![org.to_string()], row_to_integration)?;

        let mut integrations = Vec::new();
        for row in rows {
            integrations.push(row?);
        }
        Ok(integrations)
    }
}

fn row_to_integration(row: &rusqlite::Row<'_>) -> rusqlite::Result<Integration> {
    Ok(Integration {
        org_id: OrgId(col_uuid(row, 0)?),
        provider: row.get(1)?,
        configured: row.get(2)?,
        connected_at: col_opt_ts(row, 3)?,
    })
}
