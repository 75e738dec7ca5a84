use chrono::{DateTime, Utc};
use rusqlite::params;

use guichet_shared::models::{Campaign, CampaignStats};
use guichet_shared::types::{
    CampaignId, CampaignStatus, ContactId, MessageChannel, MessageStatus, OrgId, TemplateId,
};

use crate::convert::{col_json, col_keyword, col_opt_ts, col_opt_uuid, col_ts, col_uuid};
use crate::database::Database;
use crate::error::{not_found, Result};

const CAMPAIGN_COLS: &str = "id, org_id, name, channel, recipient_ids, template_id, subject, \
                             body, mappings, scheduled_at, status, stat_sent, stat_delivered, \
                             stat_read, stat_failed, created_at, updated_at";

impl Database {
    pub fn insert_campaign(&self, campaign: &Campaign) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO campaigns ({CAMPAIGN_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            params![
                campaign.id.to_string(),
                campaign.org_id.to_string(),
                campaign.name,
                campaign.channel.as_str(),
                serde_json::to_string(&campaign.recipient_ids)?,
                campaign.template_id.map(|t| t.to_string()),
                campaign.subject,
                campaign.body,
                serde_json::to_string(&campaign.mappings)?,
                campaign.scheduled_at.map(|t| t.to_rfc3339()),
                campaign.status.as_str(),
                campaign.stats.sent,
                campaign.stats.delivered,
                campaign.stats.read,
                campaign.stats.failed,
                campaign.created_at.to_rfc3339(),
                campaign.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_campaign(&self, org: OrgId, id: CampaignId) -> Result<Campaign> {
        self.conn()
            .query_row(
                &format!("SELECT {CAMPAIGN_COLS} FROM campaigns WHERE id = ?1 AND org_id = ?2"),
                params![id.to_string(), org.to_string()],
                row_to_campaign,
            )
            .map_err(not_found)
    }

    pub fn list_campaigns(&self, org: OrgId) -> Result<Vec<Campaign>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CAMPAIGN_COLS} FROM campaigns WHERE org_id = ?1 ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map(params![org.to_string()], row_to_campaign)?;

        let mut campaigns = Vec::new();
        for row in rows {
            campaigns.push(row?);
        }
        Ok(campaigns)
    }

    /// Edit a draft's content.  Stats and status move through the
    /// dedicated helpers, never through this.
    pub fn update_campaign(&self, campaign: &Campaign) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE campaigns
             SET name = ?3, channel = ?4, recipient_ids = ?5, template_id = ?6,
                 subject = ?7, body = ?8, mappings = ?9, scheduled_at = ?10, updated_at = ?11
             WHERE id = ?1 AND org_id = ?2",
            params![
                campaign.id.to_string(),
                campaign.org_id.to_string(),
                campaign.name,
                campaign.channel.as_str(),
                serde_json::to_string(&campaign.recipient_ids)?,
                campaign.template_id.map(|t| t.to_string()),
                campaign.subject,
                campaign.body,
                serde_json::to_string(&campaign.mappings)?,
                campaign.scheduled_at.map(|t| t.to_rfc3339()),
                campaign.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_campaign(&self, org: OrgId, id: CampaignId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM campaigns WHERE id = ?1 AND org_id = ?2",
            params![id.to_string(), org.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Move the lifecycle forward.  Terminal rows (sent, failed) are
    /// immutable; a late transition attempt is a silent no-op.
    pub fn set_campaign_status(
        &self,
        org: OrgId,
        id: CampaignId,
        status: CampaignStatus,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE campaigns SET status = ?3, updated_at = ?4
             WHERE id = ?1 AND org_id = ?2 AND status NOT IN ('sent', 'failed')",
            params![
                id.to_string(),
                org.to_string(),
                status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Count one delivery receipt.  Counters only ever grow; receipts for
    /// pending messages count nothing.
    pub fn bump_campaign_stat(
        &self,
        org: OrgId,
        id: CampaignId,
        status: MessageStatus,
    ) -> Result<bool> {
        let column = match status {
            MessageStatus::Sent => "stat_sent",
            MessageStatus::Delivered => "stat_delivered",
            MessageStatus::Read => "stat_read",
            MessageStatus::Failed => "stat_failed",
            MessageStatus::Pending => return Ok(false),
        };
        let affected = self.conn().execute(
            &format!(
                "UPDATE campaigns SET {column} = {column} + 1 WHERE id = ?1 AND org_id = ?2"
            ),
            params![id.to_string(), org.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Scheduled campaigns whose launch time has passed, across all
    /// tenants.  The dispatcher calls this every tick.
    pub fn list_due_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CAMPAIGN_COLS} FROM campaigns
             WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ?1
             ORDER BY scheduled_at"
        ))?;

        let rows = stmt.query_map(params![now.to_rfc3339()], row_to_campaign)?;

        let mut campaigns = Vec::new();
        for row in rows {
            campaigns.push(row?);
        }
        Ok(campaigns)
    }
}

fn row_to_campaign(row: &rusqlite::Row<'_>) -> rusqlite::Result<Campaign> {
    let recipient_ids: Vec<ContactId> = col_json(row, 4)?;
    Ok(Campaign {
        id: CampaignId(col_uuid(row, 0)?),
        org_id: OrgId(col_uuid(row, 1)?),
        name: row.get(2)?,
        channel: col_keyword(row, 3, MessageChannel::parse)?,
        recipient_ids,
        template_id: col_opt_uuid(row, 5)?.map(TemplateId),
        subject: row.get(6)?,
        body: row.get(7)?,
        mappings: col_json(row, 8)?,
        scheduled_at: col_opt_ts(row, 9)?,
        status: col_keyword(row, 10, CampaignStatus::parse)?,
        stats: CampaignStats {
            sent: row.get(11)?,
            delivered: row.get(12)?,
            read: row.get(13)?,
            failed: row.get(14)?,
        },
        created_at: col_ts(row, 15)?,
        updated_at: col_ts(row, 16)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use guichet_shared::models::Organization;

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

    fn campaign(org: OrgId) -> Campaign {
        Campaign {
            id: CampaignId::new(),
            org_id: org,
            name: "Launch".to_string(),
            channel: MessageChannel::Email,
            recipient_ids: vec![ContactId::new()],
            template_id: None,
            subject: Some("Hi".to_string()),
            body: Some("Hello {{name}}".to_string()),
            mappings: Vec::new(),
            scheduled_at: None,
            status: CampaignStatus::Draft,
            stats: CampaignStats::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn stats_only_grow() {
        let (db, _dir) = open_db();
        let org = seed_org(&db);
        let c = campaign(org);
        db.insert_campaign(&c).unwrap();

        db.bump_campaign_stat(org, c.id, MessageStatus::Sent).unwrap();
        db.bump_campaign_stat(org, c.id, MessageStatus::Sent).unwrap();
        db.bump_campaign_stat(org, c.id, MessageStatus::Delivered).unwrap();
        // Pending receipts count nothing.
        assert!(!db.bump_campaign_stat(org, c.id, MessageStatus::Pending).unwrap());

        let stats = db.get_campaign(org, c.id).unwrap().stats;
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.read, 0);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn terminal_status_is_immutable() {
        let (db, _dir) = open_db();
        let org = seed_org(&db);
        let c = campaign(org);
        db.insert_campaign(&c).unwrap();

        assert!(db.set_campaign_status(org, c.id, CampaignStatus::Sending).unwrap());
        assert!(db.set_campaign_status(org, c.id, CampaignStatus::Sent).unwrap());
        // Once sent, nothing moves it back.
        assert!(!db.set_campaign_status(org, c.id, CampaignStatus::Draft).unwrap());
        assert_eq!(
            db.get_campaign(org, c.id).unwrap().status,
            CampaignStatus::Sent
        );
    }

    #[test]
    fn due_scan_sees_only_ripe_scheduled_rows() {
        let (db, _dir) = open_db();
        let org = seed_org(&db);

        let now = Utc::now();
        let mut ripe = campaign(org);
        ripe.scheduled_at = Some(now - chrono::Duration::minutes(1));
        ripe.status = CampaignStatus::Scheduled;
        db.insert_campaign(&ripe).unwrap();

        let mut future = campaign(org);
        future.scheduled_at = Some(now + chrono::Duration::hours(1));
        future.status = CampaignStatus::Scheduled;
        db.insert_campaign(&future).unwrap();

        let due = db.list_due_campaigns(now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, ripe.id);
    }
}
