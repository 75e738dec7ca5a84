use rusqlite::params;

use guichet_shared::models::Message;
use guichet_shared::types::{
    CampaignId, ContactId, ConversationId, Direction, EnrollmentId, MessageId, MessageStatus,
    OrgId, UserId,
};

use crate::convert::{col_keyword, col_opt_uuid, col_ts, col_uuid};
use crate::database::Database;
use crate::error::{not_found, Result};

const MESSAGE_COLS: &str = "id, org_id, conversation_id, direction, body, status, timestamp, \
                            author_id, campaign_id, enrollment_id, error, created_at";

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO messages ({MESSAGE_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                message.id.to_string(),
                message.org_id.to_string(),
                message.conversation_id.to_string(),
                message.direction.as_str(),
                message.body,
                message.status.as_str(),
                message.timestamp.to_rfc3339(),
                message.author_id.map(|u| u.to_string()),
                message.campaign_id.map(|c| c.to_string()),
                message.enrollment_id.map(|e| e.to_string()),
                message.error,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, org: OrgId, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1 AND org_id = ?2"),
                params![id.to_string(), org.to_string()],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// Newest first; the client reverses for display.
    pub fn list_messages(
        &self,
        org: OrgId,
        conversation: ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages
             WHERE org_id = ?1 AND conversation_id = ?2
             ORDER BY timestamp DESC
             LIMIT ?3 OFFSET ?4"
        ))?;

        let rows = stmt.query_map(
            params![org.to_string(), conversation.to_string(), limit, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Apply a delivery receipt.  Receipts can arrive out of order; the
    /// status only ever moves forward, so a late `delivered` after `read`
    /// is a no-op.  Returns the updated message when something changed.
    pub fn advance_message_status(
        &self,
        org: OrgId,
        id: MessageId,
        status: MessageStatus,
        error: Option<&str>,
    ) -> Result<Option<Message>> {
        let current = self.get_message(org, id)?;
        if status.rank() <= current.status.rank() {
            return Ok(None);
        }
        self.conn().execute(
            "UPDATE messages SET status = ?3, error = ?4 WHERE id = ?1 AND org_id = ?2",
            params![id.to_string(), org.to_string(), status.as_str(), error],
        )?;
        let mut updated = current;
        updated.status = status;
        updated.error = error.map(str::to_string);
        Ok(Some(updated))
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: MessageId(col_uuid(row, 0)?),
        org_id: OrgId(col_uuid(row, 1)?),
        conversation_id: ConversationId(col_uuid(row, 2)?),
        direction: col_keyword(row, 3, Direction::parse)?,
        body: row.get(4)?,
        status: col_keyword(row, 5, MessageStatus::parse)?,
        timestamp: col_ts(row, 6)?,
        author_id: col_opt_uuid(row, 7)?.map(UserId),
        campaign_id: col_opt_uuid(row, 8)?.map(CampaignId),
        enrollment_id: col_opt_uuid(row, 9)?.map(EnrollmentId),
        error: row.get(10)?,
        created_at: col_ts(row, 11)?,
    })
}
