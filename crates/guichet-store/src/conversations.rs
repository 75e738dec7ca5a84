use chrono::{DateTime, Utc};
use rusqlite::params;

use guichet_shared::models::Conversation;
use guichet_shared::types::{ContactId, ConversationId, OrgId};

use crate::convert::{col_opt_ts, col_ts, col_uuid};
use crate::database::Database;
use crate::error::{not_found, Result};

const CONVERSATION_COLS: &str =
    "id, org_id, contact_id, last_message_at, unread_count, created_at";

impl Database {
    /// Fetch the contact's thread, creating it on first touch.  Returns the
    /// conversation and whether it was just created (callers broadcast a
    /// conversation_new event in that case).
    pub fn get_or_create_conversation(
        &self,
        org: OrgId,
        contact: ContactId,
    ) -> Result<(Conversation, bool)> {
        let existing = self.conn().query_row(
            &format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE org_id = ?1 AND contact_id = ?2"),
            params![org.to_string(), contact.to_string()],
            row_to_conversation,
        );
        match existing {
            Ok(conversation) => Ok((conversation, false)),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                let conversation = Conversation {
                    id: ConversationId::new(),
                    org_id: org,
                    contact_id: contact,
                    last_message_at: None,
                    unread_count: 0,
                    created_at: Utc::now(),
                };
                self.conn().execute(
                    &format!(
                        "INSERT INTO conversations ({CONVERSATION_COLS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                    ),
                    params![
                        conversation.id.to_string(),
                        conversation.org_id.to_string(),
                        conversation.contact_id.to_string(),
                        Option::<String>::None,
                        conversation.unread_count,
                        conversation.created_at.to_rfc3339(),
                    ],
                )?;
                Ok((conversation, true))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_conversation(&self, org: OrgId, id: ConversationId) -> Result<Conversation> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {CONVERSATION_COLS} FROM conversations WHERE id = ?1 AND org_id = ?2"
                ),
                params![id.to_string(), org.to_string()],
                row_to_conversation,
            )
            .map_err(not_found)
    }

    /// Inbox ordering: most recent activity first, never-touched threads last.
    pub fn list_conversations(&self, org: OrgId) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CONVERSATION_COLS} FROM conversations
             WHERE org_id = ?1
             ORDER BY last_message_at IS NULL, last_message_at DESC"
        ))?;

        let rows = stmt.query_map(params![org.to_string()], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    /// Record activity on a thread: bump the activity timestamp and, for
    /// inbound messages, the unread counter.
    pub fn touch_conversation(
        &self,
        org: OrgId,
        id: ConversationId,
        at: DateTime<Utc>,
        inbound: bool,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE conversations
             SET last_message_at = ?3,
                 unread_count = unread_count + ?4
             WHERE id = ?1 AND org_id = ?2
               AND (last_message_at IS NULL OR last_message_at <= ?3)",
            params![
                id.to_string(),
                org.to_string(),
                at.to_rfc3339(),
                if inbound { 1 } else { 0 },
            ],
        )?;
        if affected == 0 && inbound {
            // Out-of-order delivery: the timestamp stays, the unread count
            // still has to move.
            let affected = self.conn().execute(
                "UPDATE conversations SET unread_count = unread_count + 1
                 WHERE id = ?1 AND org_id = ?2",
                params![id.to_string(), org.to_string()],
            )?;
            return Ok(affected > 0);
        }
        Ok(affected > 0)
    }

    pub fn mark_conversation_read(&self, org: OrgId, id: ConversationId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE conversations SET unread_count = 0 WHERE id = ?1 AND org_id = ?2",
            params![id.to_string(), org.to_string()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: ConversationId(col_uuid(row, 0)?),
        org_id: OrgId(col_uuid(row, 1)?),
        contact_id: ContactId(col_uuid(row, 2)?),
        last_message_at: col_opt_ts(row, 3)?,
        unread_count: row.get(4)?,
        created_at: col_ts(row, 5)?,
    })
}
