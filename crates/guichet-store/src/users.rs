use rusqlite::params;

use guichet_shared::models::User;
use guichet_shared::types::{OrgId, Role, UserId};

use crate::convert::{col_keyword, col_opt_uuid, col_ts, col_uuid};
use crate::database::Database;
use crate::error::{conflict, not_found, Result};

/// Columns of the `users` table minus the credential, which never leaves
/// the store through a model struct.
const USER_COLS: &str = "id, org_id, email, display_name, role, email_verified, created_at";

impl Database {
    /// Insert a new account.  Fails with `AlreadyExists` when the email is
    /// taken.
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO users (id, org_id, email, display_name, role, email_verified, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user.id.to_string(),
                    user.org_id.map(|o| o.to_string()),
                    user.email,
                    user.display_name,
                    user.role.as_str(),
                    user.email_verified,
                    user.created_at.to_rfc3339(),
                ],
            )
            .map_err(conflict)?;
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLS} FROM users WHERE email = ?1"),
                params![email],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn list_org_members(&self, org: OrgId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLS} FROM users WHERE org_id = ?1 ORDER BY created_at"
        ))?;

        let rows = stmt.query_map(params![org.to_string()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Attach a user to an organization with the given role.  Used at
    /// onboarding (owner becomes admin) and when an invitation is accepted.
    pub fn set_user_org(&self, id: UserId, org: OrgId, role: Role) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET org_id = ?2, role = ?3 WHERE id = ?1",
            params![id.to_string(), org.to_string(), role.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Change a member's role.  Scoped by organization so an admin of one
    /// tenant cannot touch another tenant's members.
    pub fn set_user_role(&self, org: OrgId, id: UserId, role: Role) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET role = ?3 WHERE id = ?1 AND org_id = ?2",
            params![id.to_string(), org.to_string(), role.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn mark_email_verified(&self, id: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET email_verified = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn set_password_hash(&self, id: UserId, hash: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET password_hash = ?2 WHERE id = ?1",
            params![id.to_string(), hash],
        )?;
        Ok(affected > 0)
    }

    /// The stored bcrypt hash, `None` while no password has been set
    /// (invited member who has not finished the link flow).
    pub fn get_password_hash(&self, id: UserId) -> Result<Option<String>> {
        self.conn()
            .query_row(
                "SELECT password_hash FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(not_found)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(col_uuid(row, 0)?),
        org_id: col_opt_uuid(row, 1)?.map(OrgId),
        email: row.get(2)?,
        display_name: row.get(3)?,
        role: col_keyword(row, 4, Role::parse)?,
        email_verified: row.get(5)?,
        created_at: col_ts(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn open_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    fn user(email: &str) -> User {
        User {
            id: UserId::new(),
            org_id: None,
            email: email.to_string(),
            display_name: "Test".to_string(),
            role: Role::Agent,
            email_verified: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_email_is_a_conflict() {
        let (db, _dir) = open_db();
        db.insert_user(&user("ada@example.com")).unwrap();
        let err = db.insert_user(&user("ada@example.com")).unwrap_err();
        assert!(matches!(err, crate::StoreError::AlreadyExists));
    }

    #[test]
    fn org_attach_and_role_change() {
        let (db, _dir) = open_db();
        let u = user("ada@example.com");
        db.insert_user(&u).unwrap();

        let org = guichet_shared::models::Organization {
            id: OrgId::new(),
            name: "Acme".to_string(),
            created_at: Utc::now(),
        };
        db.insert_organization(&org).unwrap();

        assert!(db.set_user_org(u.id, org.id, Role::Admin).unwrap());
        let loaded = db.get_user(u.id).unwrap();
        assert_eq!(loaded.org_id, Some(org.id));
        assert_eq!(loaded.role, Role::Admin);

        // Wrong org id must not touch the row.
        assert!(!db.set_user_role(OrgId::new(), u.id, Role::Agent).unwrap());
    }
}
