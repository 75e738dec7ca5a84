//! Role-based permission checks.
//!
//! This table is the only authorization source in the system; handlers call
//! [`require`] after authenticating and nothing else gates an operation.

use guichet_shared::types::Role;

use crate::error::ServerError;

/// Everything a role can be allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Rename the organization, manage members and integrations.
    ManageOrg,
    /// Create, update and delete custom property definitions.  Deleting a
    /// definition drops the value from every contact, so this stays with
    /// admins.
    ManageProperties,
    /// Day-to-day work: contacts, lists, conversations, templates,
    /// campaigns, workflows and tasks.
    Operate,
}

impl Permission {
    pub fn granted_to(self, role: Role) -> bool {
        match role {
            Role::Admin => true,
            Role::Agent => matches!(self, Permission::Operate),
        }
    }
}

pub fn require(role: Role, permission: Permission) -> Result<(), ServerError> {
    if permission.granted_to(role) {
        Ok(())
    } else {
        Err(ServerError::Forbidden(format!(
            "Role {} may not perform this operation",
            role.as_str()
        )))
    }
}
