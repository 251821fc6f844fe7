use serde::{Deserialize, Serialize};

use super::{SystemRole, User};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub application_id: Option<i64>,
    pub application_name: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub user_count: u64,
    pub created_at: Option<String>,
}

impl Role {
    pub fn can_read(&self) -> bool {
        self.permissions.iter().any(|p| p == "read")
    }

    pub fn can_write(&self) -> bool {
        self.permissions.iter().any(|p| p == "write")
    }

    pub fn can_manage(&self) -> bool {
        self.permissions.iter().any(|p| p.contains("manage"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewRole {
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoleUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
}

/// Where a system role assignment applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleScope {
    Global,
    Application(i64),
}

impl User {
    /// Whether this user may assign system roles in `scope`.
    ///
    /// Only administrators touch global roles. App managers may change roles
    /// inside applications they manage themselves.
    pub fn can_change_role(&self, scope: RoleScope) -> bool {
        match (self.role(), scope) {
            (SystemRole::Administrator, _) => true,
            (_, RoleScope::Global) => false,
            (SystemRole::AppManager, RoleScope::Application(app_id)) => {
                self.application_role(app_id) == Some(SystemRole::AppManager)
            }
            _ => false,
        }
    }
}
