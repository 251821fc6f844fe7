use serde::{Deserialize, Serialize};

/// System-wide role. Unrecognised values from the backend are kept as `Unknown`
/// rather than failing the whole response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemRole {
    Administrator,
    AppManager,
    #[default]
    User,
    #[serde(other)]
    Unknown,
}

impl SystemRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemRole::Administrator => "administrator",
            SystemRole::AppManager => "app_manager",
            SystemRole::User => "user",
            SystemRole::Unknown => "unknown",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SystemRole::Administrator => {
                "Full system access - can manage all users, applications, and settings"
            }
            SystemRole::AppManager => {
                "Can assign users and manage settings for specific applications"
            }
            SystemRole::User | SystemRole::Unknown => "Can access assigned applications",
        }
    }
}

/// A user's membership in one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserApplication {
    pub application_id: i64,
    pub application_name: Option<String>,
    pub system_role: Option<SystemRole>,
    #[serde(default)]
    pub delegated_permissions: Vec<String>,
}

/// The authenticated principal / an entry in the user list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub email: String,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub system_role: Option<SystemRole>,
    pub status: Option<String>,
    pub is_active: Option<bool>,
    pub hubspot_user_id: Option<String>,
    pub last_login: Option<String>,
    pub created_at: Option<String>,
    #[serde(default)]
    pub user_applications: Vec<UserApplication>,
}

impl User {
    /// Users without an explicit role are plain users.
    pub fn role(&self) -> SystemRole {
        self.system_role.unwrap_or_default()
    }

    pub fn display_label(&self) -> String {
        if let Some(name) = self.display_name.as_ref().or(self.name.as_ref()) {
            return name.clone();
        }
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.email.clone(),
        }
    }

    /// Role held in a specific application, if the user belongs to it.
    pub fn application_role(&self, application_id: i64) -> Option<SystemRole> {
        self.user_applications
            .iter()
            .find(|ua| ua.application_id == application_id)
            .map(|ua| ua.system_role.unwrap_or_default())
    }
}

/// `data` payload of `GET /users`.
#[derive(Debug, Clone, Deserialize)]
pub struct UsersPage {
    #[serde(default)]
    pub users: Vec<User>,
    pub pagination: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub email: String,
    pub hubspot_user_id: Option<String>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_id: Option<String>,
}

/// Partial update; absent fields are left untouched by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hubspot_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}
