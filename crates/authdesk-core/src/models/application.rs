use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A downstream business application registered with the auth service.
/// The backend uses snake_case for application fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub callback_urls: Vec<String>,
    pub settings: Option<Value>,
    pub auto_assign_rules: Option<Value>,
}

impl Application {
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Settings arrive either as an object or as a JSON-encoded string.
    pub fn settings(&self) -> Option<Value> {
        match self.settings.as_ref()? {
            Value::String(raw) => serde_json::from_str(raw).ok(),
            Value::Null => None,
            other => Some(other.clone()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewApplication {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub allowed_origins: Vec<String>,
    pub callback_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplicationUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_assign_rules: Option<Value>,
}
