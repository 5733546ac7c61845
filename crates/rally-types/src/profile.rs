//! User profile records and the backend's result envelope.

use serde::{Deserialize, Serialize};

/// Profile of a registered platform user, as returned by the main backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Backend-assigned numeric id.
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// ISO country code chosen at signup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Role names granted by moderators ("admin", "moderator", ...).
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub banned: bool,
    /// Creation time (Unix nanos).
    #[serde(default)]
    pub created_at: u64,
}

impl UserProfile {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: String::new(),
            avatar: None,
            country: None,
            roles: Vec::new(),
            banned: false,
            created_at: 0,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

/// Backend result envelope: `{"ok": value}` or `{"err": "message"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcResult<T> {
    Ok(T),
    Err(String),
}

impl<T> RpcResult<T> {
    pub fn into_result(self) -> Result<T, String> {
        match self {
            RpcResult::Ok(v) => Ok(v),
            RpcResult::Err(e) => Err(e),
        }
    }
}
