use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Owner,
    Admin,
    Staff,
    Client,
    // Roles added by a newer server are readable, just never matched.
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    Invited,
    Active,
    Disabled,
    #[serde(other)]
    Unknown,
}

/// A row of users.json. Only the fields the issuer reads are modeled,
/// the registration flow owns the rest.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub agency_id: String,
    pub role: UserRole,
    pub status: UserStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

impl User {
    pub fn is_pending_owner(&self) -> bool {
        self.role == UserRole::Owner && self.status == UserStatus::Invited
    }

    /// "owner@agency.com (Agency Owner)", degrading to whatever is known.
    pub fn display(&self) -> String {
        match (&self.email, &self.name) {
            (Some(email), Some(name)) => format!("{} ({})", email, name),
            (Some(email), None) => email.clone(),
            (None, Some(name)) => format!("{} ({})", self.id, name),
            (None, None) => self.id.clone(),
        }
    }
}

/// A row of invite-tokens.json.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InviteToken {
    pub id: String,
    pub agency_id: String,
    pub user_id: String,
    // Hex SHA-256 of the secret. The secret itself is never stored.
    pub token_hash: String,
    pub expires_at: i64,
    #[serde(default)]
    pub used_at: Option<i64>,
    pub created_at: i64,

    // The server may write fields we don't know about; keep them on rewrite.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InviteToken {
    pub fn is_unused(&self) -> bool {
        self.used_at.is_none()
    }

    /// Unused and strictly not yet expired.
    pub fn is_active(&self, now_ms: i64) -> bool {
        self.is_unused() && self.expires_at > now_ms
    }

    pub fn mark_used(&mut self, now_ms: i64) {
        self.used_at = Some(now_ms);
    }
}
