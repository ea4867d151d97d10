//! Application profile row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cloud_kitchen_core::{Role, UserId};

/// A user's application profile (`profiles` table).
///
/// `id` always equals the auth user id of the session it was resolved for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Same id as the auth user.
    pub id: UserId,
    /// Contact e-mail copied from the auth user.
    pub email: String,
    /// Display name, if the user provided one.
    #[serde(default)]
    pub full_name: Option<String>,
    /// Contact phone, if the user provided one.
    #[serde(default)]
    pub phone: Option<String>,
    /// Role claim used for back-office access.
    #[serde(default)]
    pub role: Role,
    /// When the profile row was created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Name to greet the user with: full name, else the e-mail local part.
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self.full_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => self.email.split('@').next().unwrap_or(&self.email),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_row() {
        let json = r#"{"id":"00000000-0000-0000-0000-000000000001","email":"a@b.co","role":"restaurant_owner"}"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.role, Role::RestaurantOwner);
        assert!(profile.full_name.is_none());
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let mut profile = Profile {
            id: UserId::random(),
            email: "jane@x.com".to_string(),
            full_name: None,
            phone: None,
            role: Role::Customer,
            created_at: Utc::now(),
        };
        assert_eq!(profile.display_name(), "jane");

        profile.full_name = Some("Jane Doe".to_string());
        assert_eq!(profile.display_name(), "Jane Doe");
    }
}
