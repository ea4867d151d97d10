//! Auth API payload types shared by the real client and test doubles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cloud_kitchen_core::UserId;

use crate::session::Session;

/// Free-form metadata stored on the auth user at sign-up.
///
/// Only the keys the storefront reads are modeled; anything else the service
/// returns is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// Set by some OAuth providers instead of `full_name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Requested role, a hint only; the profile row is authoritative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl UserMetadata {
    /// The best available display name.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        [self.full_name.as_deref(), self.name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|name| !name.is_empty())
    }
}

/// The auth service's user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

/// Outcome of a sign-up request.
#[derive(Debug, Clone)]
pub enum SignUpResponse {
    /// The account was confirmed immediately and is signed in.
    Session(Session),
    /// A confirmation e-mail was sent; no session yet.
    ConfirmationRequired(AuthUser),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_prefers_full_name() {
        let metadata = UserMetadata {
            full_name: Some("Jane Doe".to_string()),
            name: Some("jd".to_string()),
            ..UserMetadata::default()
        };
        assert_eq!(metadata.display_name(), Some("Jane Doe"));

        let metadata = UserMetadata {
            full_name: Some("  ".to_string()),
            ..UserMetadata::default()
        };
        assert_eq!(metadata.display_name(), None);
    }

    #[test]
    fn test_auth_user_tolerates_sparse_payload() {
        let json = r#"{"id":"00000000-0000-0000-0000-000000000001","aud":"authenticated"}"#;
        let user: AuthUser = serde_json::from_str(json).unwrap();
        assert!(user.email.is_none());
        assert_eq!(user.user_metadata, UserMetadata::default());
    }
}
