//! Guest mode details and their persistence.
//!
//! A guest is someone ordering without an account. Their contact details are
//! validated on entry and kept in local storage under
//! [`GUEST_PROFILE_KEY`](crate::storage::GUEST_PROFILE_KEY) so guest mode
//! survives a restart.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use cloud_kitchen_core::{Email, EmailError, Phone, PhoneError};

use crate::storage::{self, GUEST_PROFILE_KEY, LocalStore, StorageError};
use crate::validation::{self, ValidationError};

/// Errors that can occur validating guest details.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuestInfoError {
    #[error(transparent)]
    FullName(#[from] ValidationError),

    #[error(transparent)]
    Phone(#[from] PhoneError),

    #[error(transparent)]
    Email(#[from] EmailError),
}

/// Validated guest contact details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuestInfo {
    full_name: String,
    phone: Phone,
    email: Email,
}

/// Unvalidated shape read back from storage.
#[derive(Deserialize)]
struct StoredGuest {
    full_name: String,
    phone: String,
    email: String,
}

impl GuestInfo {
    /// Validate raw form input.
    ///
    /// # Errors
    ///
    /// Returns the first field that fails: full name, then phone, then e-mail.
    pub fn new(full_name: &str, phone: &str, email: &str) -> Result<Self, GuestInfoError> {
        Ok(Self {
            full_name: validation::full_name(full_name)?,
            phone: Phone::parse(phone)?,
            email: Email::parse(email)?,
        })
    }

    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    #[must_use]
    pub const fn phone(&self) -> &Phone {
        &self.phone
    }

    #[must_use]
    pub const fn email(&self) -> &Email {
        &self.email
    }
}

/// Load the persisted guest, if any.
///
/// An entry that no longer parses or validates is removed and treated as
/// absent.
pub async fn load(store: &dyn LocalStore) -> Option<GuestInfo> {
    let stored = match storage::get_json::<StoredGuest>(store, GUEST_PROFILE_KEY).await {
        Ok(stored) => stored?,
        Err(e) => {
            warn!(error = %e, "Discarding unreadable guest profile");
            storage::remove_logged(store, GUEST_PROFILE_KEY).await;
            return None;
        }
    };

    match GuestInfo::new(&stored.full_name, &stored.phone, &stored.email) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(error = %e, "Discarding invalid guest profile");
            storage::remove_logged(store, GUEST_PROFILE_KEY).await;
            None
        }
    }
}

/// Persist guest details.
///
/// # Errors
///
/// Returns an error if the store cannot be written.
pub async fn save(store: &dyn LocalStore, info: &GuestInfo) -> Result<(), StorageError> {
    storage::set_json(store, GUEST_PROFILE_KEY, info).await
}

/// Forget any persisted guest.
pub async fn clear(store: &dyn LocalStore) {
    storage::remove_logged(store, GUEST_PROFILE_KEY).await;
}
