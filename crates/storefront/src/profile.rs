//! Maps an authenticated session to its application profile.
//!
//! A missing profile row is synthesized from the auth user's metadata and
//! written back. Concurrent resolutions for the same user share one in-flight
//! lookup, so a burst of session events costs a single query and at most one
//! insert.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use secrecy::SecretString;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use cloud_kitchen_core::{Role, UserId};

use crate::backend::{AuthUser, BackendError, ProfileStore};
use crate::models::Profile;
use crate::session::Session;

/// The profile lookup itself failed (as opposed to finding no row).
#[derive(Debug, Error)]
#[error("profile lookup failed: {0}")]
pub struct ProfileFetchError(#[from] pub BackendError);

/// Resolves sessions to profiles.
#[derive(Clone)]
pub struct ProfileResolver {
    inner: Arc<ProfileResolverInner>,
}

struct ProfileResolverInner {
    store: Arc<dyn ProfileStore>,
    /// Holds only in-flight resolutions; entries are dropped as soon as they complete.
    in_flight: Cache<UserId, Profile>,
}

impl ProfileResolver {
    /// Create a resolver over a profile store.
    #[must_use]
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        let in_flight = Cache::builder()
            .max_capacity(1024)
            .time_to_live(Duration::from_secs(30))
            .build();

        Self {
            inner: Arc::new(ProfileResolverInner { store, in_flight }),
        }
    }

    /// Resolve the profile for `session`, logging failures.
    ///
    /// Returns `None` only when the lookup itself failed.
    pub async fn resolve(&self, session: &Session) -> Option<Profile> {
        match self.try_resolve(session).await {
            Ok(profile) => Some(profile),
            Err(e) => {
                error!(user_id = %session.user_id(), error = %e, "Profile resolution failed");
                None
            }
        }
    }

    /// Resolve the profile for `session`.
    ///
    /// # Errors
    ///
    /// Returns the shared lookup error if the profile query failed. Callers
    /// that joined the same in-flight resolution all receive the same error.
    #[instrument(skip_all, fields(user_id = %session.user_id()))]
    pub async fn try_resolve(&self, session: &Session) -> Result<Profile, Arc<ProfileFetchError>> {
        let user_id = session.user_id();
        let store = Arc::clone(&self.inner.store);
        let user = session.user().clone();
        let token = session.access_token().clone();

        let result = self
            .inner
            .in_flight
            .try_get_with(user_id, async move {
                resolve_uncached(store.as_ref(), &user, &token).await
            })
            .await;

        self.inner.in_flight.invalidate(&user_id).await;
        result
    }
}

async fn resolve_uncached(
    store: &dyn ProfileStore,
    user: &AuthUser,
    token: &SecretString,
) -> Result<Profile, ProfileFetchError> {
    if let Some(profile) = store.fetch_profile(user.id, Some(token)).await? {
        debug!(role = %profile.role, "Profile found");
        return Ok(profile);
    }

    let profile = synthesize(user);
    match store.insert_profile(&profile, Some(token)).await {
        Ok(()) => info!(role = %profile.role, "Created missing profile"),
        // Row-level security commonly rejects this; the synthesized profile
        // is still good enough for the session.
        Err(e) => warn!(error = %e, "Could not store synthesized profile, using it anyway"),
    }
    Ok(profile)
}

/// Build a profile from the auth user's metadata.
///
/// The metadata role is user-controlled, so an `admin` hint is ignored.
#[must_use]
pub fn synthesize(user: &AuthUser) -> Profile {
    let metadata = &user.user_metadata;

    let role = match metadata.role.as_deref().map(str::parse::<Role>) {
        Some(Ok(Role::Admin)) => {
            warn!(user_id = %user.id, "Ignoring admin role hint in user metadata");
            Role::Customer
        }
        Some(Ok(role)) => role,
        Some(Err(_)) | None => Role::Customer,
    };

    Profile {
        id: user.id,
        email: user.email.clone().unwrap_or_default(),
        full_name: metadata.display_name().map(str::to_string),
        phone: metadata.phone.clone(),
        role,
        created_at: Utc::now(),
    }
}
