//! Identity context: who is using the storefront right now.
//!
//! # States
//!
//! ```text
//! Loading ──► Authenticated(Profile)
//!    │   ──► Guest(GuestInfo)
//!    └─────► Anonymous
//!
//! Anonymous ──sign_in/sign_up──► Authenticated ──sign_out──► Anonymous
//! Anonymous ──continue_as_guest──► Guest ──sign_out──► Anonymous
//! Guest ──sign_in──► Authenticated (guest details discarded)
//! ```
//!
//! `Loading` only exists before [`IdentityContext::initialize`] finishes.
//! After that exactly one of profile and guest details is held, or neither.
//!
//! # Ordering
//!
//! Session events are applied one at a time by a single listener. Each applied
//! event bumps a sequence number, and the startup check discards its own
//! result if any event got there first. Every continuation after an await
//! re-checks that the teardown token is still live and that the session it
//! resolved for is still the current one.

mod error;
mod rate_limit;

pub use error::AuthError;
pub use rate_limit::RateLimiter;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use cloud_kitchen_core::{Email, Phone, Role, UserId};

use crate::backend::{SignUpResponse, UserMetadata};
use crate::error::{clear_sentry_user, set_sentry_user};
use crate::guest::{self, GuestInfo};
use crate::models::Profile;
use crate::profile::ProfileResolver;
use crate::session::{Session, SessionEvent, SessionStore, Subscription};
use crate::storage::LocalStore;
use crate::validation;

/// Current identity mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityState {
    /// Startup check still running.
    Loading,
    /// Signed in with a resolved profile.
    Authenticated(Profile),
    /// Ordering as a guest.
    Guest(GuestInfo),
    /// Nobody.
    Anonymous,
}

impl IdentityState {
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    #[must_use]
    pub const fn profile(&self) -> Option<&Profile> {
        match self {
            Self::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }

    #[must_use]
    pub const fn guest(&self) -> Option<&GuestInfo> {
        match self {
            Self::Guest(info) => Some(info),
            _ => None,
        }
    }

    /// Short name for logs and the CLI.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Authenticated(_) => "authenticated",
            Self::Guest(_) => "guest",
            Self::Anonymous => "anonymous",
        }
    }
}

/// Result of a successful sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// The account is active and signed in.
    SignedIn(Profile),
    /// A confirmation e-mail was sent; the state is unchanged.
    VerificationRequired {
        /// Where the confirmation was sent.
        email: Email,
    },
}

/// Sign-up form input.
#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub email: String,
    pub password: SecretString,
    pub full_name: String,
    pub phone: Option<String>,
    /// Customer or restaurant owner; admin cannot be self-assigned.
    pub role: Role,
}

/// Check that `state` is signed in with at least `role`.
///
/// # Errors
///
/// - [`AuthError::NotSignedIn`] unless authenticated (guests included).
/// - [`AuthError::NotAuthorized`] if the profile's role does not satisfy `role`.
pub fn require_role(state: &IdentityState, role: Role) -> Result<&Profile, AuthError> {
    match state {
        IdentityState::Authenticated(profile) if profile.role.satisfies(role) => Ok(profile),
        IdentityState::Authenticated(_) => Err(AuthError::NotAuthorized),
        IdentityState::Loading | IdentityState::Guest(_) | IdentityState::Anonymous => {
            Err(AuthError::NotSignedIn)
        }
    }
}

/// Shared identity state machine.
#[derive(Clone)]
pub struct IdentityContext {
    inner: Arc<IdentityInner>,
}

struct IdentityInner {
    sessions: SessionStore,
    profiles: ProfileResolver,
    storage: Arc<dyn LocalStore>,
    password_reset_redirect: Option<Url>,
    state: watch::Sender<IdentityState>,
    sign_in_limiter: RateLimiter,
    sign_up_limiter: RateLimiter,
    event_seq: AtomicU64,
    last_user: Mutex<Option<UserId>>,
    shutdown: CancellationToken,
    subscription: Mutex<Option<Subscription>>,
}

impl IdentityContext {
    /// Create the context in `Loading` and start listening for session events.
    ///
    /// Must be called from within a tokio runtime. Call
    /// [`IdentityContext::initialize`] next to leave `Loading`.
    #[must_use]
    pub fn new(
        sessions: SessionStore,
        profiles: ProfileResolver,
        storage: Arc<dyn LocalStore>,
        password_reset_redirect: Option<Url>,
    ) -> Self {
        let (state, _) = watch::channel(IdentityState::Loading);
        let context = Self {
            inner: Arc::new(IdentityInner {
                sessions,
                profiles,
                storage,
                password_reset_redirect,
                state,
                sign_in_limiter: RateLimiter::sign_in(),
                sign_up_limiter: RateLimiter::sign_up(),
                event_seq: AtomicU64::new(0),
                last_user: Mutex::new(None),
                shutdown: CancellationToken::new(),
                subscription: Mutex::new(None),
            }),
        };

        // The listener holds a weak reference so the context can be dropped
        let weak: Weak<IdentityInner> = Arc::downgrade(&context.inner);
        let subscription = context.inner.sessions.on_session_change(move |event| {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    Self { inner }.apply_event(event).await;
                }
            }
        });
        *context
            .inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(subscription);

        context
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Observation
    // ─────────────────────────────────────────────────────────────────────────

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> IdentityState {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<IdentityState> {
        self.inner.state.subscribe()
    }

    /// Wait until the state has left `Loading`.
    pub async fn wait_ready(&self) -> IdentityState {
        let mut receiver = self.subscribe();
        let ready = receiver
            .wait_for(|state| !state.is_loading())
            .await
            .map(|state| state.clone());
        ready.unwrap_or_else(|_| self.state())
    }

    /// The session store this context drives.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    /// Role guard against the current state.
    ///
    /// # Errors
    ///
    /// See [`require_role`].
    pub fn require_role(&self, role: Role) -> Result<Profile, AuthError> {
        require_role(&self.state(), role).cloned()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────────

    fn publish(&self, next: IdentityState) {
        debug!(state = next.label(), "Identity state changed");
        self.inner.state.send_replace(next);
    }

    fn bump_seq(&self) {
        self.inner.event_seq.fetch_add(1, Ordering::SeqCst);
    }

    fn last_user(&self) -> Option<UserId> {
        *self
            .inner
            .last_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_last_user(&self, user: Option<UserId>) {
        *self
            .inner
            .last_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = user;
    }

    fn is_current(&self, user_id: UserId) -> bool {
        !self.inner.shutdown.is_cancelled()
            && self.inner.sessions.current_user_id() == Some(user_id)
    }

    /// Resolve the profile for `session` and enter `Authenticated`.
    ///
    /// Returns `None` if resolution failed or the session was superseded
    /// while resolving.
    async fn establish(&self, session: &Session) -> Option<Profile> {
        let user_id = session.user_id();

        if self.last_user() == Some(user_id)
            && let IdentityState::Authenticated(profile) = self.state()
            && profile.id == user_id
        {
            debug!(user_id = %user_id, "Profile already resolved for this user");
            return Some(profile);
        }

        let resolved = self.inner.profiles.resolve(session).await;
        if !self.is_current(user_id) {
            debug!(user_id = %user_id, "Session changed while resolving profile");
            return None;
        }

        let Some(profile) = resolved else {
            if self.state().is_loading() {
                self.publish(IdentityState::Anonymous);
            }
            return None;
        };

        // Authenticating discards any guest details
        guest::clear(&*self.inner.storage).await;
        if !self.is_current(user_id) {
            return None;
        }

        self.set_last_user(Some(user_id));
        set_sentry_user(&profile.id, Some(&profile.email));
        info!(user_id = %user_id, role = %profile.role, "Authenticated");
        self.publish(IdentityState::Authenticated(profile.clone()));
        Some(profile)
    }

    fn on_signed_out(&self) {
        // A stale event after a newer sign-in must not undo it
        if self.inner.sessions.current_user_id().is_some() {
            debug!("Ignoring sign-out event, a newer session is active");
            return;
        }

        self.set_last_user(None);
        clear_sentry_user();
        if matches!(
            self.state(),
            IdentityState::Authenticated(_) | IdentityState::Loading
        ) {
            self.publish(IdentityState::Anonymous);
        }
    }

    async fn apply_event(&self, event: SessionEvent) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.bump_seq();
        debug!(event = event.kind(), "Applying session event");

        match event {
            SessionEvent::SignedIn(session) | SessionEvent::TokenRefreshed(session) => {
                self.establish(&session).await;
            }
            SessionEvent::SignedOut => self.on_signed_out(),
        }
    }

    async fn startup_state(&self) -> IdentityState {
        if let Some(session) = self.inner.sessions.get_session().await {
            return match self.inner.profiles.resolve(&session).await {
                Some(profile) => IdentityState::Authenticated(profile),
                None => {
                    warn!(user_id = %session.user_id(), "No profile for restored session, signing out");
                    self.inner.sessions.sign_out().await;
                    IdentityState::Anonymous
                }
            };
        }

        guest::load(&*self.inner.storage)
            .await
            .map_or(IdentityState::Anonymous, IdentityState::Guest)
    }

    /// Run the startup check and leave `Loading`.
    ///
    /// Uses the persisted session (refreshing it once if expired) or the
    /// persisted guest. If a session event was applied while this ran, the
    /// event's outcome wins and the startup result is discarded.
    #[instrument(skip_all)]
    pub async fn initialize(&self) -> IdentityState {
        let seq = self.inner.event_seq.load(Ordering::SeqCst);
        let next = self.startup_state().await;

        if self.inner.shutdown.is_cancelled() {
            return self.state();
        }
        if self.inner.event_seq.load(Ordering::SeqCst) != seq {
            debug!("Session event applied during startup, keeping its state");
            // A sign-out event leaves a signed-out startup result valid
            if self.state().is_loading()
                && self.inner.sessions.current_user_id().is_none()
                && !matches!(next, IdentityState::Authenticated(_))
            {
                self.publish(next);
            }
            return self.state();
        }

        if let IdentityState::Authenticated(profile) = &next {
            if !self.is_current(profile.id) {
                return self.state();
            }
            guest::clear(&*self.inner.storage).await;
            self.set_last_user(Some(profile.id));
            set_sentry_user(&profile.id, Some(&profile.email));
        }

        info!(state = next.label(), "Identity initialized");
        self.publish(next);
        self.state()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Sign in with e-mail and password.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidEmail`] for a malformed address.
    /// - [`AuthError::RateLimited`] after 5 attempts in 15 minutes, before any
    ///   backend call.
    /// - [`AuthError::InvalidCredentials`], [`AuthError::EmailNotConfirmed`]
    ///   and the other classified backend failures.
    /// - [`AuthError::ProfileUnavailable`] if no profile could be resolved; the
    ///   new session is signed out again.
    #[instrument(skip_all)]
    pub async fn sign_in(&self, email: &str, password: &SecretString) -> Result<Profile, AuthError> {
        let email = Email::parse(email)?;
        let key = email.normalized();
        self.inner
            .sign_in_limiter
            .check(&key)
            .map_err(|retry_after| AuthError::RateLimited { retry_after })?;

        let session = self.inner.sessions.sign_in(&email, password).await?;
        self.inner.sign_in_limiter.reset(&key);
        self.finish_authentication(&session).await
    }

    async fn finish_authentication(&self, session: &Session) -> Result<Profile, AuthError> {
        self.bump_seq();
        if let Some(profile) = self.establish(session).await {
            return Ok(profile);
        }

        if self.is_current(session.user_id()) {
            warn!(user_id = %session.user_id(), "No profile for new session, signing out");
            self.sign_out().await;
        }
        Err(AuthError::ProfileUnavailable)
    }

    /// Sign in and require the admin role.
    ///
    /// # Errors
    ///
    /// Any [`IdentityContext::sign_in`] error, or [`AuthError::NotAuthorized`]
    /// if the profile is not an admin; the session is then signed out.
    pub async fn admin_sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Profile, AuthError> {
        let profile = self.sign_in(email, password).await?;
        if profile.role == Role::Admin {
            return Ok(profile);
        }

        warn!(user_id = %profile.id, role = %profile.role, "Non-admin attempted back-office sign-in");
        self.sign_out().await;
        Err(AuthError::NotAuthorized)
    }

    /// Register a new account.
    ///
    /// # Errors
    ///
    /// - Validation errors for e-mail, password, name, phone or role.
    /// - [`AuthError::RateLimited`] after 3 attempts in an hour.
    /// - [`AuthError::UserAlreadyExists`], [`AuthError::WeakPassword`] and the
    ///   other classified backend failures.
    #[instrument(skip_all, fields(role = %request.role))]
    pub async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, AuthError> {
        let email = Email::parse(&request.email)?;
        validation::password(request.password.expose_secret())?;
        let full_name = validation::full_name(&request.full_name)?;
        let phone = request
            .phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(Phone::parse)
            .transpose()?;
        let role = validation::sign_up_role(request.role)?;

        let key = email.normalized();
        self.inner
            .sign_up_limiter
            .check(&key)
            .map_err(|retry_after| AuthError::RateLimited { retry_after })?;

        let metadata = UserMetadata {
            full_name: Some(full_name),
            name: None,
            phone: phone.map(|p| p.to_string()),
            role: Some(role.to_string()),
        };

        match self
            .inner
            .sessions
            .sign_up(&email, &request.password, &metadata)
            .await?
        {
            SignUpResponse::Session(session) => self
                .finish_authentication(&session)
                .await
                .map(SignUpOutcome::SignedIn),
            SignUpResponse::ConfirmationRequired(user) => {
                info!(user_id = %user.id, "Sign-up pending e-mail verification");
                Ok(SignUpOutcome::VerificationRequired { email })
            }
        }
    }

    /// End the session and forget any guest details.
    ///
    /// Works from every state and always ends `Anonymous`.
    #[instrument(skip_all)]
    pub async fn sign_out(&self) {
        self.bump_seq();
        self.inner.sessions.sign_out().await;
        guest::clear(&*self.inner.storage).await;

        self.set_last_user(None);
        clear_sentry_user();
        self.publish(IdentityState::Anonymous);
    }

    /// Enter guest mode with validated contact details.
    ///
    /// # Errors
    ///
    /// - [`AuthError::AlreadyAuthenticated`] while a session is active.
    /// - [`AuthError::InvalidGuestInfo`] if a field fails validation.
    #[instrument(skip_all)]
    pub async fn continue_as_guest(
        &self,
        full_name: &str,
        phone: &str,
        email: &str,
    ) -> Result<GuestInfo, AuthError> {
        if self.inner.sessions.current_user_id().is_some() {
            return Err(AuthError::AlreadyAuthenticated);
        }

        let info = GuestInfo::new(full_name, phone, email)?;
        if let Err(e) = guest::save(&*self.inner.storage, &info).await {
            warn!(error = %e, "Guest details not persisted, continuing for this run only");
        }

        if self.inner.sessions.current_user_id().is_some() {
            guest::clear(&*self.inner.storage).await;
            return Err(AuthError::AlreadyAuthenticated);
        }

        self.bump_seq();
        info!("Continuing as guest");
        self.publish(IdentityState::Guest(info.clone()));
        Ok(info)
    }

    /// Send the sign-up confirmation e-mail again.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidEmail`] or a classified backend failure.
    pub async fn resend_verification(&self, email: &str) -> Result<(), AuthError> {
        let email = Email::parse(email)?;
        self.inner.sessions.resend_verification(&email).await?;
        Ok(())
    }

    /// Send a password reset e-mail.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidEmail`] or a classified backend failure.
    pub async fn reset_password(&self, email: &str) -> Result<(), AuthError> {
        let email = Email::parse(email)?;
        self.inner
            .sessions
            .reset_password(&email, self.inner.password_reset_redirect.as_ref())
            .await?;
        Ok(())
    }

    /// Stop reacting to session events.
    ///
    /// Continuations still in flight see the cancelled token and drop their
    /// results.
    pub fn teardown(&self) {
        self.inner.shutdown.cancel();
        let subscription = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(subscription);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn profile(role: Role) -> Profile {
        Profile {
            id: UserId::random(),
            email: "owner@x.com".to_string(),
            full_name: None,
            phone: None,
            role,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_require_role() {
        let owner = IdentityState::Authenticated(profile(Role::RestaurantOwner));
        assert!(require_role(&owner, Role::RestaurantOwner).is_ok());
        assert!(matches!(
            require_role(&owner, Role::Admin),
            Err(AuthError::NotAuthorized)
        ));

        let admin = IdentityState::Authenticated(profile(Role::Admin));
        assert!(require_role(&admin, Role::RestaurantOwner).is_ok());

        assert!(matches!(
            require_role(&IdentityState::Anonymous, Role::Customer),
            Err(AuthError::NotSignedIn)
        ));
    }

    #[test]
    fn test_guest_is_not_signed_in() {
        let guest = GuestInfo::new("Jane", "+15551234567", "jane@x.com").unwrap();
        let state = IdentityState::Guest(guest);
        assert!(matches!(
            require_role(&state, Role::Customer),
            Err(AuthError::NotSignedIn)
        ));
        assert_eq!(state.label(), "guest");
        assert!(state.profile().is_none());
    }
}
