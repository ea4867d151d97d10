//! Session store: token lifecycle, persistence and change events.
//!
//! The store owns the single active [`Session`]. Sign-in, sign-up, refresh and
//! sign-out all go through it, and each change is broadcast as a
//! [`SessionEvent`] to subscribers registered with
//! [`SessionStore::on_session_change`].
//!
//! # Consistency
//!
//! The current session sits behind a mutex together with a generation
//! counter that is bumped on every replacement. Operations that await the
//! backend remember the generation they started from and only install their
//! result if nothing replaced the session in the meantime, so a slow refresh
//! can never resurrect a session that was signed out while it ran.
//!
//! Writes of the persisted copy are serialized by a second lock and re-check
//! the generation once they hold it. A sign-in whose storage write is still
//! pending when the user signs out therefore never writes its session back.

mod refresh;

pub use refresh::{AutoRefresh, spawn_auto_refresh};

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use cloud_kitchen_core::{Email, UserId};

use crate::backend::{AuthUser, BackendError, IdentityProvider, SignUpResponse, UserMetadata};
use crate::identity::AuthError;
use crate::storage::{self, LocalStore, SESSION_KEY};

/// Sessions closer than this to expiry are treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 10;

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 64;

/// Visible suffix length of a masked token.
const TOKEN_PREVIEW_CHARS: usize = 8;

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// An authenticated session.
///
/// Implements `Debug` manually to redact tokens.
#[derive(Clone)]
pub struct Session {
    access_token: SecretString,
    refresh_token: SecretString,
    expires_at: DateTime<Utc>,
    user: AuthUser,
}

impl Session {
    /// Assemble a session from its parts.
    #[must_use]
    pub const fn new(
        access_token: SecretString,
        refresh_token: SecretString,
        expires_at: DateTime<Utc>,
        user: AuthUser,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at,
            user,
        }
    }

    /// Bearer token for backend calls.
    #[must_use]
    pub const fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    /// Token used to obtain the next session.
    #[must_use]
    pub const fn refresh_token(&self) -> &SecretString {
        &self.refresh_token
    }

    /// When the access token stops being accepted.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// The auth user this session belongs to.
    #[must_use]
    pub const fn user(&self) -> &AuthUser {
        &self.user
    }

    /// Shorthand for `user().id`.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user.id
    }

    /// Time left before expiry; negative once expired.
    #[must_use]
    pub fn time_until_expiry(&self) -> TimeDelta {
        self.expires_at - Utc::now()
    }

    /// Returns `true` if the session is expired or about to be.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.time_until_expiry().num_seconds() <= EXPIRY_MARGIN_SECS
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user.id)
            .finish()
    }
}

/// On-disk shape of a session.
#[derive(Serialize, Deserialize)]
struct PersistedSession {
    access_token: String,
    refresh_token: String,
    expires_at: i64,
    user: AuthUser,
}

impl From<&Session> for PersistedSession {
    fn from(session: &Session) -> Self {
        Self {
            access_token: session.access_token.expose_secret().to_string(),
            refresh_token: session.refresh_token.expose_secret().to_string(),
            expires_at: session.expires_at.timestamp(),
            user: session.user.clone(),
        }
    }
}

impl PersistedSession {
    fn into_session(self) -> Option<Session> {
        let expires_at = DateTime::from_timestamp(self.expires_at, 0)?;
        Some(Session::new(
            SecretString::from(self.access_token),
            SecretString::from(self.refresh_token),
            expires_at,
            self.user,
        ))
    }
}

/// A change to the current session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A new session was established by sign-in or sign-up.
    SignedIn(Session),
    /// The session was replaced by a refreshed one for the same user.
    TokenRefreshed(Session),
    /// The session was destroyed.
    SignedOut,
}

impl SessionEvent {
    /// The session carried by the event, if any.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        match self {
            Self::SignedIn(session) | Self::TokenRefreshed(session) => Some(session),
            Self::SignedOut => None,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SignedIn(_) => "signed_in",
            Self::TokenRefreshed(_) => "token_refreshed",
            Self::SignedOut => "signed_out",
        }
    }
}

/// Debug summary of the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub user_id: UserId,
    pub email: Option<String>,
    pub expires_at: DateTime<Utc>,
    /// Seconds until expiry; negative once expired.
    pub expires_in_secs: i64,
    /// Access token masked to its last few characters.
    pub token_preview: String,
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "user:       {}", self.user_id)?;
        writeln!(f, "email:      {}", self.email.as_deref().unwrap_or("-"))?;
        writeln!(f, "expires at: {}", self.expires_at.to_rfc3339())?;
        writeln!(f, "expires in: {}s", self.expires_in_secs)?;
        write!(f, "token:      {}", self.token_preview)
    }
}

fn mask_token(token: &str) -> String {
    let len = token.chars().count();
    let visible: String = token
        .chars()
        .skip(len.saturating_sub(TOKEN_PREVIEW_CHARS))
        .collect();
    format!("...{visible}")
}

/// Handle for a session change subscription.
///
/// Delivery stops when the handle is dropped or [`Subscription::unsubscribe`]
/// is called.
#[derive(Debug)]
pub struct Subscription {
    cancel: CancellationToken,
}

impl Subscription {
    /// Stop delivering events.
    pub fn unsubscribe(self) {
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Slot {
    session: Option<Session>,
    generation: u64,
}

/// Owner of the current session.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

struct SessionStoreInner {
    provider: Arc<dyn IdentityProvider>,
    storage: Arc<dyn LocalStore>,
    slot: Mutex<Slot>,
    loaded: OnceCell<()>,
    refresh_lock: tokio::sync::Mutex<()>,
    persist_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    /// Create a store. Nothing is read from storage until first use.
    #[must_use]
    pub fn new(provider: Arc<dyn IdentityProvider>, storage: Arc<dyn LocalStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(SessionStoreInner {
                provider,
                storage,
                slot: Mutex::new(Slot::default()),
                loaded: OnceCell::new(),
                refresh_lock: tokio::sync::Mutex::new(()),
                persist_lock: tokio::sync::Mutex::new(()),
                events,
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Slot Access
    // ─────────────────────────────────────────────────────────────────────────

    fn with_slot<T>(&self, f: impl FnOnce(&mut Slot) -> T) -> T {
        let mut slot = self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut slot)
    }

    fn snapshot(&self) -> (Option<Session>, u64) {
        self.with_slot(|slot| (slot.session.clone(), slot.generation))
    }

    fn generation(&self) -> u64 {
        self.with_slot(|slot| slot.generation)
    }

    /// Install `session` unconditionally and return the new generation.
    fn replace(&self, session: Option<Session>) -> u64 {
        self.with_slot(|slot| {
            slot.generation += 1;
            slot.session = session;
            slot.generation
        })
    }

    /// Install `session` if the slot is still at `generation`.
    fn replace_if(&self, generation: u64, session: Option<Session>) -> Option<u64> {
        self.with_slot(|slot| {
            if slot.generation != generation {
                return None;
            }
            slot.generation += 1;
            slot.session = session;
            Some(slot.generation)
        })
    }

    fn emit(&self, event: SessionEvent) {
        debug!(event = event.kind(), "Session event");
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    async fn persist(&self, session: &Session) {
        let persisted = PersistedSession::from(session);
        if let Err(e) = storage::set_json(&*self.inner.storage, SESSION_KEY, &persisted).await {
            warn!(error = %e, "Failed to persist session");
        }
    }

    /// Persist the state installed at `generation` and emit `event`.
    ///
    /// Does nothing if the slot moved on before the persistence lock was
    /// taken.
    async fn commit(&self, generation: u64, event: SessionEvent) -> bool {
        let _guard = self.inner.persist_lock.lock().await;
        if self.generation() != generation {
            debug!(event = event.kind(), "Session replaced before it was persisted");
            return false;
        }

        match event.session() {
            Some(session) => self.persist(session).await,
            None => storage::remove_logged(&*self.inner.storage, SESSION_KEY).await,
        }
        self.emit(event);
        true
    }

    async fn adopt(&self, session: Session) {
        let generation = self.replace(Some(session.clone()));
        self.commit(generation, SessionEvent::SignedIn(session)).await;
    }

    async fn ensure_loaded(&self) {
        self.inner
            .loaded
            .get_or_init(|| self.load_persisted())
            .await;
    }

    async fn load_persisted(&self) {
        let (_, generation) = self.snapshot();
        let storage = &*self.inner.storage;

        let persisted = match storage::get_json::<PersistedSession>(storage, SESSION_KEY).await {
            Ok(Some(persisted)) => persisted,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable persisted session");
                storage::remove_logged(storage, SESSION_KEY).await;
                return;
            }
        };

        let Some(session) = persisted.into_session() else {
            storage::remove_logged(storage, SESSION_KEY).await;
            return;
        };

        if !session.is_expired() {
            self.replace_if(generation, Some(session));
            return;
        }

        debug!(user_id = %session.user_id(), "Persisted session expired, refreshing");
        match self
            .inner
            .provider
            .refresh_session(session.refresh_token())
            .await
        {
            Ok(fresh) => {
                if let Some(generation) = self.replace_if(generation, Some(fresh.clone())) {
                    self.commit(generation, SessionEvent::TokenRefreshed(fresh))
                        .await;
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not restore expired session");
                storage::remove_logged(storage, SESSION_KEY).await;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// The current session.
    ///
    /// The first call loads a persisted session. If it has expired, one
    /// refresh is attempted; if that fails the persisted copy is dropped and
    /// `None` is returned.
    pub async fn get_session(&self) -> Option<Session> {
        self.ensure_loaded().await;
        self.current()
    }

    /// The current session without touching storage or the network.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.snapshot().0
    }

    /// Id of the user the current session belongs to.
    #[must_use]
    pub fn current_user_id(&self) -> Option<UserId> {
        self.with_slot(|slot| slot.session.as_ref().map(Session::user_id))
    }

    /// Sign in with e-mail and password and make the result current.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged; callers map it to [`AuthError`].
    pub async fn sign_in(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Session, BackendError> {
        self.ensure_loaded().await;
        let session = self
            .inner
            .provider
            .sign_in_with_password(email, password)
            .await?;
        info!(user_id = %session.user_id(), "Signed in");
        self.adopt(session.clone()).await;
        Ok(session)
    }

    /// Register a user; a returned session becomes current.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged; callers map it to [`AuthError`].
    pub async fn sign_up(
        &self,
        email: &Email,
        password: &SecretString,
        metadata: &UserMetadata,
    ) -> Result<SignUpResponse, BackendError> {
        self.ensure_loaded().await;
        let response = self.inner.provider.sign_up(email, password, metadata).await?;
        if let SignUpResponse::Session(session) = &response {
            info!(user_id = %session.user_id(), "Signed up and signed in");
            self.adopt(session.clone()).await;
        }
        Ok(response)
    }

    /// Ask the provider to send the sign-up confirmation e-mail again.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged.
    pub async fn resend_verification(&self, email: &Email) -> Result<(), BackendError> {
        self.inner.provider.resend_verification(email).await
    }

    /// Ask the provider to send a password reset e-mail.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged.
    pub async fn reset_password(
        &self,
        email: &Email,
        redirect_to: Option<&Url>,
    ) -> Result<(), BackendError> {
        self.inner.provider.reset_password(email, redirect_to).await
    }

    /// Force a token refresh.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotSignedIn`] if there is no session.
    /// - [`AuthError::SessionExpired`] if the refresh token was rejected; the
    ///   session is destroyed and `SignedOut` emitted.
    /// - Other variants for transient failures, which leave the session as is.
    pub async fn refresh(&self) -> Result<Session, AuthError> {
        self.ensure_loaded().await;
        let _guard = self.inner.refresh_lock.lock().await;

        let (Some(session), generation) = self.snapshot() else {
            return Err(AuthError::NotSignedIn);
        };

        match self
            .inner
            .provider
            .refresh_session(session.refresh_token())
            .await
        {
            Ok(fresh) => {
                let Some(generation) = self.replace_if(generation, Some(fresh.clone())) else {
                    debug!("Session replaced during refresh, discarding result");
                    return self.current().ok_or(AuthError::SessionExpired);
                };
                info!(
                    user_id = %fresh.user_id(),
                    expires_at = %fresh.expires_at(),
                    "Session refreshed"
                );
                self.commit(generation, SessionEvent::TokenRefreshed(fresh.clone()))
                    .await;
                Ok(fresh)
            }
            Err(e) if e.is_auth_rejection() => {
                warn!(error = %e, "Refresh token rejected, ending session");
                if let Some(generation) = self.replace_if(generation, None) {
                    self.commit(generation, SessionEvent::SignedOut).await;
                }
                Err(AuthError::SessionExpired)
            }
            Err(e) => Err(AuthError::from(e)),
        }
    }

    /// End the session.
    ///
    /// The backend revoke is best effort. The local session is always cleared,
    /// as is its persisted copy unless a newer sign-in already replaced it.
    /// `SignedOut` is always emitted.
    pub async fn sign_out(&self) {
        self.ensure_loaded().await;

        if let Some(session) = self.current()
            && let Err(e) = self.inner.provider.sign_out(session.access_token()).await
        {
            warn!(error = %e, "Backend sign-out failed, clearing local session anyway");
        }

        let generation = self.replace(None);
        let _guard = self.inner.persist_lock.lock().await;
        // A sign-in that landed meanwhile owns the persisted copy now
        if self.generation() == generation {
            storage::remove_logged(&*self.inner.storage, SESSION_KEY).await;
        }
        info!("Signed out");
        self.emit(SessionEvent::SignedOut);
    }

    /// When the current session expires.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.with_slot(|slot| slot.session.as_ref().map(Session::expires_at))
    }

    /// Time left on the current session; negative once expired.
    #[must_use]
    pub fn time_until_expiry(&self) -> Option<TimeDelta> {
        self.with_slot(|slot| slot.session.as_ref().map(Session::time_until_expiry))
    }

    /// Debug summary of the current session.
    #[must_use]
    pub fn info(&self) -> Option<SessionInfo> {
        self.current().map(|session| SessionInfo {
            user_id: session.user_id(),
            email: session.user().email.clone(),
            expires_at: session.expires_at(),
            expires_in_secs: session.time_until_expiry().num_seconds(),
            token_preview: mask_token(session.access_token().expose_secret()),
        })
    }

    /// Deliver session events to `handler`.
    ///
    /// Events reach the handler in emission order, one at a time: the next
    /// event is not delivered until the previous handler future completes.
    /// Must be called from within a tokio runtime.
    pub fn on_session_change<F, Fut>(&self, handler: F) -> Subscription
    where
        F: Fn(SessionEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut receiver = self.inner.events.subscribe();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Session subscriber lagged, events dropped");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };

                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = handler(event) => {}
                }
            }
        });

        Subscription { cancel }
    }
}
