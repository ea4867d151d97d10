//! Integration tests for Cloud Kitchen.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cloud-kitchen-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `identity` - identity modes, sign-out, admin access, rate limiting
//! - `profile` - profile resolution under concurrent session events
//! - `checkout` - order placement and cart clearing
//! - `session` - persisted sessions and background refresh
//!
//! The tests run the real storefront services against [`FakeBackend`], an
//! in-memory stand-in for the hosted auth and table APIs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use cloud_kitchen_core::{Email, OrderId, Role, UserId};
use cloud_kitchen_storefront::backend::{
    AuthUser, BackendError, IdentityProvider, OrderStore, ProfileStore, SignUpResponse,
    UserMetadata,
};
use cloud_kitchen_storefront::models::{NewOrder, NewOrderItem, OrderRecord, Profile};
use cloud_kitchen_storefront::session::Session;
use cloud_kitchen_storefront::storage::{LocalStore, MemoryStore, StorageError};
use cloud_kitchen_storefront::{Backend, Storefront, StorefrontOptions};

/// Password every seeded account uses.
pub const PASSWORD: &str = "Secret123";

struct Account {
    user: AuthUser,
    password: String,
    confirmed: bool,
}

#[derive(Default)]
struct FakeState {
    accounts: HashMap<String, Account>,
    profiles: HashMap<UserId, Profile>,
    refresh_tokens: HashMap<String, UserId>,
    orders: Vec<OrderRecord>,
    order_items: Vec<NewOrderItem>,
    fail_orders: bool,
    fail_order_items: bool,
    deny_profile_inserts: bool,
    fail_profile_fetches: bool,
    reject_refresh: bool,
    require_confirmation: bool,
}

/// Counts of backend calls, by kind.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub sign_in: AtomicUsize,
    pub refresh: AtomicUsize,
    pub sign_out: AtomicUsize,
    pub profile_fetch: AtomicUsize,
    pub profile_insert: AtomicUsize,
    pub emails_sent: AtomicUsize,
}

/// In-memory auth service plus profile and order tables.
pub struct FakeBackend {
    state: Mutex<FakeState>,
    calls: CallCounts,
    latency: Duration,
    session_ttl: TimeDelta,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            calls: CallCounts::default(),
            latency: Duration::ZERO,
            session_ttl: TimeDelta::hours(1),
        }
    }
}

fn api_error(status: u16, code: &str, message: &str) -> BackendError {
    BackendError::Api {
        status,
        code: Some(code.to_string()),
        message: message.to_string(),
    }
}

impl FakeBackend {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A backend whose table calls take `latency` to answer.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    /// A backend issuing sessions that expire after `ttl`.
    #[must_use]
    pub fn with_session_ttl(ttl: TimeDelta) -> Arc<Self> {
        Arc::new(Self {
            session_ttl: ttl,
            ..Self::default()
        })
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    /// Register a confirmed account without a profile row.
    pub fn add_user(&self, email: &str, metadata: UserMetadata) -> UserId {
        let user = AuthUser {
            id: UserId::random(),
            email: Some(email.to_string()),
            user_metadata: metadata,
            email_confirmed_at: Some(Utc::now()),
        };
        let id = user.id;
        self.with_state(|state| {
            state.accounts.insert(
                email.to_lowercase(),
                Account {
                    user,
                    password: PASSWORD.to_string(),
                    confirmed: true,
                },
            );
        });
        id
    }

    /// Register a confirmed account with a profile row of `role`.
    pub fn add_user_with_role(&self, email: &str, full_name: &str, role: Role) -> UserId {
        let id = self.add_user(email, UserMetadata::default());
        self.with_state(|state| {
            state.profiles.insert(
                id,
                Profile {
                    id,
                    email: email.to_string(),
                    full_name: Some(full_name.to_string()),
                    phone: Some("+15550001111".to_string()),
                    role,
                    created_at: Utc::now(),
                },
            );
        });
        id
    }

    pub fn fail_orders(&self, fail: bool) {
        self.with_state(|state| state.fail_orders = fail);
    }

    pub fn fail_order_items(&self, fail: bool) {
        self.with_state(|state| state.fail_order_items = fail);
    }

    pub fn deny_profile_inserts(&self, deny: bool) {
        self.with_state(|state| state.deny_profile_inserts = deny);
    }

    pub fn fail_profile_fetches(&self, fail: bool) {
        self.with_state(|state| state.fail_profile_fetches = fail);
    }

    pub fn reject_refresh(&self, reject: bool) {
        self.with_state(|state| state.reject_refresh = reject);
    }

    pub fn require_confirmation(&self, require: bool) {
        self.with_state(|state| state.require_confirmation = require);
    }

    #[must_use]
    pub const fn calls(&self) -> &CallCounts {
        &self.calls
    }

    #[must_use]
    pub fn profile(&self, id: UserId) -> Option<Profile> {
        self.with_state(|state| state.profiles.get(&id).cloned())
    }

    #[must_use]
    pub fn orders(&self) -> Vec<OrderRecord> {
        self.with_state(|state| state.orders.clone())
    }

    #[must_use]
    pub fn order_items(&self) -> Vec<NewOrderItem> {
        self.with_state(|state| state.order_items.clone())
    }

    /// Issue a fresh session for `user`.
    pub fn issue_session(&self, user: AuthUser) -> Session {
        let refresh = format!("refresh-{}", uuid::Uuid::new_v4());
        self.with_state(|state| state.refresh_tokens.insert(refresh.clone(), user.id));
        Session::new(
            SecretString::from(format!("access-{}", uuid::Uuid::new_v4())),
            SecretString::from(refresh),
            Utc::now() + self.session_ttl,
            user,
        )
    }

    fn user_by_id(&self, id: UserId) -> Option<AuthUser> {
        self.with_state(|state| {
            state
                .accounts
                .values()
                .find(|account| account.user.id == id)
                .map(|account| account.user.clone())
        })
    }
}

#[async_trait]
impl IdentityProvider for FakeBackend {
    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Session, BackendError> {
        self.calls.sign_in.fetch_add(1, Ordering::SeqCst);
        let user = self.with_state(|state| {
            let account = state
                .accounts
                .get(&email.normalized())
                .filter(|account| account.password == password.expose_secret())
                .ok_or_else(|| api_error(400, "invalid_credentials", "Invalid login credentials"))?;
            if !account.confirmed {
                return Err(api_error(400, "email_not_confirmed", "Email not confirmed"));
            }
            Ok(account.user.clone())
        })?;
        Ok(self.issue_session(user))
    }

    async fn sign_up(
        &self,
        email: &Email,
        password: &SecretString,
        metadata: &UserMetadata,
    ) -> Result<SignUpResponse, BackendError> {
        let (user, confirmed) = self.with_state(|state| {
            let key = email.normalized();
            if state.accounts.contains_key(&key) {
                return Err(api_error(422, "user_already_exists", "User already registered"));
            }
            let confirmed = !state.require_confirmation;
            let user = AuthUser {
                id: UserId::random(),
                email: Some(email.to_string()),
                user_metadata: metadata.clone(),
                email_confirmed_at: confirmed.then(Utc::now),
            };
            state.accounts.insert(
                key,
                Account {
                    user: user.clone(),
                    password: password.expose_secret().to_string(),
                    confirmed,
                },
            );
            Ok((user, confirmed))
        })?;

        if confirmed {
            Ok(SignUpResponse::Session(self.issue_session(user)))
        } else {
            self.calls.emails_sent.fetch_add(1, Ordering::SeqCst);
            Ok(SignUpResponse::ConfirmationRequired(user))
        }
    }

    async fn refresh_session(&self, refresh_token: &SecretString) -> Result<Session, BackendError> {
        self.calls.refresh.fetch_add(1, Ordering::SeqCst);
        let user_id = self.with_state(|state| {
            if state.reject_refresh {
                return None;
            }
            state.refresh_tokens.remove(refresh_token.expose_secret())
        });
        let user = user_id
            .and_then(|id| self.user_by_id(id))
            .ok_or_else(|| api_error(400, "refresh_token_not_found", "Invalid Refresh Token"))?;
        Ok(self.issue_session(user))
    }

    async fn sign_out(&self, _access_token: &SecretString) -> Result<(), BackendError> {
        self.calls.sign_out.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resend_verification(&self, _email: &Email) -> Result<(), BackendError> {
        self.calls.emails_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reset_password(
        &self,
        _email: &Email,
        _redirect_to: Option<&Url>,
    ) -> Result<(), BackendError> {
        self.calls.emails_sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for FakeBackend {
    async fn fetch_profile(
        &self,
        id: UserId,
        _access_token: Option<&SecretString>,
    ) -> Result<Option<Profile>, BackendError> {
        self.calls.profile_fetch.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.with_state(|state| state.fail_profile_fetches) {
            return Err(api_error(500, "XX000", "profile query failed"));
        }
        Ok(self.profile(id))
    }

    async fn insert_profile(
        &self,
        profile: &Profile,
        _access_token: Option<&SecretString>,
    ) -> Result<(), BackendError> {
        self.calls.profile_insert.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.with_state(|state| {
            if state.deny_profile_inserts {
                return Err(BackendError::PermissionDenied(
                    "new row violates row-level security policy".to_string(),
                ));
            }
            state.profiles.insert(profile.id, profile.clone());
            Ok(())
        })
    }
}

#[async_trait]
impl OrderStore for FakeBackend {
    async fn insert_order(
        &self,
        order: &NewOrder,
        _access_token: Option<&SecretString>,
    ) -> Result<OrderRecord, BackendError> {
        self.with_state(|state| {
            if state.fail_orders {
                return Err(api_error(500, "XX000", "insert failed"));
            }
            let record = order.clone().into_record(OrderId::random(), Utc::now());
            state.orders.push(record.clone());
            Ok(record)
        })
    }

    async fn insert_order_items(
        &self,
        items: &[NewOrderItem],
        _access_token: Option<&SecretString>,
    ) -> Result<(), BackendError> {
        self.with_state(|state| {
            if state.fail_order_items {
                return Err(api_error(500, "XX000", "insert failed"));
            }
            state.order_items.extend_from_slice(items);
            Ok(())
        })
    }
}

/// Storefront services over `backend` and `storage`, background refresh off.
pub async fn storefront(backend: &Arc<FakeBackend>, storage: Arc<dyn LocalStore>) -> Storefront {
    storefront_with(backend, storage, StorefrontOptions::default()).await
}

/// Storefront services with explicit options.
pub async fn storefront_with(
    backend: &Arc<FakeBackend>,
    storage: Arc<dyn LocalStore>,
    options: StorefrontOptions,
) -> Storefront {
    let services = Backend {
        identity: backend.clone(),
        profiles: backend.clone(),
        orders: backend.clone(),
        storage,
    };
    Storefront::with_backend(services, options).await
}

/// In-memory store whose writes take `write_delay` to land.
#[derive(Debug, Default)]
pub struct SlowStore {
    entries: MemoryStore,
    write_delay: Duration,
}

impl SlowStore {
    #[must_use]
    pub fn new(write_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: MemoryStore::new(),
            write_delay,
        })
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }
}

#[async_trait]
impl LocalStore for SlowStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.entries.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        tokio::time::sleep(self.write_delay).await;
        self.entries.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key).await
    }
}

/// A fresh in-memory store.
#[must_use]
pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// Read a call counter.
#[must_use]
pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
