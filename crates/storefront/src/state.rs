//! Application container holding the shared services.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;
use url::Url;

use crate::backend::{
    AuthClient, BackendError, IdentityProvider, OrderStore, ProfileStore, RestClient,
    build_http_client,
};
use crate::cart::CartEngine;
use crate::checkout::CheckoutOrchestrator;
use crate::config::{CheckoutConfig, RefreshPolicy, StorefrontConfig};
use crate::identity::{IdentityContext, IdentityState};
use crate::profile::ProfileResolver;
use crate::session::{AutoRefresh, SessionStore, spawn_auto_refresh};
use crate::storage::{FileStore, LocalStore};

/// The backend ports and local store the services run against.
#[derive(Clone)]
pub struct Backend {
    pub identity: Arc<dyn IdentityProvider>,
    pub profiles: Arc<dyn ProfileStore>,
    pub orders: Arc<dyn OrderStore>,
    pub storage: Arc<dyn LocalStore>,
}

/// Behaviour settings independent of where the backend lives.
#[derive(Debug, Clone, Default)]
pub struct StorefrontOptions {
    /// `None` disables background refresh.
    pub refresh: Option<RefreshPolicy>,
    pub checkout: CheckoutConfig,
    pub password_reset_redirect: Option<Url>,
}

impl From<&StorefrontConfig> for StorefrontOptions {
    fn from(config: &StorefrontConfig) -> Self {
        Self {
            refresh: Some(config.refresh),
            checkout: config.checkout.clone(),
            password_reset_redirect: config.password_reset_redirect.clone(),
        }
    }
}

/// Shared services for one running application.
///
/// This struct is cheaply cloneable via `Arc`. Create it with
/// [`Storefront::init`] and call [`Storefront::teardown`] before exit.
#[derive(Clone)]
pub struct Storefront {
    inner: Arc<StorefrontInner>,
}

struct StorefrontInner {
    sessions: SessionStore,
    identity: IdentityContext,
    cart: CartEngine,
    checkout: CheckoutOrchestrator,
    auto_refresh: Mutex<Option<AutoRefresh>>,
}

impl Storefront {
    /// Connect to the hosted backend and run the startup identity check.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the backend URL
    /// cannot be extended with the API paths.
    pub async fn init(config: &StorefrontConfig) -> Result<Self, BackendError> {
        Self::connect(config, StorefrontOptions::from(config)).await
    }

    /// Like [`Storefront::init`] with explicit options.
    ///
    /// # Errors
    ///
    /// See [`Storefront::init`].
    pub async fn connect(
        config: &StorefrontConfig,
        options: StorefrontOptions,
    ) -> Result<Self, BackendError> {
        let client = build_http_client(&config.backend)?;
        let auth = AuthClient::new(&config.backend, client.clone())?;
        let rest = Arc::new(RestClient::new(&config.backend, client)?);

        let backend = Backend {
            identity: Arc::new(auth),
            profiles: rest.clone(),
            orders: rest,
            storage: Arc::new(FileStore::new(&config.storage_path)),
        };

        Ok(Self::with_backend(backend, options).await)
    }

    /// Wire the services over `backend` and run the startup identity check.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn with_backend(backend: Backend, options: StorefrontOptions) -> Self {
        let sessions = SessionStore::new(backend.identity, Arc::clone(&backend.storage));
        let profiles = ProfileResolver::new(backend.profiles);
        let identity = IdentityContext::new(
            sessions.clone(),
            profiles,
            backend.storage,
            options.password_reset_redirect,
        );
        let cart = CartEngine::new();
        let checkout = CheckoutOrchestrator::new(
            identity.clone(),
            cart.clone(),
            backend.orders,
            options.checkout,
        );

        let state = identity.initialize().await;
        let auto_refresh = options
            .refresh
            .map(|policy| spawn_auto_refresh(sessions.clone(), policy));

        info!(identity = state.label(), "Storefront ready");

        Self {
            inner: Arc::new(StorefrontInner {
                sessions,
                identity,
                cart,
                checkout,
                auto_refresh: Mutex::new(auto_refresh),
            }),
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    #[must_use]
    pub fn identity(&self) -> &IdentityContext {
        &self.inner.identity
    }

    /// Shortcut for `identity().state()`.
    #[must_use]
    pub fn identity_state(&self) -> IdentityState {
        self.inner.identity.state()
    }

    #[must_use]
    pub fn cart(&self) -> &CartEngine {
        &self.inner.cart
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutOrchestrator {
        &self.inner.checkout
    }

    /// Stop background work and event handling.
    ///
    /// The session itself is left in place so it can be restored on the next
    /// start.
    pub async fn teardown(&self) {
        self.inner.identity.teardown();
        let auto_refresh = self
            .inner
            .auto_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = auto_refresh {
            task.stop().await;
        }
        info!("Storefront stopped");
    }
}
