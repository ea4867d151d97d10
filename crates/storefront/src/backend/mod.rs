//! Hosted backend clients and the ports the core talks to.
//!
//! # Architecture
//!
//! - [`IdentityProvider`] - GoTrue-style auth API (`/auth/v1`)
//! - [`ProfileStore`] and [`OrderStore`] - PostgREST-style tables (`/rest/v1`)
//! - [`AuthClient`] and [`RestClient`] implement the ports over `reqwest`
//!
//! The rest of the crate only sees the traits, so the same session, identity
//! and checkout code runs against the real service or an in-memory double.
//!
//! No retries happen here. A failed call surfaces as a [`BackendError`] and
//! the caller decides whether it is fatal.

mod auth;
mod rest;
pub mod types;

pub use auth::AuthClient;
pub use rest::RestClient;
pub use types::{AuthUser, SignUpResponse, UserMetadata};

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use cloud_kitchen_core::{Email, UserId};

use crate::config::BackendConfig;
use crate::models::{NewOrder, NewOrderItem, OrderRecord, Profile};
use crate::session::Session;

/// Postgres error code for an insufficient privilege (row-level security) failure.
const PG_INSUFFICIENT_PRIVILEGE: &str = "42501";

/// Errors that can occur when talking to the hosted backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// HTTP request failed (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Endpoint URL could not be built.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The service answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Machine-readable error code, if the body carried one.
        code: Option<String>,
        /// Human-readable message from the body.
        message: String,
    },

    /// Row-level security or role check rejected the request.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limited by the service.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),
}

impl BackendError {
    /// Returns `true` if the service rejected the presented credentials or
    /// token, as opposed to a transport or server failure.
    #[must_use]
    pub const fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Api { status: 400 | 401 | 403, .. })
    }
}

/// Seconds to wait before retrying a 429, from `Retry-After` (default 60).
fn retry_after(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(60)
}

/// Truncate a response body for logs and error messages.
fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

/// Build the shared HTTP client with the configured request timeout.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn build_http_client(config: &BackendConfig) -> Result<reqwest::Client, BackendError> {
    Ok(reqwest::Client::builder()
        .timeout(config.request_timeout)
        .user_agent(concat!("cloud-kitchen/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Identity provider: password auth and token lifecycle.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange e-mail and password for a session.
    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Session, BackendError>;

    /// Register a user. Returns a session unless e-mail verification is pending.
    async fn sign_up(
        &self,
        email: &Email,
        password: &SecretString,
        metadata: &UserMetadata,
    ) -> Result<SignUpResponse, BackendError>;

    /// Exchange a refresh token for a new session.
    async fn refresh_session(&self, refresh_token: &SecretString)
    -> Result<Session, BackendError>;

    /// Revoke the session server-side.
    async fn sign_out(&self, access_token: &SecretString) -> Result<(), BackendError>;

    /// Send the sign-up confirmation e-mail again.
    async fn resend_verification(&self, email: &Email) -> Result<(), BackendError>;

    /// Send a password reset e-mail.
    async fn reset_password(
        &self,
        email: &Email,
        redirect_to: Option<&Url>,
    ) -> Result<(), BackendError>;
}

/// Profile table access.
///
/// `access_token` is the signed-in user's token; `None` uses the anon key.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch a profile by id. `Ok(None)` when no row exists.
    async fn fetch_profile(
        &self,
        id: UserId,
        access_token: Option<&SecretString>,
    ) -> Result<Option<Profile>, BackendError>;

    /// Insert a new profile row.
    async fn insert_profile(
        &self,
        profile: &Profile,
        access_token: Option<&SecretString>,
    ) -> Result<(), BackendError>;
}

/// Order tables access. The two inserts are not transactional.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert an order row and return it as stored.
    async fn insert_order(
        &self,
        order: &NewOrder,
        access_token: Option<&SecretString>,
    ) -> Result<OrderRecord, BackendError>;

    /// Insert the line snapshots of an order.
    async fn insert_order_items(
        &self,
        items: &[NewOrderItem],
        access_token: Option<&SecretString>,
    ) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::RateLimited(60);
        assert_eq!(err.to_string(), "Rate limited, retry after 60 seconds");

        let err = BackendError::Api {
            status: 422,
            code: Some("weak_password".to_string()),
            message: "Password should be at least 6 characters".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "API error (422): Password should be at least 6 characters"
        );
    }

    #[test]
    fn test_auth_rejection() {
        let rejected = BackendError::Api {
            status: 400,
            code: Some("refresh_token_not_found".to_string()),
            message: "Invalid Refresh Token".to_string(),
        };
        assert!(rejected.is_auth_rejection());

        let server = BackendError::Api {
            status: 503,
            code: None,
            message: "unavailable".to_string(),
        };
        assert!(!server.is_auth_rejection());
        assert!(!BackendError::RateLimited(1).is_auth_rejection());
    }
}
