//! Authentication error types.

use std::time::Duration;

use thiserror::Error;

use cloud_kitchen_core::{EmailError, PhoneError};

use crate::backend::BackendError;
use crate::guest::GuestInfoError;
use crate::validation::ValidationError;

/// Errors that can occur during identity operations.
///
/// Raw [`BackendError`]s are classified into the specific variants here so
/// callers never have to inspect status codes.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// Invalid phone format.
    #[error("invalid phone: {0}")]
    InvalidPhone(#[from] PhoneError),

    /// Password, name or other sign-up input failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    /// Guest details failed validation.
    #[error("invalid guest details: {0}")]
    InvalidGuestInfo(#[from] GuestInfoError),

    /// Wrong e-mail or password.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The account exists but the e-mail address is not confirmed yet.
    #[error("email not confirmed")]
    EmailNotConfirmed,

    /// An account with this e-mail already exists.
    #[error("user already exists")]
    UserAlreadyExists,

    /// The service rejected the password.
    #[error("password rejected: {0}")]
    WeakPassword(String),

    /// Too many local attempts for this identifier.
    #[error("too many attempts, retry in {} seconds", retry_after.as_secs())]
    RateLimited {
        /// Time until the next attempt is allowed.
        retry_after: Duration,
    },

    /// The service itself is throttling requests.
    #[error("auth service rate limited, retry after {0} seconds")]
    UpstreamRateLimited(u64),

    /// The refresh token was rejected and the session has ended.
    #[error("session expired")]
    SessionExpired,

    /// The operation needs a signed-in user.
    #[error("not signed in")]
    NotSignedIn,

    /// The operation needs the signed-out state.
    #[error("already signed in")]
    AlreadyAuthenticated,

    /// Signed in, but the role claim does not allow this.
    #[error("not authorized")]
    NotAuthorized,

    /// Signed in, but no profile could be loaded or created.
    #[error("profile unavailable")]
    ProfileUnavailable,

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(#[source] BackendError),
}

impl From<BackendError> for AuthError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::RateLimited(secs) => Self::UpstreamRateLimited(secs),
            BackendError::Api {
                status,
                code,
                message,
            } => Self::from_api(status, code, message),
            other => Self::Backend(other),
        }
    }
}

impl AuthError {
    fn from_api(status: u16, code: Option<String>, message: String) -> Self {
        let code_str = code.as_deref().unwrap_or_default();
        let lower = message.to_lowercase();

        match status {
            400 | 401 if code_str == "email_not_confirmed" || lower.contains("email not confirmed") => {
                Self::EmailNotConfirmed
            }
            400 | 401 => Self::InvalidCredentials,
            422 if code_str == "weak_password" || lower.contains("password should") => {
                Self::WeakPassword(message)
            }
            422 if matches!(code_str, "user_already_exists" | "email_exists")
                || lower.contains("already registered") =>
            {
                Self::UserAlreadyExists
            }
            _ => Self::Backend(BackendError::Api {
                status,
                code,
                message,
            }),
        }
    }
}
