//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type for front ends. [`AppError::capture`]
//! reports unexpected failures to Sentry, and [`AppError::user_message`] gives
//! text that is safe to show without leaking backend details.

use thiserror::Error;

use crate::backend::BackendError;
use crate::cart::CartConflict;
use crate::checkout::CheckoutError;
use crate::config::ConfigError;
use crate::identity::AuthError;
use crate::storage::StorageError;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Startup configuration is missing or invalid.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Authentication operation failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Order placement failed.
    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// An item from another restaurant was added without confirmation.
    #[error("Cart error: {0}")]
    Cart(#[from] CartConflict),

    /// Local persistence failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Backend call failed outside the identity or checkout flows.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl AppError {
    /// Whether this is a failure worth reporting rather than a user mistake.
    #[must_use]
    pub const fn is_unexpected(&self) -> bool {
        match self {
            Self::Config(_) | Self::Storage(_) | Self::Backend(_) => true,
            Self::Auth(err) => matches!(err, AuthError::Backend(_) | AuthError::ProfileUnavailable),
            Self::Checkout(err) => matches!(err, CheckoutError::OrderPlacement { .. }),
            Self::Cart(_) => false,
        }
    }

    /// Report unexpected errors to Sentry and log them.
    pub fn capture(&self) {
        if !self.is_unexpected() {
            return;
        }
        let event_id = sentry::capture_error(self);
        tracing::error!(
            error = %self,
            sentry_event_id = %event_id,
            "Operation failed"
        );
    }

    /// Text to show the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(_) => "The app is not configured correctly".to_string(),
            Self::Storage(_) => "Could not save data on this device".to_string(),
            Self::Backend(_) => "Service unavailable, please try again".to_string(),
            Self::Cart(_) => {
                "Your cart has items from another restaurant. Clear it to add this item."
                    .to_string()
            }
            Self::Auth(err) => auth_message(err),
            Self::Checkout(err) => checkout_message(err),
        }
    }
}

fn auth_message(err: &AuthError) -> String {
    match err {
        AuthError::InvalidEmail(_) => "Invalid email address".to_string(),
        AuthError::InvalidPhone(e) => capitalize(&e.to_string()),
        AuthError::InvalidInput(e) => capitalize(&e.to_string()),
        AuthError::InvalidGuestInfo(e) => capitalize(&e.to_string()),
        AuthError::InvalidCredentials => "Invalid email or password".to_string(),
        AuthError::EmailNotConfirmed => {
            "Please confirm your email address before signing in".to_string()
        }
        AuthError::UserAlreadyExists => "An account with this email already exists".to_string(),
        AuthError::WeakPassword(msg) => msg.clone(),
        AuthError::RateLimited { retry_after } => format!(
            "Too many attempts, please try again in {} minutes",
            retry_after.as_secs().div_ceil(60)
        ),
        AuthError::UpstreamRateLimited(_) => "Too many requests, please wait a moment".to_string(),
        AuthError::SessionExpired => "Your session has expired, please sign in again".to_string(),
        AuthError::NotSignedIn => "Please sign in first".to_string(),
        AuthError::AlreadyAuthenticated => "You are already signed in".to_string(),
        AuthError::NotAuthorized => "Access denied".to_string(),
        AuthError::ProfileUnavailable | AuthError::Backend(_) => {
            "Authentication error, please try again".to_string()
        }
    }
}

fn checkout_message(err: &CheckoutError) -> String {
    match err {
        CheckoutError::NotSignedIn => "Sign in or continue as a guest to order".to_string(),
        CheckoutError::GuestCheckoutDisabled => "Please sign in to place an order".to_string(),
        CheckoutError::EmptyCart => "Your cart is empty".to_string(),
        CheckoutError::InvalidPhone(e) => capitalize(&e.to_string()),
        CheckoutError::Invalid(e) => capitalize(&e.to_string()),
        CheckoutError::OrderPlacement { .. } => {
            "Failed to place order, please try again".to_string()
        }
    }
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on sign-out to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of user actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("checkout", "Order placed", Some(&[("order_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cloud_kitchen_core::MerchantId;

    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config(ConfigError::MissingEnvVar("SUPABASE_URL".to_string()));
        assert!(err.to_string().starts_with("Config error:"));

        let err = AppError::Auth(AuthError::InvalidCredentials);
        assert_eq!(err.to_string(), "Auth error: invalid credentials");
    }

    #[test]
    fn test_user_message_hides_backend_details() {
        let backend = BackendError::Api {
            status: 500,
            code: Some("XX000".to_string()),
            message: "relation \"profiles\" does not exist".to_string(),
        };
        let message = AppError::Auth(AuthError::Backend(backend)).user_message();
        assert!(!message.contains("profiles"));

        let err = AppError::Checkout(CheckoutError::OrderPlacement {
            order_id: None,
            source: BackendError::RateLimited(30),
        });
        assert_eq!(err.user_message(), "Failed to place order, please try again");
    }

    #[test]
    fn test_rate_limit_message_rounds_up_minutes() {
        let err = AppError::Auth(AuthError::RateLimited {
            retry_after: Duration::from_secs(61),
        });
        assert_eq!(
            err.user_message(),
            "Too many attempts, please try again in 2 minutes"
        );
    }

    #[test]
    fn test_user_mistakes_are_not_reported() {
        let conflict = CartConflict {
            current: MerchantId::random(),
            requested: MerchantId::random(),
        };
        assert!(!AppError::Cart(conflict).is_unexpected());
        assert!(!AppError::Auth(AuthError::InvalidCredentials).is_unexpected());
        assert!(AppError::Backend(BackendError::RateLimited(1)).is_unexpected());
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("phone number is required"), "Phone number is required");
        assert_eq!(capitalize(""), "");
    }
}
