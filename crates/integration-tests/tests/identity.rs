//! Integration tests for identity modes and transitions.
//!
//! Every test runs the full service stack against the in-memory backend.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use secrecy::SecretString;

use cloud_kitchen_core::Role;
use cloud_kitchen_integration_tests::{
    FakeBackend, PASSWORD, count, memory_store, storefront,
};
use cloud_kitchen_storefront::backend::UserMetadata;
use cloud_kitchen_storefront::identity::{
    AuthError, IdentityContext, IdentityState, SignUpOutcome, SignUpRequest,
};
use cloud_kitchen_storefront::profile::ProfileResolver;
use cloud_kitchen_storefront::session::SessionStore;
use cloud_kitchen_storefront::storage::{GUEST_PROFILE_KEY, SESSION_KEY};

fn password() -> SecretString {
    SecretString::from(PASSWORD)
}

// =============================================================================
// Startup
// =============================================================================

#[tokio::test]
async fn test_startup_without_session_or_guest_is_anonymous() {
    let backend = FakeBackend::new();
    let app = storefront(&backend, memory_store()).await;

    assert_eq!(app.identity().wait_ready().await, IdentityState::Anonymous);
}

#[tokio::test]
async fn test_guest_survives_restart() {
    let backend = FakeBackend::new();
    let store = memory_store();

    let first = storefront(&backend, store.clone()).await;
    first
        .identity()
        .continue_as_guest("Jane", "+15551234567", "jane@x.com")
        .await
        .unwrap();
    first.teardown().await;

    let second = storefront(&backend, store).await;
    let state = second.identity().wait_ready().await;
    assert_eq!(state.guest().unwrap().email().as_str(), "jane@x.com");
}

#[tokio::test]
async fn test_session_survives_restart() {
    let backend = FakeBackend::new();
    let id = backend.add_user_with_role("owner@x.com", "Olive Owner", Role::RestaurantOwner);
    let store = memory_store();

    let first = storefront(&backend, store.clone()).await;
    first
        .identity()
        .sign_in("owner@x.com", &password())
        .await
        .unwrap();
    first.teardown().await;

    let second = storefront(&backend, store).await;
    let state = second.identity().wait_ready().await;
    assert_eq!(state.profile().unwrap().id, id);
}

#[tokio::test]
async fn test_restored_session_without_profile_is_signed_out() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("owner@x.com", "Olive Owner", Role::RestaurantOwner);
    let store = memory_store();

    let first = storefront(&backend, store.clone()).await;
    first
        .identity()
        .sign_in("owner@x.com", &password())
        .await
        .unwrap();
    first.teardown().await;
    backend.fail_profile_fetches(true);

    let second = storefront(&backend, store.clone()).await;

    assert_eq!(second.identity().wait_ready().await, IdentityState::Anonymous);
    assert!(second.sessions().current().is_none());
    assert!(!store.contains(SESSION_KEY));

    // Anonymous really is anonymous: guest mode is open
    second
        .identity()
        .continue_as_guest("Jane", "+15551234567", "jane@x.com")
        .await
        .unwrap();
    assert!(second.identity_state().guest().is_some());
}

// =============================================================================
// Guest Mode
// =============================================================================

#[tokio::test]
async fn test_continue_as_guest_enters_guest_mode_without_profile() {
    let backend = FakeBackend::new();
    let store = memory_store();
    let app = storefront(&backend, store.clone()).await;

    let info = app
        .identity()
        .continue_as_guest("Jane", "+15551234567", "jane@x.com")
        .await
        .unwrap();

    let state = app.identity_state();
    assert_eq!(state.guest(), Some(&info));
    assert!(state.profile().is_none());
    assert!(store.contains(GUEST_PROFILE_KEY));
}

#[tokio::test]
async fn test_invalid_guest_details_are_rejected() {
    let backend = FakeBackend::new();
    let store = memory_store();
    let app = storefront(&backend, store.clone()).await;

    let result = app
        .identity()
        .continue_as_guest("Jane", "555", "jane@x.com")
        .await;

    assert!(matches!(result, Err(AuthError::InvalidGuestInfo(_))));
    assert_eq!(app.identity_state(), IdentityState::Anonymous);
    assert!(!store.contains(GUEST_PROFILE_KEY));
}

#[tokio::test]
async fn test_guest_refused_while_signed_in() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let app = storefront(&backend, memory_store()).await;
    app.identity().sign_in("c@x.com", &password()).await.unwrap();

    let result = app
        .identity()
        .continue_as_guest("Jane", "+15551234567", "jane@x.com")
        .await;

    assert!(matches!(result, Err(AuthError::AlreadyAuthenticated)));
    assert!(app.identity_state().profile().is_some());
}

#[tokio::test]
async fn test_sign_in_discards_guest() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let store = memory_store();
    let app = storefront(&backend, store.clone()).await;
    app.identity()
        .continue_as_guest("Jane", "+15551234567", "jane@x.com")
        .await
        .unwrap();

    let profile = app.identity().sign_in("c@x.com", &password()).await.unwrap();

    let state = app.identity_state();
    assert_eq!(state.profile(), Some(&profile));
    assert!(state.guest().is_none());
    assert!(!store.contains(GUEST_PROFILE_KEY));
}

// =============================================================================
// Sign-out
// =============================================================================

#[tokio::test]
async fn test_sign_out_from_authenticated_clears_session() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let store = memory_store();
    let app = storefront(&backend, store.clone()).await;
    app.identity().sign_in("c@x.com", &password()).await.unwrap();
    assert!(store.contains(SESSION_KEY));

    app.identity().sign_out().await;

    assert_eq!(app.identity_state(), IdentityState::Anonymous);
    assert!(app.sessions().current().is_none());
    assert!(!store.contains(SESSION_KEY));
    assert_eq!(count(&backend.calls().sign_out), 1);
}

#[tokio::test]
async fn test_sign_out_from_guest_clears_guest_storage() {
    let backend = FakeBackend::new();
    let store = memory_store();
    let app = storefront(&backend, store.clone()).await;
    app.identity()
        .continue_as_guest("Jane", "+15551234567", "jane@x.com")
        .await
        .unwrap();

    app.identity().sign_out().await;

    assert_eq!(app.identity_state(), IdentityState::Anonymous);
    assert!(!store.contains(GUEST_PROFILE_KEY));
}

#[tokio::test]
async fn test_late_sign_out_event_does_not_undo_new_sign_in() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("a@x.com", "Alex Able", Role::Customer);
    let b = backend.add_user_with_role("b@x.com", "Blair Baker", Role::Customer);
    let app = storefront(&backend, memory_store()).await;

    app.identity().sign_in("a@x.com", &password()).await.unwrap();
    app.identity().sign_out().await;
    app.identity().sign_in("b@x.com", &password()).await.unwrap();

    // Let the listener drain the queued events
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(app.identity_state().profile().unwrap().id, b);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_drops_in_flight_profile_resolution() {
    let backend = FakeBackend::with_latency(Duration::from_millis(50));
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let app = storefront(&backend, memory_store()).await;

    let identity = app.identity().clone();
    let sign_in = tokio::spawn(async move { identity.sign_in("c@x.com", &password()).await });

    // Profile lookup is now in flight
    tokio::time::sleep(Duration::from_millis(10)).await;
    app.identity().teardown();

    let result = sign_in.await.unwrap();
    assert!(matches!(result, Err(AuthError::ProfileUnavailable)));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(app.identity_state(), IdentityState::Anonymous);
}

#[tokio::test(start_paused = true)]
async fn test_session_event_during_startup_wins() {
    let backend = FakeBackend::with_latency(Duration::from_millis(50));
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let store = memory_store();

    let first = storefront(&backend, store.clone()).await;
    first.identity().sign_in("c@x.com", &password()).await.unwrap();
    first.teardown().await;

    let sessions = SessionStore::new(backend.clone(), store.clone());
    let identity = IdentityContext::new(
        sessions.clone(),
        ProfileResolver::new(backend.clone()),
        store.clone(),
        None,
    );
    let starting = identity.clone();
    let startup = tokio::spawn(async move { starting.initialize().await });

    // Startup is resolving the restored session's profile
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(identity.state().is_loading());
    sessions.sign_out().await;

    assert_eq!(startup.await.unwrap(), IdentityState::Anonymous);
    assert_eq!(identity.state(), IdentityState::Anonymous);
    assert!(!store.contains(SESSION_KEY));
}

// =============================================================================
// Sign-in & Sign-up
// =============================================================================

#[tokio::test]
async fn test_wrong_password_is_invalid_credentials() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let app = storefront(&backend, memory_store()).await;

    let result = app
        .identity()
        .sign_in("c@x.com", &SecretString::from("Wrong123"))
        .await;

    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    assert_eq!(app.identity_state(), IdentityState::Anonymous);
}

#[tokio::test]
async fn test_sign_up_with_immediate_session() {
    let backend = FakeBackend::new();
    let app = storefront(&backend, memory_store()).await;

    let outcome = app
        .identity()
        .sign_up(&SignUpRequest {
            email: "new@x.com".to_string(),
            password: password(),
            full_name: "Nina New".to_string(),
            phone: Some("+15551234567".to_string()),
            role: Role::RestaurantOwner,
        })
        .await
        .unwrap();

    let SignUpOutcome::SignedIn(profile) = outcome else {
        panic!("expected an immediate session");
    };
    assert_eq!(profile.role, Role::RestaurantOwner);
    assert_eq!(profile.full_name.as_deref(), Some("Nina New"));
    assert_eq!(backend.profile(profile.id), Some(profile.clone()));
    assert_eq!(app.identity_state().profile(), Some(&profile));
}

#[tokio::test]
async fn test_sign_up_pending_verification_leaves_state() {
    let backend = FakeBackend::new();
    backend.require_confirmation(true);
    let app = storefront(&backend, memory_store()).await;

    let outcome = app
        .identity()
        .sign_up(&SignUpRequest {
            email: "new@x.com".to_string(),
            password: password(),
            full_name: "Nina New".to_string(),
            phone: None,
            role: Role::Customer,
        })
        .await
        .unwrap();

    assert!(matches!(outcome, SignUpOutcome::VerificationRequired { .. }));
    assert_eq!(app.identity_state(), IdentityState::Anonymous);

    let result = app.identity().sign_in("new@x.com", &password()).await;
    assert!(matches!(result, Err(AuthError::EmailNotConfirmed)));
}

#[tokio::test]
async fn test_sign_up_cannot_claim_admin() {
    let backend = FakeBackend::new();
    let app = storefront(&backend, memory_store()).await;

    let result = app
        .identity()
        .sign_up(&SignUpRequest {
            email: "new@x.com".to_string(),
            password: password(),
            full_name: "Nina New".to_string(),
            phone: None,
            role: Role::Admin,
        })
        .await;

    assert!(matches!(result, Err(AuthError::InvalidInput(_))));
}

#[tokio::test]
async fn test_sign_up_existing_email() {
    let backend = FakeBackend::new();
    backend.add_user("taken@x.com", UserMetadata::default());
    let app = storefront(&backend, memory_store()).await;

    let result = app
        .identity()
        .sign_up(&SignUpRequest {
            email: "taken@x.com".to_string(),
            password: password(),
            full_name: "Tara Taken".to_string(),
            phone: None,
            role: Role::Customer,
        })
        .await;

    assert!(matches!(result, Err(AuthError::UserAlreadyExists)));
}

#[tokio::test]
async fn test_reset_and_resend_reach_backend() {
    let backend = FakeBackend::new();
    let app = storefront(&backend, memory_store()).await;

    app.identity().reset_password("c@x.com").await.unwrap();
    app.identity().resend_verification("c@x.com").await.unwrap();
    assert!(matches!(
        app.identity().reset_password("not-an-email").await,
        Err(AuthError::InvalidEmail(_))
    ));

    assert_eq!(count(&backend.calls().emails_sent), 2);
}

// =============================================================================
// Admin Access
// =============================================================================

#[tokio::test]
async fn test_admin_sign_in_with_admin_role() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("ops@x.com", "Ola Ops", Role::Admin);
    let app = storefront(&backend, memory_store()).await;

    let profile = app
        .identity()
        .admin_sign_in("ops@x.com", &password())
        .await
        .unwrap();

    assert_eq!(profile.role, Role::Admin);
    assert!(app.identity().require_role(Role::Admin).is_ok());
}

#[tokio::test]
async fn test_admin_sign_in_rejects_other_roles() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("owner@x.com", "Olive Owner", Role::RestaurantOwner);
    let app = storefront(&backend, memory_store()).await;

    let result = app
        .identity()
        .admin_sign_in("owner@x.com", &password())
        .await;

    assert!(matches!(result, Err(AuthError::NotAuthorized)));
    assert_eq!(app.identity_state(), IdentityState::Anonymous);
    assert!(app.sessions().current().is_none());
}

#[tokio::test]
async fn test_admin_hint_in_metadata_grants_nothing() {
    let backend = FakeBackend::new();
    backend.add_user(
        "sneaky@x.com",
        UserMetadata {
            role: Some("admin".to_string()),
            ..UserMetadata::default()
        },
    );
    let app = storefront(&backend, memory_store()).await;

    let result = app
        .identity()
        .admin_sign_in("sneaky@x.com", &password())
        .await;

    assert!(matches!(result, Err(AuthError::NotAuthorized)));
}

// =============================================================================
// Rate Limiting
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sign_in_rate_limit_window() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let app = storefront(&backend, memory_store()).await;
    let wrong = SecretString::from("Wrong123");

    for _ in 0..5 {
        let result = app.identity().sign_in("c@x.com", &wrong).await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    // Sixth attempt fails fast, case-insensitively keyed
    let result = app.identity().sign_in("C@X.com", &password()).await;
    let Err(AuthError::RateLimited { retry_after }) = result else {
        panic!("expected rate limiting");
    };
    assert!(retry_after <= Duration::from_secs(15 * 60));
    assert_eq!(count(&backend.calls().sign_in), 5);

    tokio::time::advance(Duration::from_secs(15 * 60 + 1)).await;

    app.identity().sign_in("c@x.com", &password()).await.unwrap();
    assert_eq!(count(&backend.calls().sign_in), 6);
}

#[tokio::test(start_paused = true)]
async fn test_successful_sign_in_resets_limit() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let app = storefront(&backend, memory_store()).await;
    let wrong = SecretString::from("Wrong123");

    for _ in 0..4 {
        let _ = app.identity().sign_in("c@x.com", &wrong).await;
    }
    app.identity().sign_in("c@x.com", &password()).await.unwrap();
    app.identity().sign_out().await;

    for _ in 0..4 {
        let result = app.identity().sign_in("c@x.com", &wrong).await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }
}
