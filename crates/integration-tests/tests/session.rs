//! Integration tests for the session lifecycle and background refresh.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use chrono::TimeDelta;
use secrecy::SecretString;

use cloud_kitchen_core::{Email, Role};
use cloud_kitchen_integration_tests::{
    FakeBackend, PASSWORD, SlowStore, count, memory_store, storefront,
};
use cloud_kitchen_storefront::config::RefreshPolicy;
use cloud_kitchen_storefront::identity::{AuthError, IdentityState};
use cloud_kitchen_storefront::session::{SessionEvent, SessionStore, spawn_auto_refresh};
use cloud_kitchen_storefront::storage::SESSION_KEY;

fn policy() -> RefreshPolicy {
    RefreshPolicy {
        interval: Duration::from_secs(300),
        threshold: Duration::from_secs(600),
    }
}

#[tokio::test]
async fn test_refresh_without_session_is_not_signed_in() {
    let backend = FakeBackend::new();
    let app = storefront(&backend, memory_store()).await;

    let result = app.sessions().refresh().await;

    assert!(matches!(result, Err(AuthError::NotSignedIn)));
    assert_eq!(count(&backend.calls().refresh), 0);
}

#[tokio::test]
async fn test_rejected_refresh_signs_out() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let store = memory_store();
    let app = storefront(&backend, store.clone()).await;
    app.identity()
        .sign_in("c@x.com", &SecretString::from(PASSWORD))
        .await
        .unwrap();
    backend.reject_refresh(true);

    let result = app.sessions().refresh().await;

    assert!(matches!(result, Err(AuthError::SessionExpired)));
    assert!(app.sessions().current().is_none());
    assert!(!store.contains(SESSION_KEY));

    let mut state = app.identity().subscribe();
    tokio::time::timeout(
        Duration::from_secs(1),
        state.wait_for(|s| *s == IdentityState::Anonymous),
    )
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn test_refresh_emits_token_refreshed() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let app = storefront(&backend, memory_store()).await;
    app.identity()
        .sign_in("c@x.com", &SecretString::from(PASSWORD))
        .await
        .unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let subscription = app.sessions().on_session_change(move |event| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event.kind());
        }
    });

    let before = app.sessions().current().unwrap();
    let after = app.sessions().refresh().await.unwrap();

    assert_eq!(before.user_id(), after.user_id());
    assert!(after.expires_at() >= before.expires_at());
    let kind = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(kind, "token_refreshed");

    subscription.unsubscribe();
}

#[tokio::test]
async fn test_unsubscribed_handler_gets_nothing() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let app = storefront(&backend, memory_store()).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<SessionEvent>();
    let subscription = app.sessions().on_session_change(move |event| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event);
        }
    });
    drop(subscription);

    app.identity()
        .sign_in("c@x.com", &SecretString::from(PASSWORD))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(!matches!(received, Ok(Some(_))));
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_during_sign_in_write_stays_signed_out() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let store = SlowStore::new(Duration::from_millis(50));
    let sessions = SessionStore::new(backend.clone(), store.clone());

    let signing_in = sessions.clone();
    let sign_in = tokio::spawn(async move {
        let email = Email::parse("c@x.com").unwrap();
        signing_in
            .sign_in(&email, &SecretString::from(PASSWORD))
            .await
    });

    // The sign-in is still writing its session to storage
    tokio::time::sleep(Duration::from_millis(10)).await;
    sessions.sign_out().await;
    sign_in.await.unwrap().unwrap();

    assert!(sessions.current().is_none());
    assert!(!store.contains(SESSION_KEY));

    let restarted = SessionStore::new(backend.clone(), store.clone());
    assert!(restarted.get_session().await.is_none());
}

#[tokio::test]
async fn test_expired_persisted_session_is_refreshed_once() {
    let backend = FakeBackend::with_session_ttl(TimeDelta::seconds(-60));
    let id = backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let store = memory_store();

    let first = storefront(&backend, store.clone()).await;
    first
        .identity()
        .sign_in("c@x.com", &SecretString::from(PASSWORD))
        .await
        .unwrap();
    first.teardown().await;

    let second = storefront(&backend, store).await;
    let state = second.identity().wait_ready().await;

    assert_eq!(count(&backend.calls().refresh), 1);
    assert_eq!(state.profile().unwrap().id, id);
}

#[tokio::test]
async fn test_unrestorable_persisted_session_is_dropped() {
    let backend = FakeBackend::with_session_ttl(TimeDelta::seconds(-60));
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let store = memory_store();

    let first = storefront(&backend, store.clone()).await;
    first
        .identity()
        .sign_in("c@x.com", &SecretString::from(PASSWORD))
        .await
        .unwrap();
    first.teardown().await;
    backend.reject_refresh(true);

    let second = storefront(&backend, store.clone()).await;

    assert_eq!(second.identity().wait_ready().await, IdentityState::Anonymous);
    assert!(!store.contains(SESSION_KEY));
}

#[tokio::test(start_paused = true)]
async fn test_auto_refresh_runs_on_interval_until_stopped() {
    let backend = FakeBackend::with_session_ttl(TimeDelta::minutes(5));
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let app = storefront(&backend, memory_store()).await;
    app.identity()
        .sign_in("c@x.com", &SecretString::from(PASSWORD))
        .await
        .unwrap();

    let task = spawn_auto_refresh(app.sessions().clone(), policy());

    // First check runs immediately; five minutes left is under the threshold
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(count(&backend.calls().refresh), 1);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(count(&backend.calls().refresh), 2);

    task.stop().await;
    tokio::time::sleep(Duration::from_secs(900)).await;
    assert_eq!(count(&backend.calls().refresh), 2);
}

#[tokio::test(start_paused = true)]
async fn test_auto_refresh_skips_fresh_sessions() {
    let backend = FakeBackend::with_session_ttl(TimeDelta::hours(1));
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let app = storefront(&backend, memory_store()).await;
    app.identity()
        .sign_in("c@x.com", &SecretString::from(PASSWORD))
        .await
        .unwrap();

    let task = spawn_auto_refresh(app.sessions().clone(), policy());
    tokio::time::sleep(Duration::from_secs(301)).await;

    assert_eq!(count(&backend.calls().refresh), 0);
    drop(task);
}

#[tokio::test]
async fn test_session_info_masks_token() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let app = storefront(&backend, memory_store()).await;
    assert!(app.sessions().info().is_none());

    app.identity()
        .sign_in("c@x.com", &SecretString::from(PASSWORD))
        .await
        .unwrap();

    let info = app.sessions().info().unwrap();
    assert_eq!(info.email.as_deref(), Some("c@x.com"));
    assert!(info.token_preview.starts_with("..."));
    assert_eq!(info.token_preview.chars().count(), 11);
    assert!(info.expires_in_secs > 3000);
}
