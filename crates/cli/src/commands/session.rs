//! Session inspection and the long-running refresh loop.

use tracing::{error, info};

use cloud_kitchen_storefront::Storefront;
use cloud_kitchen_storefront::identity::{AuthError, IdentityState};

/// Print the session summary.
#[allow(clippy::print_stdout)]
pub fn info(storefront: &Storefront) {
    match storefront.sessions().info() {
        Some(info) => println!("{info}"),
        None => println!("No active session."),
    }
}

/// Refresh the access token now.
#[allow(clippy::print_stdout)]
pub async fn refresh(storefront: &Storefront) -> Result<(), AuthError> {
    let session = storefront.sessions().refresh().await?;
    println!("Session refreshed, expires at {}", session.expires_at());
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_state(state: &IdentityState) {
    match state {
        IdentityState::Authenticated(profile) => {
            println!("authenticated: {} ({})", profile.email, profile.role);
        }
        IdentityState::Guest(info) => println!("guest: {}", info.email()),
        IdentityState::Anonymous | IdentityState::Loading => println!("{}", state.label()),
    }
}

/// Print identity changes while the background refresh keeps the session
/// alive, until Ctrl+C or SIGTERM.
pub async fn watch(storefront: &Storefront) {
    let mut changes = storefront.identity().subscribe();
    print_state(&changes.borrow_and_update());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            () = &mut shutdown => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = changes.borrow_and_update().clone();
                print_state(&state);
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, stopping");
}
