//! Background session refresh.

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::SessionStore;
use crate::config::RefreshPolicy;

/// Handle to the background refresh task.
///
/// The task stops on [`AutoRefresh::stop`] or when the handle is dropped.
#[derive(Debug)]
pub struct AutoRefresh {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl AutoRefresh {
    /// Stop the task and wait for it to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawn the refresh loop.
///
/// Every `policy.interval` the session's remaining lifetime is checked, and
/// the session is refreshed once it drops below `policy.threshold`. The first
/// check runs immediately. Failures are logged and the loop keeps going; a
/// rejected refresh token ends the session inside [`SessionStore::refresh`].
#[must_use]
pub fn spawn_auto_refresh(store: SessionStore, policy: RefreshPolicy) -> AutoRefresh {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(policy.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = policy.interval.as_secs(),
            threshold_secs = policy.threshold.as_secs(),
            "Session auto-refresh started"
        );

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            check_and_refresh(&store, policy).await;
        }

        debug!("Session auto-refresh stopped");
    });

    AutoRefresh {
        cancel,
        handle: Some(handle),
    }
}

async fn check_and_refresh(store: &SessionStore, policy: RefreshPolicy) {
    let Some(remaining) = store.time_until_expiry() else {
        return;
    };

    let threshold_secs = i64::try_from(policy.threshold.as_secs()).unwrap_or(i64::MAX);
    if remaining.num_seconds() >= threshold_secs {
        return;
    }

    debug!(remaining_secs = remaining.num_seconds(), "Session close to expiry");
    if let Err(e) = store.refresh().await {
        error!(error = %e, "Automatic session refresh failed");
    }
}
