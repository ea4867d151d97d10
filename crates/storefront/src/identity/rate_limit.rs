//! Per-identifier attempt throttling for sign-in and sign-up.
//!
//! A sliding-window log: each key keeps the instants of its allowed attempts
//! within the window. Keys are independent and can be reset individually, so
//! a successful sign-in clears that e-mail's history without touching others.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Sign-in attempts allowed per window.
const SIGN_IN_MAX_ATTEMPTS: usize = 5;
/// Sign-in window (15 minutes).
const SIGN_IN_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Sign-up attempts allowed per window.
const SIGN_UP_MAX_ATTEMPTS: usize = 3;
/// Sign-up window (1 hour).
const SIGN_UP_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Sliding-window attempt limiter keyed by identifier.
#[derive(Debug)]
pub struct RateLimiter {
    max_attempts: usize,
    window: Duration,
    attempts: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Allow `max_attempts` per key within any `window`.
    #[must_use]
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter for password sign-in (5 per 15 minutes).
    #[must_use]
    pub fn sign_in() -> Self {
        Self::new(SIGN_IN_MAX_ATTEMPTS, SIGN_IN_WINDOW)
    }

    /// Limiter for sign-up (3 per hour).
    #[must_use]
    pub fn sign_up() -> Self {
        Self::new(SIGN_UP_MAX_ATTEMPTS, SIGN_UP_WINDOW)
    }

    /// Record an attempt for `key` if one is allowed.
    ///
    /// # Errors
    ///
    /// Returns the time until the oldest attempt leaves the window when the
    /// key is at its limit. A rejected attempt is not recorded.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);

        // Expired attempts go first; keys left without any are dropped
        attempts.retain(|_, log| {
            while log
                .front()
                .is_some_and(|&oldest| now.duration_since(oldest) >= self.window)
            {
                log.pop_front();
            }
            !log.is_empty()
        });

        let log = attempts.entry(key.to_string()).or_default();
        if log.len() >= self.max_attempts {
            let retry_after = log
                .front()
                .map_or(self.window, |&oldest| {
                    self.window.saturating_sub(now.duration_since(oldest))
                });
            return Err(retry_after);
        }

        log.push_back(now);
        Ok(())
    }

    /// Number of keys with attempts still inside the window.
    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Forget all attempts for `key`.
    pub fn reset(&self, key: &str) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
