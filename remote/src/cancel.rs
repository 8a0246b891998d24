//! Cancellable waits for polling and retry back-off.
//!
//! Poll intervals and retry delays sleep through a [`CancelToken`] instead of
//! `std::thread::sleep`, so a Ctrl-C handler (or a test) can abort a long
//! wait without waiting for it to elapse.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Error returned when a wait is interrupted by [`CancelToken::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Debug, Default)]
struct Flag {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Shared cancellation flag with interruptible sleeps.
///
/// Clones share the same flag; cancelling any clone wakes every sleeper.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use juno_remote::cancel::{CancelToken, Cancelled};
///
/// let token = CancelToken::new();
/// assert!(token.sleep(Duration::ZERO).is_ok());
///
/// token.cancel();
/// assert_eq!(token.sleep(Duration::from_secs(60)), Err(Cancelled));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<Flag>,
}

impl CancelToken {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the token and wakes every pending [`CancelToken::sleep`].
    pub fn cancel(&self) {
        let mut cancelled = self
            .flag
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.flag.wake.notify_all();
    }

    /// Returns `true` once [`CancelToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self
            .flag
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `Err(Cancelled)` if the token has been tripped.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] when the token is cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Blocks for `duration` unless the token is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the token is already cancelled or becomes
    /// cancelled before the duration elapses.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let deadline = Instant::now().checked_add(duration);
        let mut cancelled = self
            .flag
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        loop {
            if *cancelled {
                return Err(Cancelled);
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if remaining.is_zero() {
                return Ok(());
            }
            let (guard, _timeout) = self
                .flag
                .wake
                .wait_timeout(cancelled, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            cancelled = guard;
        }
    }
}
