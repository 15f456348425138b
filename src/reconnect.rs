use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tracing::{info, warn};

/// Auto-reconnect behavior after an unexpected link drop
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Whether the disconnect monitor arms the reconnect loop at all
    pub enabled: bool,
    /// Total connect attempts before giving up
    pub max_attempts: u32,
    /// Constant wait before each attempt, in milliseconds. No backoff; the
    /// device needs a fixed settling window after a drop, nothing more.
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            delay_ms: 2_000,
        }
    }
}

/// Progress of the in-flight reconnect attempt sequence. At most one of
/// these is live per session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectState {
    /// Whether the loop is currently running
    pub is_reconnecting: bool,
    /// Attempt counter, 1-based once the loop starts
    pub attempt: u32,
}

/// How a reconnect sequence ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// The connect sequence succeeded on this attempt
    Reconnected {
        /// 1-based attempt number that succeeded
        attempt: u32,
    },
    /// Every attempt failed
    Exhausted {
        /// Number of attempts made
        attempts: u32,
    },
    /// The session was disposed while the loop was waiting
    Cancelled,
}

/// Shared cancel flag checked at the top of every loop iteration. Session
/// disposal raises it; the loop observes it at the next check rather than
/// being preempted.
#[derive(Debug, Clone, Default)]
pub struct CancelGuard(Arc<AtomicBool>);

impl CancelGuard {
    /// Create a fresh, unraised guard
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag; the loop stops at its next check
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the flag has been raised
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run the bounded-retry reconnect loop.
///
/// Each iteration waits the configured constant delay, then re-runs the full
/// connect sequence via `connect_fn`. `on_reconnecting(attempt, max)` fires
/// before each wait; `on_reconnect_failed()` fires exactly once if every
/// attempt fails. A successful attempt is a fresh connect, not a resume.
pub async fn run_reconnect<C, Fut>(
    config: &ReconnectConfig,
    guard: &CancelGuard,
    mut on_reconnecting: impl FnMut(u32, u32),
    on_reconnect_failed: impl FnOnce(),
    mut connect_fn: C,
) -> ReconnectOutcome
where
    C: FnMut() -> Fut,
    Fut: Future<Output = crate::error::Result<()>>,
{
    let mut attempt = 0;

    while attempt < config.max_attempts {
        if guard.is_cancelled() {
            info!("Reconnect cancelled after {attempt} attempt(s)");
            return ReconnectOutcome::Cancelled;
        }

        attempt += 1;
        on_reconnecting(attempt, config.max_attempts);

        tokio::time::sleep(Duration::from_millis(config.delay_ms)).await;

        if guard.is_cancelled() {
            info!("Reconnect cancelled after {attempt} attempt(s)");
            return ReconnectOutcome::Cancelled;
        }

        match connect_fn().await {
            Ok(()) => {
                info!("Reconnected on attempt {attempt}/{}", config.max_attempts);
                return ReconnectOutcome::Reconnected { attempt };
            }
            Err(e) => {
                warn!(
                    "Reconnect attempt {attempt}/{} failed: {e}",
                    config.max_attempts
                );
            }
        }
    }

    warn!("Reconnect exhausted after {attempt} attempt(s)");
    on_reconnect_failed();
    ReconnectOutcome::Exhausted { attempts: attempt }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrainerError;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    fn test_config() -> ReconnectConfig {
        ReconnectConfig {
            enabled: true,
            max_attempts: 3,
            delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_success_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let notified = Mutex::new(Vec::new());
        let failed = AtomicU32::new(0);

        let outcome = run_reconnect(
            &test_config(),
            &CancelGuard::new(),
            |attempt, max| notified.lock().unwrap().push((attempt, max)),
            || {
                failed.fetch_add(1, Ordering::SeqCst);
            },
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(TrainerError::ConnectionFailed("still down".to_string()))
                    } else {
                        Ok(())
                    }
                }
            },
        )
        .await;

        assert_eq!(outcome, ReconnectOutcome::Reconnected { attempt: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*notified.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(failed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let calls = AtomicU32::new(0);
        let notifications = AtomicU32::new(0);
        let failed = AtomicU32::new(0);

        let outcome = run_reconnect(
            &test_config(),
            &CancelGuard::new(),
            |_, _| {
                notifications.fetch_add(1, Ordering::SeqCst);
            },
            || {
                failed.fetch_add(1, Ordering::SeqCst);
            },
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TrainerError::ConnectionFailed("still down".to_string())) }
            },
        )
        .await;

        assert_eq!(outcome, ReconnectOutcome::Exhausted { attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(notifications.load(Ordering::SeqCst), 3);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_loop_before_next_attempt() {
        let guard = CancelGuard::new();
        let calls = AtomicU32::new(0);
        let guard_for_connect = guard.clone();

        let outcome = run_reconnect(
            &test_config(),
            &guard,
            |_, _| {},
            || {},
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                // Simulate disposal arriving while an attempt is in flight.
                guard_for_connect.cancel();
                async { Err(TrainerError::ConnectionFailed("dropped".to_string())) }
            },
        )
        .await;

        assert_eq!(outcome, ReconnectOutcome::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_immediate_success() {
        let outcome = run_reconnect(
            &test_config(),
            &CancelGuard::new(),
            |_, _| {},
            || panic!("must not fire on success"),
            || async { Ok(()) },
        )
        .await;
        assert_eq!(outcome, ReconnectOutcome::Reconnected { attempt: 1 });
    }
}
