//! Admission control and graceful shutdown for gRPC calls.
//!
//! Every call holds a [`CallGuard`] for as long as it runs. Shutdown stops
//! admitting new calls, waits for the guards to drop, and cancels whatever is
//! still running once the drain timeout expires.

use core::time::Duration;
use logstream_core::{Error, Result};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct Lifecycle {
    accepting: AtomicBool,
    inflight: AtomicUsize,
    shutdown_token: CancellationToken,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            accepting: AtomicBool::new(true),
            inflight: AtomicUsize::new(0),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Admits a call.
    ///
    /// The returned guard carries the call's cancellation token, a child of
    /// the shutdown token.
    ///
    /// # Errors
    ///
    /// [`Error::ServiceShutdown`] once shutdown has begun.
    pub fn begin(self: &Arc<Self>) -> Result<CallGuard> {
        // Count first so a concurrent drain never observes zero while this
        // call is being admitted.
        self.inflight.fetch_add(1, Ordering::SeqCst);
        if !self.accepting.load(Ordering::SeqCst) {
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::ServiceShutdown);
        }

        Ok(CallGuard {
            lifecycle: Arc::clone(self),
            token: self.shutdown_token.child_token(),
        })
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    /// Shuts down in three phases:
    ///
    /// 1. Refuse new calls with `UNAVAILABLE`.
    /// 2. Wait up to `drain_timeout` for in-flight calls to finish.
    /// 3. Cancel every remaining call; streams end with `CANCELLED`.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        tracing::info!("Refusing new requests");
        self.accepting.store(false, Ordering::SeqCst);

        tracing::info!(inflight = self.inflight(), "Draining in-flight calls");
        let drained = timeout(drain_timeout, async {
            while self.inflight() > 0 {
                sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::debug!("All in-flight calls drained"),
            Err(_) => tracing::warn!(
                inflight = self.inflight(),
                "Graceful drain timed out, cancelling remaining calls"
            ),
        }

        self.shutdown_token.cancel();
    }
}

/// Marks one admitted call. Dropping it releases the call's slot.
#[derive(Debug)]
pub struct CallGuard {
    lifecycle: Arc<Lifecycle>,
    token: CancellationToken,
}

impl CallGuard {
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.lifecycle.inflight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guards_track_inflight_calls() {
        let lifecycle = Arc::new(Lifecycle::new());
        let a = lifecycle.begin().unwrap();
        let b = lifecycle.begin().unwrap();
        assert_eq!(lifecycle.inflight(), 2);
        drop(a);
        drop(b);
        assert_eq!(lifecycle.inflight(), 0);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_calls() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.shutdown(Duration::from_millis(10)).await;
        assert!(matches!(lifecycle.begin(), Err(Error::ServiceShutdown)));
        assert_eq!(lifecycle.inflight(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_calls_that_outlive_the_drain() {
        let lifecycle = Arc::new(Lifecycle::new());
        let guard = lifecycle.begin().unwrap();
        assert!(!guard.token().is_cancelled());

        lifecycle.shutdown(Duration::from_millis(20)).await;
        assert!(guard.token().is_cancelled());
        assert_eq!(lifecycle.inflight(), 1);
    }

    #[tokio::test]
    async fn shutdown_waits_for_calls_to_finish() {
        let lifecycle = Arc::new(Lifecycle::new());
        let guard = lifecycle.begin().unwrap();
        let token = guard.token().clone();

        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            drop(guard);
        });

        lifecycle.shutdown(Duration::from_secs(5)).await;
        assert_eq!(lifecycle.inflight(), 0);
        // Drained calls are cancelled too, but nothing is left to observe it.
        assert!(token.is_cancelled());
    }
}
