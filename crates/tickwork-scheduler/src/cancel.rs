use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;

type Waiter = Box<dyn FnOnce() + Send>;

/// Cooperative cancellation signal handed to each execution.
///
/// Cheap to clone; every clone observes the same signal. Cancelling is
/// one-way and idempotent. A job checks it either by polling
/// [`check_cancellation`](Self::check_cancellation) between units of work or
/// by awaiting [`cancelled`](Self::cancelled) inside a `select!`.
#[derive(Clone, Default)]
pub struct CancellationScope {
    inner: Arc<ScopeInner>,
}

#[derive(Default)]
struct ScopeInner {
    token: CancellationToken,
    waiters: Mutex<Vec<Waiter>>,
}

impl CancellationScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation and run every registered waiter once.
    pub fn cancel(&self) {
        if self.inner.token.is_cancelled() {
            return;
        }
        self.inner.token.cancel();
        let waiters = {
            let mut guard = self.inner.waiters.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        for waiter in waiters {
            waiter();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// `Err(Cancelled)` once the scope is cancelled. Pair with `?` inside a job body.
    pub fn check_cancellation(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the scope is cancelled.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// A token that fires together with this scope, for APIs that take one.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Run `f` when the scope is cancelled. Runs immediately if it already is.
    pub fn on_cancel(&self, f: impl FnOnce() + Send + 'static) {
        let mut waiters = self.inner.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        if self.inner.token.is_cancelled() {
            drop(waiters);
            f();
        } else {
            waiters.push(Box::new(f));
        }
    }

    /// Drive `fut` to completion unless the scope is cancelled first.
    pub async fn run_until_cancelled<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        tokio::select! {
            biased;
            _ = self.inner.token.cancelled() => Err(Cancelled),
            out = fut => Ok(out),
        }
    }

    /// Sleep for `duration`, waking early with `Err(Cancelled)` on cancellation.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.run_until_cancelled(tokio::time::sleep(duration)).await
    }
}

impl std::fmt::Debug for CancellationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationScope")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cancel_is_idempotent_and_fires_waiters_once() {
        let scope = CancellationScope::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        scope.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(scope.check_cancellation().is_ok());
        scope.cancel();
        scope.cancel();

        assert!(scope.is_cancelled());
        assert_eq!(scope.check_cancellation(), Err(Cancelled));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_waiter_runs_immediately() {
        let scope = CancellationScope::new();
        scope.cancel();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        scope.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scope_stays_usable_after_a_waiter_panics() {
        let scope = CancellationScope::new();
        scope.on_cancel(|| panic!("waiter bug"));
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| scope.cancel()));
        assert!(outcome.is_err());
        assert!(scope.is_cancelled());

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        scope.on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_the_signal() {
        let scope = CancellationScope::new();
        let other = scope.clone();
        other.cancel();
        assert!(scope.is_cancelled());
        assert!(scope.token().is_cancelled());
    }

    #[tokio::test]
    async fn sleep_wakes_early_on_cancel() {
        let scope = CancellationScope::new();
        let canceller = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = scope.sleep(Duration::from_secs(30)).await;
        assert_eq!(outcome, Err(Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn run_until_cancelled_passes_output_through() {
        let scope = CancellationScope::new();
        assert_eq!(scope.run_until_cancelled(async { 7 }).await, Ok(7));
        scope.cancel();
        assert_eq!(scope.run_until_cancelled(async { 7 }).await, Err(Cancelled));
    }
}
