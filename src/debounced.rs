//! A single-outstanding-timer helper shared by the keystore's auto-lock
//! timer and the manifest store's autosave debounce, per spec §4.2/§4.6:
//! "only one timer may be outstanding; reset cancels the prior one."

use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Holds at most one outstanding delayed task. Calling [`Debouncer::fire_after`]
/// again before the delay elapses aborts the pending task and starts a new one.
pub struct Debouncer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }

    /// Schedule `action` to run after `delay`, aborting any previously
    /// scheduled-but-not-yet-fired action.
    pub fn fire_after<F>(&self, delay: Duration, action: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut guard = self.handle.lock().unwrap();
        if let Some(prior) = guard.take() {
            prior.abort();
        }
        *guard = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        }));
    }

    /// Cancel any pending action without scheduling a new one.
    pub fn cancel(&self) {
        if let Some(prior) = self.handle.lock().unwrap().take() {
            prior.abort();
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn only_the_last_scheduled_action_fires() {
        let debouncer = Debouncer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let fired = fired.clone();
            debouncer.fire_after(Duration::from_millis(50), async move {
                fired.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_the_action_from_firing() {
        let debouncer = Debouncer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let moved = fired.clone();
        debouncer.fire_after(Duration::from_millis(50), async move {
            moved.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
