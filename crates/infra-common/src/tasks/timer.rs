use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A cancelable timer running on the tokio runtime.
///
/// Cancelling a timer that already fired (or was already canceled) is a
/// no-op. Dropping the timer cancels it. Must be created from within a
/// runtime context.
#[derive(Debug)]
pub struct Timer {
    name: String,
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl Timer {
    /// Run `callback` once after `delay`
    pub fn one_shot<F, Fut>(name: impl Into<String>, delay: Duration, callback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));

        let task_token = token.clone();
        let task_fired = fired.clone();
        let task_name = name.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => {
                    trace!("timer {} cancelled before firing", task_name);
                }
                _ = tokio::time::sleep(delay) => {
                    if !task_token.is_cancelled() {
                        task_fired.store(true, Ordering::SeqCst);
                        callback().await;
                    }
                }
            }
        });

        Self { name, token, fired }
    }

    /// Run `callback` every `period`, the first time one period from now
    pub fn repeating<F, Fut>(name: impl Into<String>, period: Duration, mut callback: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));

        let task_token = token.clone();
        let task_fired = fired.clone();
        let task_name = name.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        if task_token.is_cancelled() {
                            break;
                        }
                        task_fired.store(true, Ordering::SeqCst);
                        callback().await;
                    }
                }
            }
            trace!("repeating timer {} stopped", task_name);
        });

        Self { name, token, fired }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the callback ran at least once
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let timer = Timer::one_shot("once", Duration::from_secs(2), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(timer.has_fired());

        // cancel after firing is a no-op
        timer.cancel();
        timer.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_one_shot_never_fires() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let timer = Timer::one_shot("never", Duration::from_secs(2), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!timer.has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_timer_ticks_until_dropped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let timer = Timer::repeating("tick", Duration::from_secs(2), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        drop(timer);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
