use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::types::{Error, Result};

/// Task priority, used to pick abort order when a shutdown times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    /// Must complete even during shutdown (un-registration, final saves)
    Critical,
    High,
    Normal,
    /// Can be dropped early during shutdown
    Low,
}

/// Handle to a tracked task
#[derive(Debug)]
pub struct TaskHandle {
    id: usize,
    name: String,
    handle: JoinHandle<()>,
    priority: TaskPriority,
    started_at: Instant,
}

impl TaskHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn runtime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Tracks the async tasks spawned by one component.
///
/// Every tracked task races its future against the tracker's cancellation
/// token, so [`TaskTracker::shutdown`] can stop everything and fall back to
/// aborting when a task ignores cancellation for longer than the timeout.
pub struct TaskTracker {
    next_task_id: AtomicUsize,
    tasks: Mutex<Vec<TaskHandle>>,
    cancel_token: CancellationToken,
    active_count: Arc<AtomicUsize>,
    name: String,
    max_tasks: usize,
    shutdown_timeout: Duration,
}

impl TaskTracker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, 10_000, Duration::from_secs(5))
    }

    pub fn with_config(name: impl Into<String>, max_tasks: usize, shutdown_timeout: Duration) -> Self {
        Self {
            next_task_id: AtomicUsize::new(0),
            tasks: Mutex::new(Vec::new()),
            cancel_token: CancellationToken::new(),
            active_count: Arc::new(AtomicUsize::new(0)),
            name: name.into(),
            max_tasks,
            shutdown_timeout,
        }
    }

    /// Token that is canceled when the tracker shuts down
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Spawn a tracked task
    pub async fn spawn<F>(&self, name: impl Into<String>, priority: TaskPriority, future: F) -> Result<usize>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task_name = name.into();
        let active = self.active_count.load(Ordering::SeqCst);
        if active >= self.max_tasks {
            return Err(Error::TaskLimit {
                tracker: self.name.clone(),
                active,
            });
        }

        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let cancel_token = self.cancel_token.clone();
        let active_count = self.active_count.clone();
        let tracker_name = self.name.clone();
        let logged_name = task_name.clone();

        // counted before spawning so callers observe the task immediately
        let guard = ActiveGuard::new(active_count);
        let wrapped = async move {
            let _guard = guard;
            debug!("Task started: {} [{}] in {}", logged_name, task_id, tracker_name);
            tokio::select! {
                _ = future => {
                    debug!("Task completed: {} [{}] in {}", logged_name, task_id, tracker_name);
                }
                _ = cancel_token.cancelled() => {
                    debug!("Task cancelled: {} [{}] in {}", logged_name, task_id, tracker_name);
                }
            }
        };

        let handle = tokio::spawn(wrapped);
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(TaskHandle {
            id: task_id,
            name: task_name,
            handle,
            priority,
            started_at: Instant::now(),
        });

        Ok(task_id)
    }

    pub fn active_task_count(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait (up to `timeout`) until every tracked task has finished on its own
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.active_count.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    pub fn cancel_all(&self) {
        debug!("Cancelling all tasks in {}", self.name);
        self.cancel_token.cancel();
    }

    /// Cancel everything, then abort whatever is still running after the timeout
    pub async fn shutdown(&self) {
        let start = Instant::now();
        self.cancel_all();

        if self.wait_idle(self.shutdown_timeout).await {
            debug!("{} shutdown completed gracefully in {:?}", self.name, start.elapsed());
        } else {
            warn!(
                "{} shutdown timed out after {:?}, forcing abort",
                self.name, self.shutdown_timeout
            );
            let mut tasks = self.tasks.lock().await;
            tasks.sort_by(|a, b| b.priority.cmp(&a.priority));
            for task in tasks.iter().filter(|t| !t.is_finished()) {
                warn!("Force aborting task: {} [{}] after {:?}", task.name, task.id, task.runtime());
                task.abort();
            }
        }

        self.tasks.lock().await.clear();
    }

    pub async fn stats(&self) -> TaskStats {
        let tasks = self.tasks.lock().await;
        TaskStats {
            name: self.name.clone(),
            tracked_tasks: tasks.len(),
            active_tasks: self.active_count.load(Ordering::SeqCst),
            finished_tasks: tasks.iter().filter(|t| t.is_finished()).count(),
        }
    }
}

/// Keeps the active counter right even when a task is aborted mid-flight
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct TaskStats {
    pub name: String,
    pub tracked_tasks: usize,
    pub active_tasks: usize,
    pub finished_tasks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawned_task_is_tracked_until_done() {
        let tracker = TaskTracker::new("test");
        let id = tracker
            .spawn("short", TaskPriority::Normal, async {
                tokio::time::sleep(Duration::from_millis(10)).await;
            })
            .await
            .unwrap();

        assert_eq!(id, 0);
        assert_eq!(tracker.active_task_count(), 1);
        assert!(tracker.wait_idle(Duration::from_secs(1)).await);
        assert_eq!(tracker.active_task_count(), 0);
    }

    #[tokio::test]
    async fn cancel_all_stops_long_tasks() {
        let tracker = TaskTracker::new("test");
        tracker
            .spawn("long", TaskPriority::Normal, async {
                tokio::time::sleep(Duration::from_secs(10)).await;
            })
            .await
            .unwrap();

        tracker.cancel_all();
        assert!(tracker.wait_idle(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn task_limit_is_enforced() {
        let tracker = TaskTracker::with_config("tiny", 1, Duration::from_millis(50));
        tracker
            .spawn("first", TaskPriority::Low, std::future::pending::<()>())
            .await
            .unwrap();
        let err = tracker
            .spawn("second", TaskPriority::Low, std::future::pending::<()>())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TaskLimit { active: 1, .. }));
        tracker.shutdown().await;
        assert_eq!(tracker.active_task_count(), 0);
    }
}
