use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use sipfork_infra_common::{LogContext, Timer};
use tracing::{Instrument, Level, debug, info, warn};

use super::branch::{BranchListener, ForkStatus, PushBranch};
use super::{PushInfo, PushService};
use crate::config::ForkConfig;
use crate::error::Result;

#[derive(Default)]
struct Timers {
    repetition: Option<Timer>,
    ringing: Option<Timer>,
}

/// Sends push notifications for one branch.
///
/// Call notifications are repeated every `interval` until the branch
/// completes or is canceled. When the ringing timeout elapses first the
/// repetition stops and the fork is canceled. Nothing is sent once the
/// branch concluded.
pub struct RemotePushStrategy {
    service: Arc<dyn PushService>,
    branch: Weak<PushBranch>,
    branch_uid: String,
    interval: Duration,
    ringing_timeout: Duration,
    timers: Mutex<Timers>,
    concluded: AtomicBool,
    sent: AtomicUsize,
}

impl RemotePushStrategy {
    /// Create the strategy and subscribe it to `branch` events
    pub fn new(service: Arc<dyn PushService>, branch: &Arc<PushBranch>, interval: Duration, ringing_timeout: Duration) -> Arc<Self> {
        let strategy = Arc::new(Self {
            service,
            branch: Arc::downgrade(branch),
            branch_uid: branch.uid().to_string(),
            interval,
            ringing_timeout,
            timers: Mutex::new(Timers::default()),
            concluded: AtomicBool::new(false),
            sent: AtomicUsize::new(0),
        });
        let listener: Weak<dyn BranchListener> = Arc::downgrade(&strategy) as Weak<dyn BranchListener>;
        branch.set_listener(listener);
        strategy
    }

    pub fn from_config(service: Arc<dyn PushService>, branch: &Arc<PushBranch>, config: &ForkConfig) -> Arc<Self> {
        Self::new(service, branch, config.call_push_interval(), config.call_ringing_timeout())
    }

    pub fn push_repetition_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Notifications actually handed to the push service
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn is_concluded(&self) -> bool {
        self.concluded.load(Ordering::SeqCst)
    }

    /// Messages get a single notification
    pub async fn send_message_notification(&self, info: &PushInfo) -> Result<()> {
        self.send(info).await
    }

    /// Notify now, then keep notifying until the branch concludes or rings
    /// for too long.
    pub async fn send_call_notification(self: &Arc<Self>, info: PushInfo) -> Result<()> {
        let span = LogContext::with_operation("push", "call_notification")
            .with_field("call_id", info.call_id.as_str())
            .with_field("branch", self.branch_uid.as_str())
            .span(Level::DEBUG);
        let result = self.send(&info).instrument(span).await;

        let mut timers = self.timers.lock();
        if self.is_concluded() {
            return result;
        }
        if self.push_repetition_enabled() {
            let weak = Arc::downgrade(self);
            timers.repetition = Some(Timer::repeating(
                format!("push-repeat-{}", self.branch_uid),
                self.interval,
                move || {
                    let weak = weak.clone();
                    let info = info.clone();
                    async move {
                        if let Some(strategy) = weak.upgrade() {
                            // failures are logged; the next tick retries
                            let _ = strategy.send(&info).await;
                        }
                    }
                },
            ));
        }

        let weak = Arc::downgrade(self);
        timers.ringing = Some(Timer::one_shot(
            format!("push-ringing-{}", self.branch_uid),
            self.ringing_timeout,
            move || async move {
                if let Some(strategy) = weak.upgrade() {
                    strategy.on_ringing_timeout();
                }
            },
        ));
        result
    }

    async fn send(&self, info: &PushInfo) -> Result<()> {
        {
            // decided under the lock `stop` takes, so nothing starts after it
            let _timers = self.timers.lock();
            if self.is_concluded() {
                debug!("Branch {} concluded, push for {} not sent", self.branch_uid, info.call_id);
                return Ok(());
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
        }
        match self.service.send_push(info).await {
            Ok(()) => {
                debug!("Push {:?} sent to {} for {}", info.push_type, info.destination, info.call_id);
                Ok(())
            }
            Err(e) => {
                warn!("Push to {} for {} failed: {}", info.destination, info.call_id, e);
                Err(e)
            }
        }
    }

    fn on_ringing_timeout(&self) {
        if !self.stop() {
            return;
        }
        info!("Branch {} rang for {:?} without answer, canceling fork", self.branch_uid, self.ringing_timeout);
        if let Some(branch) = self.branch.upgrade() {
            branch.cancel_fork();
        }
    }

    /// Stop sending. Returns false when already stopped.
    fn stop(&self) -> bool {
        let mut timers = self.timers.lock();
        if self.concluded.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(timer) = timers.repetition.take() {
            timer.cancel();
        }
        if let Some(timer) = timers.ringing.take() {
            timer.cancel();
        }
        true
    }
}

impl BranchListener for RemotePushStrategy {
    fn on_branch_canceled(&self, reason: ForkStatus) {
        debug!("Branch {} canceled ({:?}), stopping push", self.branch_uid, reason);
        self.stop();
    }

    fn on_branch_completed(&self) {
        debug!("Branch {} completed, stopping push", self.branch_uid);
        self.stop();
    }
}
