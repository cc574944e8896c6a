use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use mailbell_core::SchedulerConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::{
    callbacks::{Notifier, SchedulerCallbacks},
    dispatch::{Dispatcher, SendOutcome},
    error::SchedulerError,
    mailer::Mailer,
    reminder,
    retry::RetryPolicy,
    snooze,
    store::MailStore,
    types::{JobKind, TickReport},
};

/// Background engine driving snooze restoration, scheduled sends and reminders.
///
/// Construct one per process at the composition root and share it by
/// reference. `start()` spawns the poll loop on the current Tokio runtime;
/// `stop()` (or dropping the engine) ends it after any in-flight tick.
pub struct SchedulerEngine {
    inner: Arc<EngineInner>,
    timer: Mutex<Option<TimerHandle>>,
}

struct TimerHandle {
    shutdown: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

struct EngineInner {
    store: MailStore,
    mailer: Arc<dyn Mailer>,
    callbacks: RwLock<Option<Arc<dyn SchedulerCallbacks>>>,
    config: SchedulerConfig,
    retry: RetryPolicy,
    /// Single-flight guard: held for the whole duration of a tick.
    tick_guard: tokio::sync::Mutex<()>,
    /// Set until the first tick has reset sends stranded in `sending`.
    recovery_pending: AtomicBool,
    /// Send outcomes whose storage write failed; retried on the next tick.
    unsettled_sends: Mutex<Vec<SendOutcome>>,
    completed_ticks: AtomicU64,
}

impl SchedulerEngine {
    pub fn new(store: MailStore, mailer: Arc<dyn Mailer>, config: SchedulerConfig) -> Self {
        let retry = RetryPolicy::new(config.max_retries);
        let recovery_pending = AtomicBool::new(config.recover_interrupted_sends);
        Self {
            inner: Arc::new(EngineInner {
                store,
                mailer,
                callbacks: RwLock::new(None),
                config,
                retry,
                tick_guard: tokio::sync::Mutex::new(()),
                recovery_pending,
                unsettled_sends: Mutex::new(Vec::new()),
                completed_ticks: AtomicU64::new(0),
            }),
            timer: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &MailStore {
        &self.inner.store
    }

    /// Register the host notification interface, replacing any previous one.
    pub fn set_callbacks(&self, callbacks: Arc<dyn SchedulerCallbacks>) {
        *self
            .inner
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callbacks);
    }

    pub fn clear_callbacks(&self) {
        *self
            .inner
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Start the poll loop. Returns `false` (and does nothing) if already running.
    ///
    /// The first tick fires after `initial_delay`, then every `poll_interval`.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() {
            debug!("scheduler already running, start ignored");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_timer(Arc::clone(&self.inner), shutdown_rx));
        *timer = Some(TimerHandle {
            shutdown: shutdown_tx,
            _task: task,
        });
        info!(
            poll_interval_secs = self.inner.config.poll_interval_secs,
            initial_delay_ms = self.inner.config.initial_delay_ms,
            "scheduler started"
        );
        true
    }

    /// Cancel future ticks. A tick already running completes normally.
    /// Returns `false` if the scheduler was not running.
    pub fn stop(&self) -> bool {
        let handle = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => {
                // Ignored error: the loop already exited.
                let _ = handle.shutdown.send(true);
                info!("scheduler stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Run one tick now, independent of the timer.
    ///
    /// Returns a skipped report if another tick is in progress.
    pub async fn tick(&self) -> TickReport {
        self.inner.run_tick().await
    }

    /// Number of ticks that ran to completion (skipped ticks excluded).
    pub fn completed_ticks(&self) -> u64 {
        self.inner.completed_ticks.load(Ordering::Relaxed)
    }
}

/// Timer loop: one tick per interval until `shutdown` flips or its sender drops.
async fn run_timer(inner: Arc<EngineInner>, mut shutdown: watch::Receiver<bool>) {
    let start = Instant::now() + inner.config.initial_delay();
    // interval_at panics on a zero period.
    let period = inner.config.poll_interval().max(Duration::from_secs(1));
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                // Own task: a panic inside a tick must not end the loop.
                let tick_inner = Arc::clone(&inner);
                if let Err(e) = tokio::spawn(async move { tick_inner.run_tick().await }).await {
                    error!("scheduler tick aborted: {e}");
                }
            }
        }
    }
    debug!("scheduler timer loop exited");
}

impl EngineInner {
    fn callbacks(&self) -> Option<Arc<dyn SchedulerCallbacks>> {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run the three job classes in fixed order, each behind its own error
    /// boundary.
    async fn run_tick(&self) -> TickReport {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            debug!("previous tick still running, skipping");
            return TickReport::skipped();
        };

        if self.recovery_pending.swap(false, Ordering::SeqCst) {
            match self.store.recover_interrupted_sends() {
                Ok(0) => {}
                Ok(n) => warn!(count = n, "interrupted scheduled sends returned to pending"),
                Err(e) => error!("interrupted-send recovery failed: {e}"),
            }
        }

        let notifier = Notifier::new(self.callbacks());
        let mut report = TickReport::default();

        match snooze::restore_due_snoozes(&self.store, &notifier, Utc::now()) {
            Ok(n) => report.snoozes_restored = n,
            Err(e) => job_failed(&mut report, JobKind::SnoozeRestore, &e),
        }

        let dispatcher = Dispatcher {
            store: &self.store,
            mailer: self.mailer.as_ref(),
            retry: self.retry,
            send_timeout: self.config.send_timeout(),
            notifier: &notifier,
            unsettled: &self.unsettled_sends,
        };
        match dispatcher.dispatch_due(Utc::now()).await {
            Ok(summary) => report.sends = summary,
            Err(e) => job_failed(&mut report, JobKind::ScheduledSend, &e),
        }

        match reminder::trigger_due_reminders(&self.store, &notifier, Utc::now()) {
            Ok(n) => report.reminders_triggered = n,
            Err(e) => job_failed(&mut report, JobKind::Reminder, &e),
        }

        self.completed_ticks.fetch_add(1, Ordering::Relaxed);
        if report.is_idle() {
            debug!("scheduler tick idle");
        } else {
            info!(
                snoozes = report.snoozes_restored,
                sent = report.sends.sent,
                retried = report.sends.retried,
                failed = report.sends.failed,
                reminders = report.reminders_triggered,
                "scheduler tick complete"
            );
        }
        report
    }
}

fn job_failed(report: &mut TickReport, job: JobKind, e: &SchedulerError) {
    error!(job = %job, "scheduler job failed: {e}");
    report.failed_jobs.push(job);
}
