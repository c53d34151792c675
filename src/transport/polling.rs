//! Timed polling with backoff, rate limiting and pause/cooldown
//!
//! The transport runs a caller-supplied poll function on a recurring timer.
//! Each tick spawns an independent attempt; two guards keep attempts from
//! piling up:
//!
//! * the overlap guard skips a tick while another attempt is in flight, and
//! * the spacing guard skips a tick that comes less than
//!   [`MIN_POLL_SPACING`] after the previous attempt started.
//!
//! Failures stretch the interval through [`BackoffPolicy`]. Once the retry
//! budget is spent the schedule is dropped and a one-shot cooldown resets
//! the counters after [`PAUSE_COOLDOWN`]. Scheduling only resumes when the
//! owner calls [`PollingTransport::start`] again.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use super::{forward_status, EventSender, TransportEvent};
use crate::error::{Error, Result};
use crate::types::PollingHealth;

/// Minimum time between the starts of two attempts
pub const MIN_POLL_SPACING: Duration = Duration::from_millis(1000);

/// Pause length after the retry budget is exhausted
pub const PAUSE_COOLDOWN: Duration = Duration::from_secs(30);

/// A poll operation; the token is cancelled when the transport stops
pub type PollFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Snapshot of the scheduler's mutable state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingState {
    /// Current delay between scheduled attempts
    pub interval: Duration,
    pub consecutive_errors: u32,
    /// When the last attempt started
    pub last_poll_time: Option<Instant>,
    /// True while an attempt is in flight
    pub is_polling: bool,
}

#[derive(Default)]
struct Timers {
    /// Cancelled on stop; attempts observe it
    session: Option<CancellationToken>,
    poll_fn: Option<PollFn>,
    /// Recurring tick task
    schedule: Option<JoinHandle<()>>,
    /// One-shot reset after a pause
    cooldown: Option<JoinHandle<()>>,
    paused: bool,
}

struct Shared {
    policy: BackoffPolicy,
    state: Mutex<PollingState>,
    timers: Mutex<Timers>,
    foreground: AtomicBool,
    health: Option<EventSender>,
}

/// Recurring poll scheduler
pub struct PollingTransport {
    shared: Arc<Shared>,
}

impl PollingTransport {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::build(policy, None)
    }

    /// Create a transport that reports health changes into `health`
    pub fn with_health_sink(policy: BackoffPolicy, health: EventSender) -> Self {
        Self::build(policy, Some(health))
    }

    fn build(policy: BackoffPolicy, health: Option<EventSender>) -> Self {
        let state = PollingState {
            interval: policy.base_interval(),
            consecutive_errors: 0,
            last_poll_time: None,
            is_polling: false,
        };
        Self {
            shared: Arc::new(Shared {
                policy,
                state: Mutex::new(state),
                timers: Mutex::new(Timers::default()),
                foreground: AtomicBool::new(true),
                health,
            }),
        }
    }

    /// Start polling with `poll_fn`
    ///
    /// Any previous schedule is stopped first and a pending cooldown is
    /// cancelled, keeping the counters it would have reset. One attempt runs
    /// right away, then attempts recur at the current interval. Must be
    /// called within a Tokio runtime.
    pub fn start<F, Fut>(&self, poll_fn: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let poll_fn: PollFn = Arc::new(move |token| poll_fn(token).boxed());
        let shared = &self.shared;
        shared.halt(true);

        let token = CancellationToken::new();
        {
            let mut timers = shared.timers();
            timers.session = Some(token.clone());
            timers.poll_fn = Some(Arc::clone(&poll_fn));
        }
        shared.arm_schedule();
        tokio::spawn(Shared::attempt(Arc::clone(shared), poll_fn, token));

        let state = shared.snapshot();
        debug!(interval_ms = state.interval.as_millis() as u64, "polling started");
        shared.report(shared.health_for(&state));
    }

    /// Stop polling
    ///
    /// Cancels the schedule, the cooldown timer and any in-flight attempt.
    /// Idempotent; safe before `start`.
    pub fn stop(&self) {
        if self.shared.halt(true) {
            debug!("polling stopped");
            self.shared.report(PollingHealth::Idle);
        }
    }

    /// Adjust the cadence to host visibility
    ///
    /// Hidden: the interval is raised to at least the max interval.
    /// Visible: the interval returns to the base interval. A running
    /// schedule is restarted at the new interval immediately.
    pub fn set_active(&self, is_foreground: bool) {
        let shared = &self.shared;
        shared.foreground.store(is_foreground, Ordering::SeqCst);
        {
            let mut state = shared.state();
            state.interval = if is_foreground {
                shared.policy.base_interval()
            } else {
                state.interval.max(shared.policy.max_interval())
            };
            debug!(
                is_foreground,
                interval_ms = state.interval.as_millis() as u64,
                "polling visibility changed"
            );
        }
        shared.arm_schedule();
    }

    pub fn state(&self) -> PollingState {
        self.shared.snapshot()
    }

    pub fn current_interval(&self) -> Duration {
        self.shared.snapshot().interval
    }

    /// True while a schedule is armed
    pub fn is_running(&self) -> bool {
        let timers = self.shared.timers();
        timers.session.is_some() && !timers.paused
    }

    /// True between exhausting the retry budget and the next `start`/`stop`
    pub fn is_paused(&self) -> bool {
        self.shared.timers().paused
    }

    /// True if a recurring or cooldown timer is still pending
    pub fn has_pending_timers(&self) -> bool {
        let timers = self.shared.timers();
        let pending = |handle: &Option<JoinHandle<()>>| {
            handle.as_ref().is_some_and(|h| !h.is_finished())
        };
        pending(&timers.schedule) || pending(&timers.cooldown)
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.shared.policy
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        // Tasks hold the shared state alive; they must not outlive the owner
        self.shared.halt(true);
    }
}

/// Marks an attempt in flight; clears the flag on every exit path
struct InFlight(Arc<Shared>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.state().is_polling = false;
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, PollingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> PollingState {
        *self.state()
    }

    /// Interval used when counters return to baseline
    fn baseline_interval(&self) -> Duration {
        if self.foreground.load(Ordering::SeqCst) {
            self.policy.base_interval()
        } else {
            self.policy.max_interval()
        }
    }

    fn health_for(&self, state: &PollingState) -> PollingHealth {
        if state.consecutive_errors == 0 {
            PollingHealth::Active
        } else {
            PollingHealth::BackingOff {
                consecutive_errors: state.consecutive_errors,
                interval_ms: state.interval.as_millis() as u64,
            }
        }
    }

    fn report(&self, health: PollingHealth) {
        if let Some(tx) = &self.health {
            forward_status(tx, TransportEvent::Polling(health));
        }
    }

    /// Cancel session and schedule (and optionally the cooldown)
    ///
    /// Returns whether anything was running.
    fn halt(&self, include_cooldown: bool) -> bool {
        let mut timers = self.timers();
        let mut was_active = timers.paused;
        if let Some(token) = timers.session.take() {
            token.cancel();
            was_active = true;
        }
        if let Some(handle) = timers.schedule.take() {
            handle.abort();
            was_active = true;
        }
        if include_cooldown {
            if let Some(handle) = timers.cooldown.take() {
                handle.abort();
                was_active = true;
            }
        }
        timers.poll_fn = None;
        timers.paused = false;
        was_active
    }

    /// (Re)start the recurring timer at the current interval
    ///
    /// No-op when stopped or paused.
    fn arm_schedule(self: &Arc<Self>) {
        let mut timers = self.timers();
        if timers.paused {
            return;
        }
        let (Some(token), Some(poll_fn)) = (timers.session.clone(), timers.poll_fn.clone()) else {
            return;
        };
        if let Some(handle) = timers.schedule.take() {
            handle.abort();
        }

        let period = self.snapshot().interval;
        let shared = Arc::clone(self);
        timers.schedule = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::spawn(Shared::attempt(
                            Arc::clone(&shared),
                            Arc::clone(&poll_fn),
                            token.clone(),
                        ));
                    }
                }
            }
        }));
    }

    /// Claim the in-flight slot if both guards allow it
    fn begin_attempt(self: &Arc<Self>) -> Option<InFlight> {
        let mut state = self.state();
        if state.is_polling {
            debug!("poll already in progress, skipping tick");
            return None;
        }
        let now = Instant::now();
        if let Some(last) = state.last_poll_time {
            if now.duration_since(last) < MIN_POLL_SPACING {
                debug!("poll tick too soon after previous attempt, skipping");
                return None;
            }
        }
        state.is_polling = true;
        state.last_poll_time = Some(now);
        Some(InFlight(Arc::clone(self)))
    }

    /// One scheduled tick
    async fn attempt(shared: Arc<Self>, poll_fn: PollFn, token: CancellationToken) {
        if token.is_cancelled() {
            return;
        }
        let Some(_in_flight) = shared.begin_attempt() else {
            return;
        };

        let outcome = tokio::select! {
            result = poll_fn(token.clone()) => Some(result),
            _ = token.cancelled() => None,
        };

        match outcome {
            None => debug!("poll cancelled in flight"),
            Some(_) if token.is_cancelled() => debug!("discarding result of stopped poll"),
            Some(Ok(())) => shared.on_success(),
            Some(Err(e)) => shared.on_failure(e),
        }
    }

    fn on_success(self: &Arc<Self>) {
        let recovered = {
            let mut state = self.state();
            if state.consecutive_errors > 0 {
                state.consecutive_errors = 0;
                state.interval = self.baseline_interval();
                true
            } else {
                false
            }
        };
        if recovered {
            info!("polling recovered, back to base interval");
            self.arm_schedule();
            self.report(PollingHealth::Active);
        }
    }

    fn on_failure(self: &Arc<Self>, error: Error) {
        let (errors, paused, interval) = {
            let mut state = self.state();
            state.consecutive_errors = state.consecutive_errors.saturating_add(1);
            let errors = state.consecutive_errors;
            if self.policy.should_pause(errors) {
                (errors, true, state.interval)
            } else {
                let mut next = self.policy.next_delay(errors);
                if !self.foreground.load(Ordering::SeqCst) {
                    next = next.max(self.policy.max_interval());
                }
                state.interval = next;
                (errors, false, next)
            }
        };

        warn!(error = %error, consecutive_errors = errors, "poll failed");
        if paused {
            warn!(
                cooldown_secs = PAUSE_COOLDOWN.as_secs(),
                "too many consecutive poll errors, pausing"
            );
            self.pause();
            self.report(PollingHealth::Paused);
        } else {
            self.arm_schedule();
            self.report(PollingHealth::BackingOff {
                consecutive_errors: errors,
                interval_ms: interval.as_millis() as u64,
            });
        }
    }

    /// Drop the schedule and arm the cooldown reset
    fn pause(self: &Arc<Self>) {
        let mut timers = self.timers();
        timers.paused = true;
        if let Some(handle) = timers.schedule.take() {
            handle.abort();
        }
        if let Some(handle) = timers.cooldown.take() {
            handle.abort();
        }
        let shared = Arc::clone(self);
        timers.cooldown = Some(tokio::spawn(async move {
            time::sleep(PAUSE_COOLDOWN).await;
            shared.finish_cooldown();
        }));
    }

    fn finish_cooldown(&self) {
        {
            let mut state = self.state();
            state.consecutive_errors = 0;
            state.interval = self.baseline_interval();
        }
        // Detach our own handle; aborting it here would cancel this task
        self.timers().cooldown.take();
        info!("poll cooldown elapsed, counters reset");
        self.report(PollingHealth::CooledDown);
    }
}
