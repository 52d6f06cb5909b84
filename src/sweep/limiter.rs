use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Result, SweepError};

/// Invoked each time a caller is about to wait for the next reset.
pub type WaitHook = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

const CANCELLED: i64 = -1;

#[derive(Debug)]
struct Budget {
    available: i64,
    spent: u64,
    cancelled: bool,
}

impl Budget {
    /// Spend only if the window stays above zero.
    fn try_take(&mut self, points: i64) -> bool {
        if self.available - points > 0 {
            self.take(points);
            return true;
        }
        false
    }

    fn take(&mut self, points: i64) {
        self.available -= points;
        self.spent += points as u64;
    }
}

/// Fixed-window point budget shared by every call of one scheduling cycle.
///
/// `run` refills the budget to exactly `global_limit` on every tick of
/// `reset_interval`; unspent points are never carried over. Callers that would
/// exhaust the budget wait for the next tick. Once `run` observes cancellation
/// the budget is parked at `-1` and every pending or future `spend` fails
/// with [`SweepError::Cancelled`]. Waiters released by the same reset may
/// overdraw the window; the next reset clears the deficit.
pub struct RateLimiter {
    global_limit: i64,
    reset_interval: Duration,
    budget: Mutex<Budget>,
    reset: Notify,
    on_waiting_for_reset: Option<WaitHook>,
}

impl RateLimiter {
    pub fn new(
        global_limit: u32,
        reset_interval: Duration,
        on_waiting_for_reset: Option<WaitHook>,
    ) -> Result<Self> {
        if global_limit == 0 {
            return Err(SweepError::Config("global rate limit must be greater than 0".to_string()));
        }
        if reset_interval.is_zero() {
            return Err(SweepError::Config("rate limit reset interval must be greater than 0".to_string()));
        }

        Ok(Self {
            global_limit: i64::from(global_limit),
            reset_interval,
            budget: Mutex::new(Budget {
                available: i64::from(global_limit),
                spent: 0,
                cancelled: false,
            }),
            reset: Notify::new(),
            on_waiting_for_reset,
        })
    }

    fn budget(&self) -> MutexGuard<'_, Budget> {
        // Critical sections never leave the budget half-updated
        self.budget.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refill loop. Runs until `shutdown` is cancelled, then tears the budget down.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.reset_interval, self.reset_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let mut budget = self.budget();
                    budget.available = CANCELLED;
                    budget.cancelled = true;
                    self.reset.notify_waiters();
                    debug!("Rate limiter stopped after spending {} points", budget.spent);
                    return;
                }
                _ = ticker.tick() => {
                    let mut budget = self.budget();
                    budget.available = self.global_limit;
                    self.reset.notify_waiters();
                    trace!("Rate limit budget reset to {} points", self.global_limit);
                }
            }
        }
    }

    /// Take `points` from the budget, waiting for the next reset when the
    /// remaining budget would drop to zero or below.
    ///
    /// The wait hook runs without the budget lock held, so it may read the limiter.
    pub async fn spend(&self, points: u32) -> Result<()> {
        let points = i64::from(points);

        {
            let mut budget = self.budget();
            if budget.cancelled {
                return Err(SweepError::Cancelled);
            }
            if budget.try_take(points) {
                return Ok(());
            }
        }

        if let Some(hook) = &self.on_waiting_for_reset {
            hook().map_err(SweepError::WaitHook)?;
        }

        let notified = {
            let mut budget = self.budget();
            if budget.cancelled {
                return Err(SweepError::Cancelled);
            }

            // A reset may have landed while the hook ran
            if budget.try_take(points) {
                return Ok(());
            }

            // Created under the lock, so only resets after this check wake us
            self.reset.notified()
        };

        notified.await;

        let mut budget = self.budget();
        if budget.cancelled {
            return Err(SweepError::Cancelled);
        }

        budget.take(points);
        Ok(())
    }

    /// Cumulative points spent since construction.
    pub fn spent_points(&self) -> u64 {
        self.budget().spent
    }

    pub fn available_points(&self) -> i64 {
        self.budget().available
    }

    pub fn global_limit(&self) -> u32 {
        self.global_limit as u32
    }
}
