//! Rolling per-minute / per-day request allowance shared by every outbound call

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

pub const MINUTE_WINDOW: Duration = Duration::from_secs(60);
pub const DAY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Static limits of the shared allowance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetLimits {
    pub per_minute: u32,
    pub per_day: u32,
    /// Pause the caller must observe after every successful call
    pub inter_request_delay: Duration,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            per_minute: 10,
            per_day: 1000,
            inter_request_delay: Duration::from_secs(2),
        }
    }
}

impl BudgetLimits {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.per_minute == 0 || self.per_day == 0 {
            return Err(PipelineError::config(format!(
                "rate limits must be positive (per_minute={}, per_day={})",
                self.per_minute, self.per_day
            )));
        }
        Ok(())
    }
}

/// Counter values observable between reservations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetSnapshot {
    pub requests_this_minute: u32,
    pub requests_today: u32,
    pub per_minute: u32,
    pub per_day: u32,
}

/// Token for one reserved request, redeemed through [`RateBudget::release`]
#[derive(Debug)]
#[must_use = "a lease must be released so failed calls are refunded"]
pub struct Lease {
    minute_window: Instant,
    day_window: Instant,
    cooldown: Duration,
}

impl Lease {
    /// Delay the holder must wait after a successful call
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

#[derive(Debug)]
struct BudgetCounters {
    window_start_minute: Instant,
    requests_this_minute: u32,
    window_start_day: Instant,
    requests_today: u32,
}

impl BudgetCounters {
    fn new(now: Instant) -> Self {
        Self {
            window_start_minute: now,
            requests_this_minute: 0,
            window_start_day: now,
            requests_today: 0,
        }
    }

    /// Day rollover takes precedence and resets both windows
    fn roll_windows(&mut self, now: Instant) {
        if now.duration_since(self.window_start_day) >= DAY_WINDOW {
            *self = BudgetCounters::new(now);
        } else if now.duration_since(self.window_start_minute) >= MINUTE_WINDOW {
            self.window_start_minute = now;
            self.requests_this_minute = 0;
        }
    }
}

/// Process-wide request allowance
///
/// Reservations are serialized through a gate so concurrent callers queue
/// against the rolling windows instead of racing them; the counters live in
/// their own short critical section so refunds never wait behind a sleeping
/// reservation.
#[derive(Debug)]
pub struct RateBudget {
    limits: BudgetLimits,
    counters: Mutex<BudgetCounters>,
    reservation_gate: Mutex<()>,
}

impl RateBudget {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            counters: Mutex::new(BudgetCounters::new(Instant::now())),
            reservation_gate: Mutex::new(()),
        }
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    /// Wait for minute-window capacity, then count the request in both windows
    ///
    /// Fails immediately once the daily allowance is spent.
    pub async fn reserve(&self) -> PipelineResult<Lease> {
        let _gate = self.reservation_gate.lock().await;

        loop {
            let wait = {
                let mut counters = self.counters.lock().await;
                let now = Instant::now();
                counters.roll_windows(now);

                if counters.requests_today >= self.limits.per_day {
                    return Err(PipelineError::DailyBudgetExhausted {
                        used: counters.requests_today,
                        limit: self.limits.per_day,
                    });
                }

                if counters.requests_this_minute < self.limits.per_minute {
                    counters.requests_this_minute += 1;
                    counters.requests_today += 1;

                    return Ok(Lease {
                        minute_window: counters.window_start_minute,
                        day_window: counters.window_start_day,
                        cooldown: self.limits.inter_request_delay,
                    });
                }

                MINUTE_WINDOW.saturating_sub(now.duration_since(counters.window_start_minute))
            };

            debug!(
                wait_ms = wait.as_millis() as u64,
                per_minute = self.limits.per_minute,
                "Minute budget exhausted, waiting for window rollover"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Redeem a lease
    ///
    /// A failed call is refunded in every window the lease still belongs to.
    /// A successful call keeps its count and the cooldown to honour is returned.
    pub async fn release(&self, lease: Lease, succeeded: bool) -> Option<Duration> {
        if succeeded {
            return Some(lease.cooldown);
        }

        let mut counters = self.counters.lock().await;
        if counters.window_start_minute == lease.minute_window {
            counters.requests_this_minute = counters.requests_this_minute.saturating_sub(1);
        }
        if counters.window_start_day == lease.day_window {
            counters.requests_today = counters.requests_today.saturating_sub(1);
        }
        None
    }

    pub async fn snapshot(&self) -> BudgetSnapshot {
        let counters = self.counters.lock().await;
        BudgetSnapshot {
            requests_this_minute: counters.requests_this_minute,
            requests_today: counters.requests_today,
            per_minute: self.limits.per_minute,
            per_day: self.limits.per_day,
        }
    }
}
