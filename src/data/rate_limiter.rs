//! Sliding-window call throttle, one instance per upstream source.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// One ceiling: at most `max_calls` within any trailing `span`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub max_calls: usize,
    pub span: Duration,
}

/// Calls left in each window right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remaining {
    /// Budget window, e.g. per day
    pub budget: usize,
    /// Burst window, e.g. per minute, when one is configured
    pub burst: Option<usize>,
}

/// Admits at most `max_calls` within any trailing `window`, and optionally
/// at most a smaller burst within a shorter window on top of that.
///
/// One timestamp queue serves both windows. It is locked only while it is
/// pruned and checked; a caller that finds a window full computes how long
/// until enough calls age out, releases the lock, sleeps, and then rechecks.
/// Concurrent callers sharing one limiter therefore queue without ever
/// holding the lock across a sleep or a network call.
pub struct RateLimiter {
    name: String,
    budget: Window,
    burst: Option<Window>,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, max_calls: usize, window: Duration) -> Self {
        let max_calls = max_calls.max(1);
        RateLimiter {
            name: name.into(),
            budget: Window {
                max_calls,
                span: window,
            },
            burst: None,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    /// Also cap calls within a shorter `window`. A zero `max_calls` leaves
    /// the limiter budget-only.
    pub fn with_burst(mut self, max_calls: usize, window: Duration) -> Self {
        self.burst = (max_calls > 0).then_some(Window {
            max_calls,
            span: window,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn budget(&self) -> Window {
        self.budget
    }

    pub fn burst(&self) -> Option<Window> {
        self.burst
    }

    fn windows(&self) -> impl Iterator<Item = Window> {
        std::iter::once(self.budget).chain(self.burst)
    }

    fn longest_span(&self) -> Duration {
        self.windows().map(|w| w.span).max().unwrap_or(self.budget.span)
    }

    fn prune(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        let keep = self.longest_span();
        while let Some(&oldest) = calls.front() {
            if now.saturating_duration_since(oldest) >= keep {
                calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn count_within(calls: &VecDeque<Instant>, span: Duration, now: Instant) -> usize {
        calls
            .iter()
            .rev()
            .take_while(|t| now.saturating_duration_since(**t) < span)
            .count()
    }

    /// Zero when one more call fits in every window, otherwise how long
    /// until it does.
    fn wait_for(&self, calls: &VecDeque<Instant>, now: Instant) -> Duration {
        self.windows()
            .filter(|w| Self::count_within(calls, w.span, now) >= w.max_calls)
            .filter_map(|w| {
                // the max_calls-th most recent call has to leave the window
                let idx = calls.len().checked_sub(w.max_calls)?;
                calls
                    .get(idx)
                    .map(|t| (*t + w.span).saturating_duration_since(now))
            })
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Wait until one more call fits in every window, then record it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                self.prune(&mut calls, now);

                let wait = self.wait_for(&calls, now);
                if wait.is_zero() {
                    calls.push_back(now);
                    return;
                }
                wait
            };

            debug!(
                "{}: rate limit reached ({:?}, burst {:?}), waiting {:?}",
                self.name, self.budget, self.burst, wait
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Record a call only if it fits right now.
    pub async fn try_acquire(&self) -> bool {
        let mut calls = self.calls.lock().await;
        let now = Instant::now();
        self.prune(&mut calls, now);
        if self.wait_for(&calls, now).is_zero() {
            calls.push_back(now);
            true
        } else {
            false
        }
    }

    /// Calls currently counted against the budget window.
    pub async fn in_window(&self) -> usize {
        let mut calls = self.calls.lock().await;
        let now = Instant::now();
        self.prune(&mut calls, now);
        Self::count_within(&calls, self.budget.span, now)
    }

    pub async fn remaining(&self) -> Remaining {
        let mut calls = self.calls.lock().await;
        let now = Instant::now();
        self.prune(&mut calls, now);
        let left = |w: Window| w.max_calls.saturating_sub(Self::count_within(&calls, w.span, now));
        Remaining {
            budget: left(self.budget),
            burst: self.burst.map(left),
        }
    }
}
