//! Single-shot credential renewal timer.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Time left until `deadline`, or zero when it has passed.
#[must_use]
pub fn renewal_delay(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

#[derive(Debug)]
struct PendingRenewal {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// At most one pending renewal at a time. Each arming gets a new generation
/// number, which the timer task sends when it fires; the owner drops firings
/// whose generation is no longer current.
#[derive(Debug, Default)]
pub struct RenewalTimer {
    pending: Option<PendingRenewal>,
    generation: u64,
}

impl RenewalTimer {
    /// A timer with nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels any pending timer, then schedules a firing after `delay`.
    /// Returns the generation the firing will carry.
    pub fn arm(&mut self, delay: Duration, fired: mpsc::UnboundedSender<u64>) -> u64 {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let fires_at = Instant::now() + delay;
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = tokio::time::sleep_until(fires_at) => {
                    let _ = fired.send(generation);
                }
            }
        });

        debug!(generation, delay_secs = delay.as_secs(), "renewal timer armed");
        self.pending = Some(PendingRenewal { token, handle });
        generation
    }

    /// Cancels the pending timer. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.token.cancel();
                pending.handle.abort();
                debug!(generation = self.generation, "renewal timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Accepts a firing sent by the timer task. Stale generations are rejected.
    pub fn accept(&mut self, generation: u64) -> bool {
        if self.pending.is_some() && generation == self.generation {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Whether a firing is pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for RenewalTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
