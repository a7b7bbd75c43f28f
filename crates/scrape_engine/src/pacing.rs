use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("pacing wait cancelled")]
pub struct PacingCancelled;

/// Minimum spacing between request starts to the same host, shared by all workers.
///
/// The lock only guards slot bookkeeping; waiting happens outside it, so a
/// worker sleeping for one host never delays requests to another.
#[derive(Debug)]
pub struct HostPacer {
    min_interval: Duration,
    next_free: Mutex<HashMap<String, Instant>>,
}

impl HostPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_free: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for this host's next slot. Returns early with an error on cancellation;
    /// the slot stays consumed either way.
    pub async fn acquire(&self, host: &str, cancel: &CancellationToken) -> Result<(), PacingCancelled> {
        if cancel.is_cancelled() {
            return Err(PacingCancelled);
        }
        if self.min_interval.is_zero() {
            return Ok(());
        }
        let slot = self.reserve(host);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PacingCancelled),
            _ = tokio::time::sleep_until(slot) => Ok(()),
        }
    }

    fn reserve(&self, host: &str) -> Instant {
        let now = Instant::now();
        let mut slots = self.next_free.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.len() > PRUNE_THRESHOLD {
            slots.retain(|_, next| *next > now);
        }
        let slot = slots.get(host).map_or(now, |next| (*next).max(now));
        slots.insert(host.to_string(), slot + self.min_interval);
        slot
    }
}
