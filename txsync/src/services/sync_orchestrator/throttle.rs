//! Per-operation cooldown
//!
//! Rejects re-triggering an expensive, externally requested operation within
//! a fixed window. A time gate only: rejected calls are not queued.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::OperationKind;

/// Default cooldown between externally triggered runs
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

pub struct OperationThrottle {
    window: Duration,
    last_triggered: Mutex<HashMap<OperationKind, Instant>>,
}

impl OperationThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_triggered: Mutex::new(HashMap::new()),
        }
    }

    /// Record a trigger, or return the time left in the window
    pub fn check(&self, operation: OperationKind) -> Result<(), Duration> {
        self.check_at(operation, Instant::now())
    }

    fn check_at(&self, operation: OperationKind, now: Instant) -> Result<(), Duration> {
        let mut last = self
            .last_triggered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(previous) = last.get(&operation) {
            let elapsed = now.saturating_duration_since(*previous);
            if elapsed < self.window {
                return Err(self.window - elapsed);
            }
        }

        last.insert(operation, now);
        Ok(())
    }

    /// Forget a trigger (used when the triggered operation never started)
    pub fn reset(&self, operation: OperationKind) {
        self.last_triggered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&operation);
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for OperationThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}
