use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: usize,
    opened_at: Option<Instant>,
}

/// Stops calls to a failing external source after `threshold` consecutive
/// failures. After `cooldown` one call is let through; its outcome closes or
/// re-opens the breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: usize,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(threshold: usize, cooldown: Duration) -> Self {
        CircuitBreaker {
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// True when a call may go out now.
    pub fn allow(&self) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        match state.opened_at {
            None => true,
            Some(opened) if opened.elapsed() >= self.cooldown => {
                // Half-open: let this caller probe and restart the cooldown for the rest.
                state.opened_at = Some(Instant::now());
                true
            }
            Some(_) => false,
        }
    }

    pub fn record_success(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = BreakerState::default();
        }
    }

    /// Returns true when this failure opened the breaker.
    pub fn record_failure(&self) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold {
            let newly_open = state.opened_at.is_none();
            state.opened_at = Some(Instant::now());
            return newly_open;
        }
        false
    }

    pub fn consecutive_failures(&self) -> usize {
        self.state.lock().map(|s| s.consecutive_failures).unwrap_or(0)
    }
}
