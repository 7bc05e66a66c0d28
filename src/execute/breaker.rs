use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{FlowError, FlowResult};

/// How long an open breaker blocks submissions before allowing a probe.
const COOLDOWN: Duration = Duration::from_secs(30);

/// Consecutive-failure circuit breaker around signer submission.
/// A threshold of 0 disables it.
pub struct CircuitBreaker {
    threshold: u32,
    state: Mutex<BreakerState>,
}

struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        CircuitBreaker {
            threshold,
            state: Mutex::new(BreakerState {
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Fails fast while the breaker is open. After the cooldown a single
    /// probe is let through; its outcome decides whether the breaker closes.
    pub fn check(&self) -> FlowResult<()> {
        if self.threshold == 0 {
            return Ok(());
        }
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        if let Some(opened_at) = state.opened_at {
            if opened_at.elapsed() < COOLDOWN {
                return Err(FlowError::Upstream(
                    "signer circuit breaker is open".into(),
                ));
            }
            // Probe window: stay counted as open until a success closes us.
            state.opened_at = Some(Instant::now());
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    pub fn record_failure(&self) {
        if self.threshold == 0 {
            return;
        }
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold && state.opened_at.is_none() {
            tracing::warn!(
                failures = state.consecutive_failures,
                "signer circuit breaker opened"
            );
            state.opened_at = Some(Instant::now());
        }
    }
}
