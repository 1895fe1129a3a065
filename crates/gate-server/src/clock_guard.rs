use gatepass_sdk::{Clock, ProofParams};
use std::sync::Arc;

/// The verifier's view of time. Server time is ground truth; holder devices may drift by
/// up to one window either way before their proofs stop working.
pub struct ClockGuard {
    clock: Arc<dyn Clock>,
    params: ProofParams,
}

impl ClockGuard {
    pub fn new(clock: Arc<dyn Clock>, params: ProofParams) -> Self {
        Self { clock, params }
    }

    pub fn params(&self) -> &ProofParams {
        &self.params
    }

    pub fn now(&self) -> u64 {
        self.clock.now_unix()
    }

    /// Reads the clock once and returns the instant together with its window.
    pub fn observe(&self) -> (u64, u64) {
        let now = self.now();
        (now, self.params.window_index(now))
    }

    /// Windows whose proofs are accepted while the server is in `current`.
    pub fn accepted_windows(&self, current: u64) -> Vec<u64> {
        self.params.accepted_windows(current)
    }
}
