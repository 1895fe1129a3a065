//! Proof windows and the clocks that place "now" into one.
//!
//! A window is a fixed-width bucket `floor(unix_secs / window_secs)`. Windows are never
//! persisted; generator and verifier both compute them from their own clock.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdkError};

pub const DEFAULT_WINDOW_SECS: u64 = 30;
pub const DEFAULT_PROOF_BYTES: usize = 10;
pub const MIN_PROOF_BYTES: usize = 8;
pub const MAX_PROOF_BYTES: usize = 32;

/// Windows accepted on each side of the verifier's current window.
pub const ACCEPTED_SKEW_WINDOWS: u64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofParams {
    pub window_secs: u64,
    pub proof_bytes: usize,
}

impl Default for ProofParams {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            proof_bytes: DEFAULT_PROOF_BYTES,
        }
    }
}

impl ProofParams {
    pub fn new(window_secs: u64, proof_bytes: usize) -> Result<Self> {
        let params = Self {
            window_secs,
            proof_bytes,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_secs == 0 {
            return Err(SdkError::InvalidInput("Window width must be non-zero".into()));
        }
        if !(MIN_PROOF_BYTES..=MAX_PROOF_BYTES).contains(&self.proof_bytes) {
            return Err(SdkError::InvalidInput(format!(
                "Proof length must be {}..={} bytes, got {}",
                MIN_PROOF_BYTES, MAX_PROOF_BYTES, self.proof_bytes
            )));
        }
        Ok(())
    }

    pub fn window_index(&self, unix_secs: u64) -> u64 {
        unix_secs / self.window_secs
    }

    /// Seconds until the next rotation, in `1..=window_secs`.
    pub fn seconds_remaining(&self, unix_secs: u64) -> u64 {
        self.window_secs - unix_secs % self.window_secs
    }

    /// The windows a verifier accepts around `current`, oldest first.
    pub fn accepted_windows(&self, current: u64) -> Vec<u64> {
        let first = current.saturating_sub(ACCEPTED_SKEW_WINDOWS);
        let last = current.saturating_add(ACCEPTED_SKEW_WINDOWS);
        (first..=last).collect()
    }
}

pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to. Used by tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(unix_secs: u64) -> Self {
        Self {
            now: AtomicU64::new(unix_secs),
        }
    }

    pub fn set(&self, unix_secs: u64) {
        self.now.store(unix_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Device clock corrected by the offset measured against the server at provisioning.
pub struct OffsetClock {
    inner: Arc<dyn Clock>,
    offset_secs: i64,
}

impl OffsetClock {
    pub fn new(inner: Arc<dyn Clock>, offset_secs: i64) -> Self {
        Self { inner, offset_secs }
    }

    /// `server_now - device_now`, measured once.
    pub fn measure(inner: Arc<dyn Clock>, server_now: u64) -> Self {
        let device_now = inner.now_unix();
        let offset_secs = server_now as i64 - device_now as i64;
        Self::new(inner, offset_secs)
    }

    pub fn offset_secs(&self) -> i64 {
        self.offset_secs
    }
}

impl Clock for OffsetClock {
    fn now_unix(&self) -> u64 {
        self.inner.now_unix().saturating_add_signed(self.offset_secs)
    }
}
