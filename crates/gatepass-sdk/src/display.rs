//! Holder-side display loop.
//!
//! One task, one timer, one state slot. Every tick the loop reads the clock, recomputes the
//! frame and publishes it only if something visible changed. Dropping the handle tears the
//! loop down.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::crypto::TicketSecret;
use crate::error::Result;
use crate::payload::TicketPayload;
use crate::proof::proof_for_window;
use crate::window::{Clock, ProofParams, SystemClock};

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayFrame {
    /// What the barcode encodes.
    pub payload: String,
    pub window_index: u64,
    /// Countdown to the next rotation.
    pub seconds_remaining: u64,
}

pub struct ProofDisplay {
    ticket_id: Uuid,
    secret: TicketSecret,
    params: ProofParams,
    clock: Arc<dyn Clock>,
    tick: Duration,
}

impl ProofDisplay {
    pub fn new(ticket_id: Uuid, secret: TicketSecret, params: ProofParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            ticket_id,
            secret,
            params,
            clock: Arc::new(SystemClock),
            tick: DEFAULT_TICK,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn ticket_id(&self) -> Uuid {
        self.ticket_id
    }

    pub fn frame_at(&self, unix_secs: u64) -> Result<DisplayFrame> {
        let window_index = self.params.window_index(unix_secs);
        let proof = proof_for_window(&self.secret, window_index, &self.params)?;
        Ok(DisplayFrame {
            payload: TicketPayload::new(self.ticket_id, proof).encode(),
            window_index,
            seconds_remaining: self.params.seconds_remaining(unix_secs),
        })
    }

    /// Start the loop on the current tokio runtime.
    pub fn start(self) -> Result<DisplayHandle> {
        let first = self.frame_at(self.clock.now_unix())?;
        let mut last_window = first.window_index;
        let (tx, rx) = watch::channel(first);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let frame = match self.frame_at(self.clock.now_unix()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Stopping display for {}: {}", self.ticket_id, e);
                        break;
                    }
                };
                let window_index = frame.window_index;
                tx.send_if_modified(|current| {
                    if *current == frame {
                        return false;
                    }
                    *current = frame;
                    true
                });
                if window_index != last_window {
                    debug!("Rotated proof for {} to window {}", self.ticket_id, window_index);
                    last_window = window_index;
                }
                if tx.is_closed() {
                    break;
                }
            }
        });

        Ok(DisplayHandle { frames: rx, task })
    }
}

/// Owning handle for a running display. Dropping it cancels the loop.
pub struct DisplayHandle {
    frames: watch::Receiver<DisplayFrame>,
    task: JoinHandle<()>,
}

impl DisplayHandle {
    pub fn current(&self) -> DisplayFrame {
        self.frames.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayFrame> {
        self.frames.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(self) {}
}

impl Drop for DisplayHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::ManualClock;

    fn display(clock: Arc<ManualClock>) -> ProofDisplay {
        ProofDisplay::new(
            Uuid::new_v4(),
            TicketSecret::from_bytes([9u8; 32]),
            ProofParams::default(),
        )
        .unwrap()
        .with_clock(clock)
        .with_tick(Duration::from_millis(5))
    }

    #[test]
    fn test_frame_countdown() {
        let clock = Arc::new(ManualClock::new(3_000));
        let d = display(clock);
        let a = d.frame_at(3_000).unwrap();
        let b = d.frame_at(3_029).unwrap();
        let c = d.frame_at(3_030).unwrap();
        assert_eq!(a.seconds_remaining, 30);
        assert_eq!(b.seconds_remaining, 1);
        assert_eq!(a.payload, b.payload);
        assert_ne!(b.payload, c.payload);
        assert_eq!(c.window_index, 101);
    }

    #[tokio::test]
    async fn test_rotates_when_window_advances() {
        let clock = Arc::new(ManualClock::new(3_000));
        let handle = display(clock.clone()).start().unwrap();
        let first = handle.current();
        assert_eq!(first.window_index, 100);

        let mut rx = handle.subscribe();
        clock.advance(30);

        let rotated = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                rx.changed().await.unwrap();
                let frame = rx.borrow_and_update().clone();
                if frame.window_index == 101 {
                    return frame;
                }
            }
        })
        .await
        .unwrap();

        assert_ne!(rotated.payload, first.payload);
        assert_eq!(rotated.seconds_remaining, 30);
    }

    #[tokio::test]
    async fn test_drop_stops_loop() {
        let clock = Arc::new(ManualClock::new(3_000));
        let handle = display(clock).start().unwrap();
        let mut rx = handle.subscribe();
        assert!(handle.is_running());
        drop(handle);

        let closed = tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap();
        assert!(closed.is_err(), "sender should be gone after teardown");
    }
}
