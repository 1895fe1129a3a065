pub mod client;
pub mod crypto;
pub mod display;
pub mod error;
pub mod payload;
pub mod proof;
pub mod types;
pub mod window;

pub use client::{ClientConfig, GateClient, RetryPolicy};
pub use crypto::TicketSecret;
pub use display::{DisplayFrame, DisplayHandle, ProofDisplay};
pub use error::{Result, SdkError};
pub use payload::TicketPayload;
pub use proof::{current_proof, proof_for_window};
pub use types::{ScanOutcome, ScanRequest, ScanResponse, Ticket, TicketState, Tier};
pub use window::{Clock, ManualClock, OffsetClock, ProofParams, SystemClock};
