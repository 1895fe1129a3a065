//! This crate provides the HTTP client used by holder devices, gate scanners and the
//! operator CLI to talk to the gate server.
//!
//! ```rust,no_run
//! use gatepass_net::{Config, GateHttpClient};
//!
//! #[tokio::main]
//! async fn main() -> gatepass_net::Result<()> {
//!     let config = Config::default().with_base_url("http://127.0.0.1:8080");
//!     let client = GateHttpClient::new(config)?;
//!
//!     let health: serde_json::Value = client.get_json("/health").await?;
//!     println!("gate server: {}", health);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod http_client;

pub use config::{Config, DEFAULT_GATE_SERVER_URL, DEFAULT_TIMEOUT_MS};
pub use error::{NetError, Result};
pub use http_client::GateHttpClient;

pub fn gate_client(base_url: &str) -> Result<GateHttpClient> {
    GateHttpClient::new(Config::default().with_base_url(base_url))
}
