/// Talks to the gate server for the three kinds of devices:
/// holders (provision a display once), gate scanners (submit scans), and admins (issue, void, audit).
use std::sync::Arc;
use std::time::Duration;

use gatepass_net::{Config as NetConfig, GateHttpClient, NetError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::display::ProofDisplay;
use crate::error::{Result, SdkError};
use crate::payload::TicketPayload;
use crate::types::{
    AdmissionAttempt, AttemptsResponse, DisplaySecret, IssueRequest, IssueResponse, ScanRequest,
    ScanResponse, ServerInfo, Ticket,
};
use crate::window::{Clock, OffsetClock, ProofParams, SystemClock};

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(1 << attempt.min(16)))
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Gate server base URL
    pub server_url: String,
    /// Identity token issued by the auth collaborator
    pub bearer_token: Option<String>,
    pub timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: gatepass_net::DEFAULT_GATE_SERVER_URL.to_string(),
            bearer_token: None,
            timeout_ms: gatepass_net::DEFAULT_TIMEOUT_MS,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct GateClient {
    http: GateHttpClient,
    retry: RetryPolicy,
}

impl GateClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut net = NetConfig::default()
            .with_base_url(&config.server_url)
            .with_timeout_ms(config.timeout_ms);
        if let Some(token) = &config.bearer_token {
            net = net.with_bearer_token(token);
        }
        Ok(Self {
            http: GateHttpClient::new(net)?,
            retry: config.retry,
        })
    }

    pub async fn info(&self) -> Result<ServerInfo> {
        Ok(self.http.get_json("/info").await.map_err(server_error)?)
    }

    pub async fn issue(&self, request: &IssueRequest) -> Result<Vec<Ticket>> {
        let response: IssueResponse = self
            .http
            .post_json("/tickets", request)
            .await
            .map_err(server_error)?;
        Ok(response.tickets)
    }

    pub async fn ticket(&self, ticket_id: Uuid) -> Result<Ticket> {
        self.http
            .get_json(&format!("/tickets/{}", ticket_id))
            .await
            .map_err(server_error)
    }

    pub async fn void(&self, ticket_id: Uuid) -> Result<Ticket> {
        self.http
            .post_json(&format!("/tickets/{}/void", ticket_id), &serde_json::json!({}))
            .await
            .map_err(server_error)
    }

    pub async fn attempts(&self, ticket_id: Uuid) -> Result<Vec<AdmissionAttempt>> {
        let response: AttemptsResponse = self
            .http
            .get_json(&format!("/tickets/{}/attempts", ticket_id))
            .await
            .map_err(server_error)?;
        Ok(response.attempts)
    }

    /// Holder provisioning. The only network call a display needs.
    pub async fn fetch_display_secret(&self, ticket_id: Uuid) -> Result<DisplaySecret> {
        self.http
            .get_json(&format!("/tickets/{}/secret", ticket_id))
            .await
            .map_err(server_error)
    }

    /// Provision a display whose clock is corrected against the server's.
    pub async fn provision_display(&self, ticket_id: Uuid) -> Result<ProofDisplay> {
        let provisioned = self.fetch_display_secret(ticket_id).await?;
        let params = ProofParams::new(provisioned.window_secs, provisioned.proof_bytes)?;
        let device: Arc<dyn Clock> = Arc::new(SystemClock);
        let clock = OffsetClock::measure(device, provisioned.server_time);
        if clock.offset_secs() != 0 {
            info!(
                "Device clock differs from gate server by {}s, correcting display",
                clock.offset_secs()
            );
        }

        Ok(ProofDisplay::new(provisioned.ticket_id, provisioned.secret, params)?
            .with_clock(Arc::new(clock)))
    }

    /// Submit a raw barcode string. Retries only when the verifier is unavailable; never
    /// reports an outcome it did not receive from the server.
    pub async fn scan(&self, raw_payload: &str, scanner_id: &str) -> Result<ScanResponse> {
        let payload: TicketPayload = raw_payload.parse()?;
        self.submit(&payload.into_scan_request(scanner_id)).await
    }

    pub async fn submit(&self, request: &ScanRequest) -> Result<ScanResponse> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match self.http.post_json::<_, ScanResponse>("/scan", request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() => {
                    last_error = e.to_string();
                    if attempt + 1 < attempts {
                        let wait = self.retry.backoff(attempt);
                        warn!(
                            "Verification unavailable (attempt {}), retrying in {:?}: {}",
                            attempt + 1,
                            wait,
                            e
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
                Err(e) => return Err(server_error(e)),
            }
        }

        Err(SdkError::VerificationUnavailable(last_error))
    }
}

fn server_error(e: NetError) -> SdkError {
    match e {
        NetError::Status { status, message } => {
            SdkError::Server(format!("{} ({})", message, status))
        }
        NetError::Unavailable(message) => SdkError::VerificationUnavailable(message),
        other => SdkError::Network(other),
    }
}
