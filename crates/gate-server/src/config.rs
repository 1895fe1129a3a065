use std::path::PathBuf;
use std::time::Duration;

use gatepass_sdk::ProofParams;

/// Matches the quantity cap on the checkout page.
pub const DEFAULT_MAX_TICKETS_PER_ORDER: u32 = 10;
pub const DEFAULT_VERIFY_TIMEOUT_MS: u64 = 3_000;

#[derive(Clone, Debug)]
pub struct GateConfig {
    pub host: String,
    pub port: u16,
    /// Ledger, secrets and audit log live here. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub seal_key_path: Option<PathBuf>,
    pub identity_file: Option<PathBuf>,
    pub proof: ProofParams,
    pub verify_timeout: Duration,
    pub max_tickets_per_order: u32,
    pub rate_limit_per_sec: u64,
    pub rate_limit_burst: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: None,
            seal_key_path: None,
            identity_file: None,
            proof: ProofParams::default(),
            verify_timeout: Duration::from_millis(DEFAULT_VERIFY_TIMEOUT_MS),
            max_tickets_per_order: DEFAULT_MAX_TICKETS_PER_ORDER,
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
        }
    }
}

impl GateConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let host = std::env::var("HOST").unwrap_or(defaults.host);
        let port = parse_var("PORT")?.unwrap_or(defaults.port);

        let data_dir = path_var("DATA_DIR");
        let seal_key_path = path_var("SEAL_KEY_PATH")
            .or_else(|| data_dir.as_ref().map(|d| d.join("seal.key")));
        let identity_file = path_var("IDENTITY_FILE");

        let window_secs = parse_var("WINDOW_SECS")?.unwrap_or(defaults.proof.window_secs);
        let proof_bytes = parse_var("PROOF_BYTES")?.unwrap_or(defaults.proof.proof_bytes);
        let proof = ProofParams::new(window_secs, proof_bytes)
            .map_err(|e| anyhow::anyhow!("Invalid proof parameters: {}", e))?;

        let verify_timeout = parse_var("VERIFY_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.verify_timeout);

        let max_tickets_per_order =
            parse_var("MAX_TICKETS_PER_ORDER")?.unwrap_or(defaults.max_tickets_per_order);

        let rate_limit_per_sec =
            parse_var("RATE_LIMIT_PER_SEC")?.unwrap_or(defaults.rate_limit_per_sec);
        let rate_limit_burst = parse_var("RATE_LIMIT_BURST")?.unwrap_or(defaults.rate_limit_burst);

        if data_dir.is_none() {
            tracing::warn!(
                "DATA_DIR not set! Ledger is in-memory only; admissions are lost on restart."
            );
        }

        Ok(Self {
            host,
            port,
            data_dir,
            seal_key_path,
            identity_file,
            proof,
            verify_timeout,
            max_tickets_per_order,
            rate_limit_per_sec,
            rate_limit_burst,
        })
    }
}

fn path_var(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(|s| PathBuf::from(shellexpand::tilde(&s).to_string()))
}

/// Unset is `None`; set-but-unparseable is an error rather than a silent default.
fn parse_var<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {}='{}': {}", name, raw, e)),
        Err(_) => Ok(None),
    }
}
