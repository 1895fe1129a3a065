pub const DEFAULT_GATE_SERVER_URL: &str = "http://127.0.0.1:8080";
/// Scanners must give up quickly and report the gate as unavailable.
pub const DEFAULT_TIMEOUT_MS: u64 = 4_000;

#[derive(Clone, Debug)]
pub struct Config {
    pub base_url: String,
    pub timeout_ms: u64,
    pub bearer_token: Option<String>,
    pub verify_tls: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GATE_SERVER_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            bearer_token: None,
            verify_tls: true,
        }
    }
}

impl Config {
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn with_bearer_token(mut self, token: &str) -> Self {
        self.bearer_token = Some(token.to_string());
        self
    }

    pub fn without_tls_verification(mut self) -> Self {
        self.verify_tls = false;
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join_normalizes_slashes() {
        let config = Config::default().with_base_url("http://gate.local:8080/");
        assert_eq!(config.url("/scan"), "http://gate.local:8080/scan");
        assert_eq!(config.url("tickets/abc"), "http://gate.local:8080/tickets/abc");
    }

    #[test]
    fn test_builder_chain() {
        let config = Config::default()
            .with_timeout_ms(500)
            .with_bearer_token("staff-token");
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.bearer_token.as_deref(), Some("staff-token"));
        assert!(config.verify_tls);
    }
}
