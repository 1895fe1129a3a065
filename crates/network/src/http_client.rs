use std::time::Duration;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Config;
use crate::error::{NetError, Result};

pub struct GateHttpClient {
    client: Client,
    config: Config,
}

impl GateHttpClient {
    pub fn new(config: Config) -> Result<Self> {
        if config.timeout_ms == 0 {
            return Err(NetError::Config("Timeout must be non-zero".into()));
        }

        let mut builder = Client::builder().timeout(Duration::from_millis(config.timeout_ms));

        if !config.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| NetError::Config(format!("Failed to build client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorize(request).send().await.map_err(classify)?;
        check_status(response).await
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.send(self.client.get(self.config.url(path))).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.get(path).await?;
        response
            .json()
            .await
            .map_err(|e| NetError::Decode(format!("JSON parse failed: {}", e)))
    }

    pub async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<Response> {
        self.send(self.client.post(self.config.url(path)).json(body))
            .await
    }

    pub async fn post_json<T: Serialize, R: DeserializeOwned>(&self, path: &str, body: &T) -> Result<R> {
        let response = self.post(path, body).await?;
        response
            .json()
            .await
            .map_err(|e| NetError::Decode(format!("JSON parse failed: {}", e)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn classify(e: reqwest::Error) -> NetError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        NetError::Unavailable(e.to_string())
    } else if e.is_builder() {
        NetError::Config(e.to_string())
    } else {
        NetError::Unavailable(format!("Transport failure: {}", e))
    }
}

/// Statuses that say "not now" rather than "no". A plain 500 is not among them.
fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::GATEWAY_TIMEOUT
    )
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);

    if is_transient_status(status) {
        tracing::debug!("gate server answered {}: {}", status, message);
        return Err(NetError::Unavailable(format!("{}: {}", status, message)));
    }

    Err(NetError::Status {
        status: status.as_u16(),
        message,
    })
}
