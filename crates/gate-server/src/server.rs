use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use gatepass_sdk::types::{
    AttemptsResponse, DisplaySecret, IssueRequest, IssueResponse, ScanRequest, ScanResponse,
    ServerInfo, Ticket,
};
use gatepass_sdk::window::ACCEPTED_SKEW_WINDOWS;
use gatepass_sdk::Clock;
use serde::Serialize;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock_guard::ClockGuard;
use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::identity::{bearer_token, Identity, IdentityProvider};
use crate::issuance::IssuanceService;
use crate::seal::Sealer;
use crate::secret_store::SecretStore;
use crate::store::{SecretVault, TicketLedger};
use crate::verifier::{canonical_ticket_id, ProofVerifier};

const MAX_BODY_BYTES: usize = 16 * 1024;

pub struct GateState {
    pub config: GateConfig,
    pub ledger: Arc<dyn TicketLedger>,
    pub identities: Arc<dyn IdentityProvider>,
    pub guard: Arc<ClockGuard>,
    pub secrets: Arc<SecretStore>,
    pub verifier: Arc<ProofVerifier>,
    pub issuance: Arc<IssuanceService>,
}

impl GateState {
    pub fn new(
        config: GateConfig,
        ledger: Arc<dyn TicketLedger>,
        vault: Arc<dyn SecretVault>,
        sealer: Arc<Sealer>,
        identities: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let guard = Arc::new(ClockGuard::new(clock, config.proof));
        let secrets = Arc::new(SecretStore::new(vault, ledger.clone(), sealer));
        let verifier = Arc::new(ProofVerifier::new(
            ledger.clone(),
            secrets.clone(),
            guard.clone(),
            config.verify_timeout,
        ));
        let issuance = Arc::new(IssuanceService::new(
            ledger.clone(),
            secrets.clone(),
            identities.clone(),
            guard.clone(),
            config.max_tickets_per_order,
        ));

        Self {
            config,
            ledger,
            identities,
            guard,
            secrets,
            verifier,
            issuance,
        }
    }

    async fn identify(&self, headers: &HeaderMap) -> Result<Identity> {
        let token = bearer_token(headers)?;
        self.identities.authenticate(token).await
    }
}

/// All routes with tracing, CORS and a body cap. Rate limiting is added by `run`, since the
/// governor needs the peer address that only a real listener provides.
pub fn router(state: Arc<GateState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(get_info))
        // Issuance (admin)
        .route("/tickets", post(issue_tickets))
        .route("/tickets/:ticket_id", get(get_ticket))
        // Holder display provisioning
        .route("/tickets/:ticket_id/secret", get(get_display_secret))
        .route("/tickets/:ticket_id/void", post(void_ticket))
        .route("/tickets/:ticket_id/attempts", get(get_attempts))
        // Gate scanners
        .route("/scan", post(scan))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(state: Arc<GateState>) -> anyhow::Result<()> {
    let per_second = state.config.rate_limit_per_sec;
    let burst = state.config.rate_limit_burst;
    // the governor takes a replenish interval, one token per period
    let period_ms = (1_000 / per_second.max(1)).max(1);
    let governor_conf = GovernorConfigBuilder::default()
        .per_millisecond(period_ms)
        .burst_size(burst)
        .key_extractor(tower_governor::key_extractor::SmartIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow::anyhow!("Invalid rate limit: {}/s burst {}", per_second, burst))?;

    let app = router(state.clone()).layer(GovernorLayer {
        config: Arc::new(governor_conf),
    });

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        "Gate server listening on {} (rate limited: {} req/s per IP, burst {})",
        addr, per_second, burst
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_info(State(state): State<Arc<GateState>>) -> Json<ServerInfo> {
    let params = state.guard.params();
    Json(ServerInfo {
        window_secs: params.window_secs,
        proof_bytes: params.proof_bytes,
        server_time: state.guard.now(),
        accepted_skew_windows: ACCEPTED_SKEW_WINDOWS,
    })
}

fn parse_ticket_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| GateError::NotFound(raw.to_string()))
}

async fn issue_tickets(
    State(state): State<Arc<GateState>>,
    headers: HeaderMap,
    Json(req): Json<IssueRequest>,
) -> Result<Json<IssueResponse>> {
    let issuer = state.identify(&headers).await?;
    let tickets = state.issuance.issue(req, &issuer).await?;
    Ok(Json(IssueResponse { tickets }))
}

/// Owner, staff or admin. The ticket row never carries the secret.
async fn get_ticket(
    State(state): State<Arc<GateState>>,
    headers: HeaderMap,
    Path(ticket_id): Path<String>,
) -> Result<Json<Ticket>> {
    let requester = state.identify(&headers).await?;
    let id = parse_ticket_id(&ticket_id)?;
    let ticket = state
        .ledger
        .get_ticket(id)
        .await?
        .ok_or_else(|| GateError::NotFound(ticket_id.clone()))?;

    if ticket.owner_id != requester.user_id && !requester.can_scan() {
        return Err(GateError::Unauthorized(format!(
            "{} cannot view ticket {}",
            requester.user_id, ticket_id
        )));
    }
    Ok(Json(ticket))
}

async fn get_display_secret(
    State(state): State<Arc<GateState>>,
    headers: HeaderMap,
    Path(ticket_id): Path<String>,
) -> Result<Json<DisplaySecret>> {
    let requester = state.identify(&headers).await?;
    let id = parse_ticket_id(&ticket_id)?;
    let secret = state.secrets.fetch_for_display(id, &requester).await?;
    debug!("Display secret for {} handed to {}", id, requester.user_id);

    let params = state.guard.params();
    Ok(Json(DisplaySecret {
        ticket_id: id,
        secret,
        window_secs: params.window_secs,
        proof_bytes: params.proof_bytes,
        server_time: state.guard.now(),
    }))
}

async fn void_ticket(
    State(state): State<Arc<GateState>>,
    headers: HeaderMap,
    Path(ticket_id): Path<String>,
) -> Result<Json<Ticket>> {
    let admin = state.identify(&headers).await?;
    admin.require_admin()?;
    let id = parse_ticket_id(&ticket_id)?;
    Ok(Json(state.issuance.void(id, &admin).await?))
}

async fn get_attempts(
    State(state): State<Arc<GateState>>,
    headers: HeaderMap,
    Path(ticket_id): Path<String>,
) -> Result<Json<AttemptsResponse>> {
    state.identify(&headers).await?.require_scanner()?;
    let attempts = state
        .ledger
        .attempts_for(&canonical_ticket_id(&ticket_id))
        .await?;
    Ok(Json(AttemptsResponse { attempts }))
}

/// Decisions are 200 with an outcome; only infrastructure trouble is an error status.
async fn scan(
    State(state): State<Arc<GateState>>,
    headers: HeaderMap,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanResponse>> {
    let staff = state.identify(&headers).await?;
    staff.require_scanner()?;
    debug!("{} scanning at {}", staff.user_id, req.scanner_id);

    let ticket_id = canonical_ticket_id(&req.ticket_id);
    let decision = state.verifier.verify_bounded(req).await?;
    Ok(Json(decision.into_response(&ticket_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Role, StaticIdentities};
    use crate::store::LocalStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use gatepass_sdk::proof::current_proof;
    use gatepass_sdk::types::{ScanOutcome, TicketState};
    use gatepass_sdk::ManualClock;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn person(user_id: &str, role: Role) -> Identity {
        Identity {
            user_id: user_id.into(),
            display_name: format!("{} (display)", user_id),
            role,
        }
    }

    fn app() -> (Router, Arc<ManualClock>) {
        let store = Arc::new(LocalStore::in_memory());
        let identities = Arc::new(StaticIdentities::new(vec![
            ("tok-admin".to_string(), person("org", Role::Admin)),
            ("tok-staff".to_string(), person("crew-1", Role::Staff)),
            ("tok-alice".to_string(), person("alice", Role::Holder)),
            ("tok-bob".to_string(), person("bob", Role::Holder)),
        ]));
        let clock = Arc::new(ManualClock::new(1_739_628_182));
        let state = GateState::new(
            GateConfig::default(),
            store.clone(),
            store,
            Arc::new(Sealer::generate()),
            identities,
            clock.clone(),
        );
        (router(Arc::new(state)), clock)
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn issue_one(app: &Router) -> String {
        let (status, body) = call(
            app,
            "POST",
            "/tickets",
            Some("tok-admin"),
            Some(json!({"event_id": "evt-1", "tier": "premium", "owner_id": "alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["tickets"][0]["ticket_id"].as_str().unwrap().to_string()
    }

    async fn holder_proof(app: &Router, ticket_id: &str) -> String {
        let (status, body) = call(
            app,
            "GET",
            &format!("/tickets/{}/secret", ticket_id),
            Some("tok-alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let display: DisplaySecret = serde_json::from_value(body).unwrap();
        let params =
            gatepass_sdk::ProofParams::new(display.window_secs, display.proof_bytes).unwrap();
        current_proof(&display.secret, display.server_time, &params).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_info() {
        let (app, _) = app();
        let (status, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (_, info) = call(&app, "GET", "/info", None, None).await;
        assert_eq!(info["window_secs"], 30);
        assert_eq!(info["proof_bytes"], 10);
        assert_eq!(info["server_time"], 1_739_628_182u64);
        assert_eq!(info["accepted_skew_windows"], 1);
    }

    #[tokio::test]
    async fn test_admit_then_already_used() {
        let (app, clock) = app();
        let ticket_id = issue_one(&app).await;
        let proof = holder_proof(&app, &ticket_id).await;
        let scan_body = json!({"ticket_id": ticket_id, "proof": proof, "scanner_id": "gate-2"});

        let (status, body) = call(&app, "POST", "/scan", Some("tok-staff"), Some(scan_body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "admit");
        assert_eq!(body["tier"], "premium");
        assert_eq!(body["holder_display_name"], "alice (display)");

        clock.advance(30);
        let (status, body) = call(&app, "POST", "/scan", Some("tok-staff"), Some(scan_body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "already_used");
        assert_eq!(body["message"], "Already used at gate-2, 14:03:02 UTC");

        let (_, ticket) = call(&app, "GET", &format!("/tickets/{}", ticket_id), Some("tok-alice"), None).await;
        assert_eq!(ticket["state"], "used");
        assert!(ticket.get("secret").is_none());

        let (status, body) = call(
            &app,
            "GET",
            &format!("/tickets/{}/attempts", ticket_id),
            Some("tok-staff"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let attempts = body["attempts"].as_array().unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0]["outcome"], "admit");
        assert_eq!(attempts[1]["outcome"], "already_used");
    }

    #[tokio::test]
    async fn test_secret_is_owner_only() {
        let (app, _) = app();
        let ticket_id = issue_one(&app).await;
        let uri = format!("/tickets/{}/secret", ticket_id);

        let (status, body) = call(&app, "GET", &uri, Some("tok-bob"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);
        assert!(body.get("secret").is_none());

        let (status, _) = call(&app, "GET", &uri, Some("tok-staff"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, "GET", &uri, Some("tok-forged"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, "GET", &format!("/tickets/{}", ticket_id), Some("tok-bob"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_scan_requires_staff() {
        let (app, _) = app();
        let ticket_id = issue_one(&app).await;
        let proof = holder_proof(&app, &ticket_id).await;
        let (status, _) = call(
            &app,
            "POST",
            "/scan",
            Some("tok-alice"),
            Some(json!({"ticket_id": ticket_id, "proof": proof, "scanner_id": "gate-2"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_malformed_ticket_id_is_audited_not_found() {
        let (app, _) = app();
        let (status, body) = call(
            &app,
            "POST",
            "/scan",
            Some("tok-staff"),
            Some(json!({"ticket_id": "T1-100-garbage", "proof": "zz", "scanner_id": "gate-2"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "not_found");

        let (_, body) = call(&app, "GET", "/tickets/T1-100-garbage/attempts", Some("tok-staff"), None).await;
        assert_eq!(body["attempts"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_uppercase_ticket_id_lands_in_attempts() {
        let (app, _) = app();
        let ticket_id = issue_one(&app).await;
        let proof = holder_proof(&app, &ticket_id).await;
        let upper = ticket_id.to_uppercase();

        let (_, body) = call(
            &app,
            "POST",
            "/scan",
            Some("tok-staff"),
            Some(json!({"ticket_id": upper, "proof": proof, "scanner_id": "gate-2"})),
        )
        .await;
        assert_eq!(body["outcome"], "admit");
        assert_eq!(body["ticket_id"], ticket_id.as_str());

        for id in [&ticket_id, &upper] {
            let (status, body) = call(
                &app,
                "GET",
                &format!("/tickets/{}/attempts", id),
                Some("tok-staff"),
                None,
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["attempts"].as_array().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_void_then_scan() {
        let (app, _) = app();
        let ticket_id = issue_one(&app).await;
        let proof = holder_proof(&app, &ticket_id).await;
        let void_uri = format!("/tickets/{}/void", ticket_id);

        let (status, _) = call(&app, "POST", &void_uri, Some("tok-staff"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&app, "POST", &void_uri, Some("tok-admin"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], serde_json::to_value(TicketState::Void).unwrap());

        let (status, _) = call(&app, "POST", &void_uri, Some("tok-admin"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = call(
            &app,
            "POST",
            "/scan",
            Some("tok-staff"),
            Some(json!({"ticket_id": ticket_id, "proof": proof, "scanner_id": "gate-2"})),
        )
        .await;
        assert_eq!(
            body["outcome"],
            serde_json::to_value(ScanOutcome::Void).unwrap()
        );
    }

    #[tokio::test]
    async fn test_issue_rejections() {
        let (app, _) = app();
        let order = json!({"event_id": "evt-1", "tier": "vip", "owner_id": "alice", "quantity": 11});
        let (status, body) = call(&app, "POST", "/tickets", Some("tok-admin"), Some(order)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["retryable"], false);

        let order = json!({"event_id": "evt-1", "tier": "vip", "owner_id": "alice"});
        let (status, _) = call(&app, "POST", "/tickets", Some("tok-staff"), Some(order)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, "GET", "/tickets/not-a-uuid", Some("tok-staff"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
