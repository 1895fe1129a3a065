use axum::{http::StatusCode, routing::get, Json, Router};
use gatepass_net::{Config, GateHttpClient, NetError};
use serde_json::json;

async fn spawn_server() -> String {
    let app = Router::new()
        .route("/ok", get(|| async { Json(json!({ "status": "ok" })) }))
        .route(
            "/forbidden",
            get(|| async {
                (
                    StatusCode::FORBIDDEN,
                    Json(json!({ "success": false, "error": "Not allowed" })),
                )
            }),
        )
        .route(
            "/busy",
            get(|| async {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "success": false, "error": "Verification unavailable" })),
                )
            }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                "late"
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_success_decodes_json() {
    let base = spawn_server().await;
    let client = GateHttpClient::new(Config::default().with_base_url(&base)).unwrap();
    let body: serde_json::Value = client.get_json("/ok").await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_client_error_is_terminal_and_carries_message() {
    let base = spawn_server().await;
    let client = GateHttpClient::new(Config::default().with_base_url(&base)).unwrap();
    let err = client.get("/forbidden").await.unwrap_err();
    match err {
        NetError::Status { status, message } => {
            assert_eq!(status, 403);
            assert_eq!(message, "Not allowed");
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let base = spawn_server().await;
    let client = GateHttpClient::new(Config::default().with_base_url(&base)).unwrap();
    let err = client.get("/busy").await.unwrap_err();
    assert!(err.is_transient(), "503 must be retryable: {:?}", err);
}

#[tokio::test]
async fn test_timeout_is_transient() {
    let base = spawn_server().await;
    let client =
        GateHttpClient::new(Config::default().with_base_url(&base).with_timeout_ms(50)).unwrap();
    let err = client.get("/slow").await.unwrap_err();
    assert!(err.is_transient(), "timeout must be retryable: {:?}", err);
}

#[tokio::test]
async fn test_zero_timeout_rejected() {
    let result = GateHttpClient::new(Config::default().with_timeout_ms(0));
    assert!(matches!(result, Err(NetError::Config(_))));
}
