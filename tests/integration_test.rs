// Integration tests for the exam session server
// These tests verify end-to-end behavior across the HTTP endpoints and the realtime
// WebSocket channel, against a server started with DEMO_SEED=true and the default
// JWT secret.

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const HTTP_BASE: &str = "http://127.0.0.1:8080";
const WS_BASE: &str = "ws://127.0.0.1:8080";
const DEV_SECRET: &str = "dev-secret-change-me";
const DEMO_USER: &str = "demo-user";
const DEMO_TEST: &str = "demo-test";
const DEMO_ANSWERS: [&str; 4] = ["4", "54", "25", "8"];

type WsRead = futures::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

#[derive(serde::Serialize)]
struct TokenClaims {
    sub: String,
    exp: usize,
}

fn demo_token() -> String {
    let exp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as usize
        + 3600;

    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &TokenClaims {
            sub: DEMO_USER.to_string(),
            exp,
        },
        &jsonwebtoken::EncodingKey::from_secret(DEV_SECRET.as_bytes()),
    )
    .expect("Failed to sign token")
}

fn exam_ws_url(token: &str) -> String {
    format!("{}/exam?token={}", WS_BASE, urlencoding::encode(token))
}

async fn start_exam(
    client: &reqwest::Client,
    force_new: bool,
) -> (reqwest::StatusCode, serde_json::Value) {
    let resp = client
        .post(format!("{}/exam/start", HTTP_BASE))
        .header("Authorization", format!("Bearer {}", demo_token()))
        .json(&json!({ "testId": DEMO_TEST, "forceNew": force_new }))
        .send()
        .await
        .expect("Server not running. Start it with 'DEMO_SEED=true cargo run --bin exam-server'");

    let status = resp.status();
    let body = resp.json().await.expect("Response was not JSON");
    (status, body)
}

/// Reads events until one of the wanted type arrives. The per-second
/// time-update broadcasts make single-read assertions unreliable, so
/// unrelated events are skipped.
async fn next_event(read: &mut WsRead, wanted: &str, secs: u64) -> serde_json::Value {
    let deadline = Instant::now() + Duration::from_secs(secs);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        assert!(!remaining.is_zero(), "Timed out waiting for {wanted}");

        match timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let event: serde_json::Value =
                    serde_json::from_str(&text).expect("Event was not JSON");
                if event["type"] == wanted {
                    return event;
                }
            }
            Ok(Some(Ok(_))) => continue,
            other => panic!("Connection ended while waiting for {wanted}: {other:?}"),
        }
    }
}

/// Test HTTP health check endpoint
/// Verifies that the server responds with healthy status
#[tokio::test]
#[ignore] // Requires running server
async fn test_health_endpoint() {
    let client = reqwest::Client::new();

    match client.get(format!("{}/exam/health", HTTP_BASE)).send().await {
        Ok(resp) => {
            assert_eq!(resp.status(), 200, "Health endpoint should return 200 OK");

            let body: serde_json::Value = resp.json().await.unwrap();
            assert_eq!(body["status"], "healthy");
            assert_eq!(body["service"], "Exam Session Server");
            assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        }
        Err(e) => {
            eprintln!(
                "Server not running: {}. Start it with 'DEMO_SEED=true cargo run --bin exam-server' before running integration tests.",
                e
            );
            panic!("Cannot connect to server");
        }
    }
}

/// Test HTTP config endpoint
/// Verifies that the evaluator configuration is exposed without secrets
#[tokio::test]
#[ignore] // Requires running server
async fn test_config_endpoint() {
    let client = reqwest::Client::new();

    match client.get(format!("{}/exam/config", HTTP_BASE)).send().await {
        Ok(resp) => {
            assert_eq!(resp.status(), 200, "Config endpoint should return 200 OK");

            let body: serde_json::Value = resp.json().await.unwrap();
            assert!(body.is_object(), "Config should return a JSON object");
            assert!(body["evaluator"]["provider"].is_string());
            assert!(body["evaluator"]["model"].is_string());
        }
        Err(e) => {
            eprintln!("Server not running: {}", e);
            panic!("Cannot connect to server");
        }
    }
}

/// Test WebSocket connection establishment
/// Verifies that an authenticated connection is accepted and stays open
#[tokio::test]
#[ignore] // Requires running server
async fn test_websocket_connection() {
    let (ws_stream, _) = connect_async(&exam_ws_url(&demo_token()))
        .await
        .expect("WebSocket connection failed");
    let (_, mut read) = ws_stream.split();

    // No rejection event means the credential was accepted.
    match timeout(Duration::from_millis(800), read.next()).await {
        Err(_) => {}
        other => panic!("Expected the session to stay open, got {other:?}"),
    }
}

/// Test missing-token rejection
/// Verifies that a connection without a token gets one error event and is closed
#[tokio::test]
#[ignore] // Requires running server
async fn test_websocket_requires_token() {
    let url = format!("{}/exam", WS_BASE);
    let (ws_stream, _) = connect_async(&url).await.expect("Failed to connect");
    let (_, mut read) = ws_stream.split();

    let event = match timeout(Duration::from_secs(2), read.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            serde_json::from_str::<serde_json::Value>(&text).unwrap()
        }
        other => panic!("Expected an error event, got {other:?}"),
    };
    assert_eq!(event["type"], "error");
    assert!(event["message"].as_str().unwrap().contains("Authentication"));

    match timeout(Duration::from_secs(2), read.next()).await {
        Ok(None) | Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) => {}
        other => panic!("Expected the connection to close, got {other:?}"),
    }
}

/// Test invalid-token rejection
/// Verifies that a connection with a bad token gets one error event and is closed
#[tokio::test]
#[ignore] // Requires running server
async fn test_websocket_rejects_bad_token() {
    let url = format!("{}/exam?token=not-a-real-token", WS_BASE);
    let (ws_stream, _) = connect_async(&url).await.expect("Failed to connect");
    let (_, mut read) = ws_stream.split();

    let event = match timeout(Duration::from_secs(2), read.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            serde_json::from_str::<serde_json::Value>(&text).unwrap()
        }
        other => panic!("Expected an error event, got {other:?}"),
    };
    assert_eq!(event["type"], "error");
    assert!(event["message"].as_str().unwrap().contains("Authentication"));

    match timeout(Duration::from_secs(2), read.next()).await {
        Ok(None) | Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) => {}
        other => panic!("Expected the connection to close, got {other:?}"),
    }
}

/// Test joining a non-existent exam
/// Verifies that application errors surface as events without closing the connection
#[tokio::test]
#[ignore] // Requires running server
async fn test_join_unknown_exam_reports_error() {
    let (ws_stream, _) = connect_async(&exam_ws_url(&demo_token()))
        .await
        .expect("Failed to connect");
    let (mut write, mut read) = ws_stream.split();

    write
        .send(Message::Text(
            json!({ "type": "join-exam", "examId": "no-such-exam" }).to_string(),
        ))
        .await
        .expect("Failed to send join-exam");

    let event = next_event(&mut read, "error", 5).await;
    assert!(event["message"].as_str().unwrap().contains("not found"));

    // Still writable and serving after the failure.
    write
        .send(Message::Text(
            json!({ "type": "join-exam", "examId": "still-missing" }).to_string(),
        ))
        .await
        .expect("Failed to send second join-exam");

    let event = next_event(&mut read, "error", 5).await;
    assert!(event["message"].as_str().unwrap().contains("not found"));
}

/// Test the complete session flow
/// Start over HTTP, join over WebSocket, answer every question, finish, check the score
#[tokio::test]
#[ignore] // Requires running server with DEMO_SEED=true
async fn test_full_exam_flow() {
    let client = reqwest::Client::new();

    let (status, started) = start_exam(&client, true).await;
    assert_eq!(status, 201, "Start should create a session: {started}");
    let exam_id = started["examId"].as_str().unwrap().to_string();
    assert_eq!(started["roomToken"].as_str().unwrap().len(), 32);
    assert_eq!(started["timeLimit"], 30);

    let (ws_stream, _) = connect_async(&exam_ws_url(&demo_token()))
        .await
        .expect("Failed to connect");
    let (mut write, mut read) = ws_stream.split();

    write
        .send(Message::Text(
            json!({ "type": "join-exam", "examId": exam_id }).to_string(),
        ))
        .await
        .expect("Failed to send join-exam");

    let joined = next_event(&mut read, "exam-joined", 5).await;
    assert_eq!(
        joined["test"]["questions"].as_array().unwrap().len(),
        DEMO_ANSWERS.len()
    );
    assert!(joined["remainingTime"].as_u64().unwrap() > 0);

    for (index, answer) in DEMO_ANSWERS.iter().enumerate() {
        write
            .send(Message::Text(
                json!({
                    "type": "submit-answer",
                    "examId": exam_id,
                    "questionIndex": index,
                    "answer": answer,
                })
                .to_string(),
            ))
            .await
            .expect("Failed to send submit-answer");

        let feedback = next_event(&mut read, "answer-feedback", 15).await;
        assert_eq!(feedback["questionIndex"], index);
        assert_eq!(
            feedback["isCorrect"], true,
            "Answer {index} should be graded correct: {feedback}"
        );
    }

    write
        .send(Message::Text(
            json!({ "type": "finish-exam", "examId": exam_id }).to_string(),
        ))
        .await
        .expect("Failed to send finish-exam");

    let finished = next_event(&mut read, "exam-finished", 5).await;
    assert_eq!(finished["examId"], exam_id.as_str());
    assert_eq!(finished["score"], 100);
    assert_eq!(finished["totalQuestions"], DEMO_ANSWERS.len());
    assert_eq!(finished["correctAnswers"], DEMO_ANSWERS.len());
    assert_eq!(finished["status"], "completed");
}

/// Test duplicate start protection
/// Verifies that a second start is rejected until forceNew expires the first exam
#[tokio::test]
#[ignore] // Requires running server with DEMO_SEED=true
async fn test_duplicate_start_is_blocked() {
    let client = reqwest::Client::new();

    let (status, first) = start_exam(&client, true).await;
    assert_eq!(status, 201);
    let first_id = first["examId"].as_str().unwrap().to_string();

    let (status, blocked) = start_exam(&client, false).await;
    assert_eq!(status, 400, "Second start should be rejected: {blocked}");
    assert_eq!(
        blocked["examId"],
        first_id.as_str(),
        "Rejection should name the running exam"
    );

    let (status, forced) = start_exam(&client, true).await;
    assert_eq!(status, 201);
    assert_ne!(forced["examId"], first_id.as_str());
}

/// Test admin expiry
/// Verifies that force-finish expires a running exam exactly once
#[tokio::test]
#[ignore] // Requires running server with DEMO_SEED=true
async fn test_force_finish_expires_exam() {
    let client = reqwest::Client::new();

    let (status, started) = start_exam(&client, true).await;
    assert_eq!(status, 201);
    let exam_id = started["examId"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{}/exam/force-finish/{}", HTTP_BASE, exam_id))
        .header("Authorization", format!("Bearer {}", demo_token()))
        .send()
        .await
        .expect("Failed to reach server");
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["examId"], exam_id.as_str());
    assert_eq!(body["status"], "expired");

    // Terminal exams reject a second expiry.
    let again = client
        .post(format!("{}/exam/force-finish/{}", HTTP_BASE, exam_id))
        .header("Authorization", format!("Bearer {}", demo_token()))
        .send()
        .await
        .expect("Failed to reach server");
    assert_eq!(again.status(), 400);
}

/// Test the countdown broadcast
/// Verifies that joined members receive time-update once per second
#[tokio::test]
#[ignore] // Requires running server with DEMO_SEED=true
async fn test_time_update_broadcast() {
    let client = reqwest::Client::new();

    let (status, started) = start_exam(&client, true).await;
    assert_eq!(status, 201);
    let exam_id = started["examId"].as_str().unwrap().to_string();

    let (ws_stream, _) = connect_async(&exam_ws_url(&demo_token()))
        .await
        .expect("Failed to connect");
    let (mut write, mut read) = ws_stream.split();

    write
        .send(Message::Text(
            json!({ "type": "join-exam", "examId": exam_id }).to_string(),
        ))
        .await
        .expect("Failed to send join-exam");

    next_event(&mut read, "exam-joined", 5).await;

    let update = next_event(&mut read, "time-update", 3).await;
    let remaining = update["remainingTime"].as_u64().unwrap();
    assert!(
        remaining > 0 && remaining <= 30 * 60,
        "Remaining {remaining}s out of range"
    );
}
