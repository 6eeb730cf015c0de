use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use plaasjapie_backend::BackendClient;
use plaasjapie_core::ports::{EventFilter, RemoteBackend};
use plaasjapie_core::records::MessagePayload;
use plaasjapie_core::sync::SyncEntityType;
use plaasjapie_core::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct CapturedRequest {
    request_line: String,
    headers: HashMap<String, String>,
    body: String,
}

#[derive(Debug, Clone)]
struct MockResponse {
    status: u16,
    body: String,
}

fn respond(status: u16, body: &str) -> MockResponse {
    MockResponse {
        status,
        body: body.to_string(),
    }
}

fn api_error_body(code: &str, message: &str) -> String {
    format!(
        r#"{{"error":"error","code":"{}","message":"{}"}}"#,
        code, message
    )
}

fn header_end_offset(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

async fn read_http_request(stream: &mut tokio::net::TcpStream) -> Option<CapturedRequest> {
    let mut buffer = Vec::new();
    loop {
        let mut chunk = [0_u8; 2048];
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if header_end_offset(&buffer).is_some() {
            break;
        }
    }

    let header_end = header_end_offset(&buffer)?;
    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next()?.to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buffer[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 2048];
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Some(CapturedRequest {
        request_line,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Error",
    }
}

async fn write_http_response(
    stream: &mut tokio::net::TcpStream,
    status: u16,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text(status),
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

async fn start_mock_server(
    responses: Vec<MockResponse>,
) -> (
    String,
    Arc<Mutex<Vec<CapturedRequest>>>,
    tokio::task::JoinHandle<()>,
) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let captured = Arc::new(Mutex::new(Vec::<CapturedRequest>::new()));
    let scripted = Arc::new(Mutex::new(VecDeque::from(responses)));
    let captured_clone = Arc::clone(&captured);

    let handle = tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(value) => value,
                Err(_) => break,
            };
            let Some(request) = read_http_request(&mut stream).await else {
                continue;
            };
            captured_clone.lock().await.push(request);
            let next = scripted
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| respond(500, &api_error_body("INTERNAL", "unexpected request")));
            let _ = write_http_response(&mut stream, next.status, &next.body).await;
        }
    });

    (format!("http://{}", addr), captured, handle)
}

#[tokio::test]
async fn fetch_profile_sends_bearer_and_fills_missing_id() {
    let (base_url, captured, server) =
        start_mock_server(vec![respond(200, r#"{"name":"Anna","age":31}"#)]).await;

    let client = BackendClient::new(&base_url).expect("client");
    client.set_access_token(Some("token-1".to_string()));
    let profile = client.fetch_profile("user-1").await.expect("profile");

    assert_eq!(profile.id, "user-1");
    assert_eq!(profile.name.as_deref(), Some("Anna"));
    let requests = captured.lock().await.clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].request_line, "GET /api/v1/users/user-1 HTTP/1.1");
    assert_eq!(
        requests[0].headers.get("authorization").map(String::as_str),
        Some("Bearer token-1")
    );

    server.abort();
}

#[tokio::test]
async fn fetch_matches_unwraps_the_envelope() {
    let (base_url, captured, server) = start_mock_server(vec![respond(
        200,
        r#"{"matches":[{"id":"m-1","users":["user-1","user-2"],"profile":{"id":"user-2","name":"Jan"}},{"matchId":"m-2"}]}"#,
    )])
    .await;

    let client = BackendClient::new(&base_url).expect("client");
    let matches = client.fetch_matches("user-1").await.expect("matches");

    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].profile.as_ref().map(|p| p.id.as_str()), Some("user-2"));
    assert_eq!(matches[1].id, "m-2");
    let requests = captured.lock().await.clone();
    assert_eq!(requests[0].request_line, "GET /api/v1/users/user-1/matches HTTP/1.1");

    server.abort();
}

#[tokio::test]
async fn fetch_events_retries_transient_failures() {
    let (base_url, captured, server) = start_mock_server(vec![
        respond(503, &api_error_body("UNAVAILABLE", "try again")),
        respond(200, r#"{"events":[{"id":"e-1","title":"Oesfees","saved":true}]}"#),
    ])
    .await;

    let client = BackendClient::new(&base_url).expect("client");
    let filter = EventFilter {
        category: Some("fees".to_string()),
        limit: Some(10),
        ..EventFilter::default()
    };
    let events = client.fetch_events(&filter).await.expect("events");

    assert_eq!(events.len(), 1);
    assert!(events[0].saved);
    let requests = captured.lock().await.clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[1].request_line,
        "GET /api/v1/events?category=fees&limit=10 HTTP/1.1"
    );

    server.abort();
}

#[tokio::test]
async fn permanent_fetch_failure_is_not_retried() {
    let (base_url, captured, server) =
        start_mock_server(vec![respond(404, &api_error_body("NOT_FOUND", "no such user"))]).await;

    let client = BackendClient::new(&base_url).expect("client");
    let err = client.fetch_profile("ghost").await.expect_err("404");

    match err {
        Error::RemoteFetch { entity, message } => {
            assert_eq!(entity, SyncEntityType::Profiles);
            assert!(message.contains("NOT_FOUND: no such user"));
        }
        other => panic!("expected RemoteFetch, got {:?}", other),
    }
    assert_eq!(captured.lock().await.len(), 1);

    server.abort();
}

#[tokio::test]
async fn send_message_carries_idempotency_key() {
    let (base_url, captured, server) =
        start_mock_server(vec![respond(201, r#"{"messageId":"remote-42"}"#)]).await;

    let client = BackendClient::new(&base_url).expect("client");
    let mut payload = MessagePayload::text("Hallo daar").with_receiver("user-2");
    payload.client_message_id = Some("local-7".to_string());
    let id = client
        .send_message("match-1", "user-1", &payload)
        .await
        .expect("send");

    assert_eq!(id, "remote-42");
    let requests = captured.lock().await.clone();
    assert_eq!(requests[0].request_line, "POST /api/v1/matches/match-1/messages HTTP/1.1");
    assert_eq!(
        requests[0].headers.get("idempotency-key").map(String::as_str),
        Some("local-7")
    );
    let body: serde_json::Value = serde_json::from_str(&requests[0].body).expect("json body");
    assert_eq!(body["senderId"], "user-1");
    assert_eq!(body["text"], "Hallo daar");
    assert_eq!(body["clientMessageId"], "local-7");

    server.abort();
}

#[tokio::test]
async fn send_message_failure_is_attempted_once() {
    let (base_url, captured, server) =
        start_mock_server(vec![respond(500, &api_error_body("INTERNAL", "db down"))]).await;

    let client = BackendClient::new(&base_url).expect("client");
    let err = client
        .send_message("match-1", "user-1", &MessagePayload::text("hi"))
        .await
        .expect_err("500");

    assert!(matches!(err, Error::RemoteSend(_)));
    assert_eq!(captured.lock().await.len(), 1);

    server.abort();
}
