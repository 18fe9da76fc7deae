//! End-to-end tests against a throwaway axum server.
//!
//! Each test starts its own server on port 0 and counts the requests it
//! receives, so attempt counts can be checked from the server's side too.
//! Most scenarios run once per execution mode.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use futures::StreamExt;
use tether::channel::ChannelLoader;
use tether::router::{Capabilities, TransportChoice, select_transport};
use tether::{
    CancelSignal, ClientOptions, ExecutionMode, FailureKind, HttpClient, RequestSpec, ResponseKind,
};

const MODES: [ExecutionMode; 3] = [
    ExecutionMode::Isolated,
    ExecutionMode::Local,
    ExecutionMode::Offload,
];

type Hits = Arc<AtomicU32>;

// ── Server ───────────────────────────────────────────────────────────

async fn status(State(hits): State<Hits>, Path(code): Path<u16>) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, "status")
}

async fn ok(State(hits): State<Hits>) -> &'static str {
    hits.fetch_add(1, Ordering::SeqCst);
    "ok"
}

async fn json(State(hits): State<Hits>) -> axum::Json<serde_json::Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    axum::Json(serde_json::json!({"message": "ok"}))
}

async fn invalid_utf8(State(hits): State<Hits>) -> Vec<u8> {
    hits.fetch_add(1, Ordering::SeqCst);
    vec![0xFF, 0xFE, 0xFD]
}

async fn echo(State(hits): State<Hits>, body: Bytes) -> Bytes {
    hits.fetch_add(1, Ordering::SeqCst);
    body
}

/// Fails twice, then answers.
async fn flaky(State(hits): State<Hits>) -> (StatusCode, &'static str) {
    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
        (StatusCode::SERVICE_UNAVAILABLE, "busy")
    } else {
        (StatusCode::OK, "recovered")
    }
}

/// Reads the whole body every time, but only echoes it from the second hit on.
async fn flaky_echo(State(hits): State<Hits>, body: Bytes) -> (StatusCode, Bytes) {
    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
        (StatusCode::BAD_GATEWAY, Bytes::new())
    } else {
        (StatusCode::OK, body)
    }
}

async fn slow(State(hits): State<Hits>) -> &'static str {
    hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(30)).await;
    "too late"
}

/// Emits a numbered line every 20ms for a long time.
async fn stream(State(hits): State<Hits>) -> Body {
    hits.fetch_add(1, Ordering::SeqCst);
    let lines = futures::stream::unfold(0u32, |i| async move {
        if i >= 1_000 {
            return None;
        }
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Some((Ok::<_, std::io::Error>(Bytes::from(format!("line {i}\n"))), i + 1))
    });
    Body::from_stream(lines)
}

/// Spawn a test server on port 0 and return its base URL and hit counter.
async fn spawn_server() -> (String, Hits) {
    let hits: Hits = Arc::new(AtomicU32::new(0));
    let app = Router::new()
        .route("/status/{code}", get(status))
        .route("/ok", get(ok))
        .route("/json", get(json))
        .route("/invalid-utf8", get(invalid_utf8))
        .route("/echo", post(echo))
        .route("/flaky", get(flaky))
        .route("/flaky-echo", post(flaky_echo))
        .route("/slow", get(slow))
        .route("/stream", get(stream))
        .with_state(Arc::clone(&hits));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), hits)
}

fn client(mode: ExecutionMode, retries: u32) -> HttpClient {
    let options = ClientOptions::default()
        .with_retries(retries)
        .with_retry_delay_ms(0)
        .with_no_logs(true)
        .with_execution(mode);
    HttpClient::with_options(options).unwrap()
}

// ── Retry accounting ─────────────────────────────────────────────────

#[tokio::test]
async fn persistent_429_exhausts_budget_in_every_mode() {
    for mode in MODES {
        let (base, hits) = spawn_server().await;
        let err = client(mode, 4)
            .get(&format!("{base}/status/429"), ResponseKind::Text)
            .await
            .unwrap_err();
        assert_eq!(err.retry_attempts, 4, "{mode:?}");
        assert_eq!(err.status_code, Some(429), "{mode:?}");
        assert_eq!(err.kind(), FailureKind::RetryExhausted, "{mode:?}");
        assert_eq!(err.partial_data.as_deref(), Some(&b"status"[..]), "{mode:?}");
        assert_eq!(hits.load(Ordering::SeqCst), 5, "{mode:?}");
    }
}

#[tokio::test]
async fn not_found_fails_without_retrying() {
    for mode in MODES {
        let (base, hits) = spawn_server().await;
        let err = client(mode, 8)
            .get(&format!("{base}/status/404"), ResponseKind::Text)
            .await
            .unwrap_err();
        assert_eq!(err.retry_attempts, 0, "{mode:?}");
        assert_eq!(err.kind(), FailureKind::Terminal, "{mode:?}");
        assert_eq!(hits.load(Ordering::SeqCst), 1, "{mode:?}");
    }
}

#[tokio::test]
async fn flaky_endpoint_recovers() {
    for mode in MODES {
        let (base, hits) = spawn_server().await;
        let response = client(mode, 8)
            .get(&format!("{base}/flaky"), ResponseKind::Text)
            .await
            .unwrap();
        assert_eq!(response.data.as_text(), Some("recovered"), "{mode:?}");
        assert_eq!(response.retry_attempts, 2, "{mode:?}");
        assert_eq!(response.status_code, Some(200), "{mode:?}");
        assert_eq!(hits.load(Ordering::SeqCst), 3, "{mode:?}");
    }
}

#[tokio::test]
async fn refused_connection_is_retried_without_status() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    for mode in MODES {
        let err = client(mode, 2)
            .get(&format!("http://{addr}/"), ResponseKind::Text)
            .await
            .unwrap_err();
        assert_eq!(err.retry_attempts, 2, "{mode:?}");
        assert_eq!(err.status_code, None, "{mode:?}");
        assert_eq!(err.kind(), FailureKind::RetryExhausted, "{mode:?}");
    }
}

// ── Decoding ─────────────────────────────────────────────────────────

#[tokio::test]
async fn bytes_kind_returns_raw_octets() {
    for mode in MODES {
        let (base, _hits) = spawn_server().await;
        let response = client(mode, 0)
            .get(&format!("{base}/ok"), ResponseKind::Bytes)
            .await
            .unwrap();
        assert_eq!(response.data.as_bytes(), Some(&[0x6F, 0x6B][..]), "{mode:?}");
    }
}

#[tokio::test]
async fn json_kind_parses_message() {
    #[derive(serde::Deserialize)]
    struct Message {
        message: String,
    }

    for mode in MODES {
        let (base, _hits) = spawn_server().await;
        let client = client(mode, 0);
        let response = client.get(&format!("{base}/json"), ResponseKind::Json).await.unwrap();
        assert_eq!(response.data.as_json().unwrap()["message"], "ok", "{mode:?}");
        assert!(response.headers.contains_key("content-type"), "{mode:?}");

        let typed: Message = client.get_json(&format!("{base}/json")).await.unwrap();
        assert_eq!(typed.message, "ok", "{mode:?}");
    }
}

#[tokio::test]
async fn invalid_utf8_is_a_decode_failure() {
    for mode in MODES {
        let (base, hits) = spawn_server().await;
        let err = client(mode, 8)
            .get(&format!("{base}/invalid-utf8"), ResponseKind::Text)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Decode, "{mode:?}");
        assert_eq!(err.status_code, None, "{mode:?}");
        assert_eq!(err.retry_attempts, 0, "{mode:?}");
        assert_eq!(hits.load(Ordering::SeqCst), 1, "{mode:?}");
    }
}

// ── Request bodies ───────────────────────────────────────────────────

#[tokio::test]
async fn echoed_bytes_keep_their_length() {
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    for mode in MODES {
        let (base, _hits) = spawn_server().await;
        let response = client(mode, 0)
            .post(&format!("{base}/echo"), payload.clone(), ResponseKind::Bytes)
            .await
            .unwrap();
        let echoed = response.data.as_bytes().unwrap();
        assert_eq!(echoed.len(), payload.len(), "{mode:?}");
        assert_eq!(echoed, &payload[..], "{mode:?}");
    }
}

#[tokio::test]
async fn stream_body_is_replayed_on_retry() {
    let (base, hits) = spawn_server().await;
    let chunks: Vec<Result<Bytes, std::io::Error>> = ["alpha-", "beta-", "gamma"]
        .into_iter()
        .map(|c| Ok(Bytes::from_static(c.as_bytes())))
        .collect();
    let spec = RequestSpec::post(format!("{base}/flaky-echo"))
        .with_stream_body(Box::pin(futures::stream::iter(chunks)))
        .expect(ResponseKind::Text);

    let response = client(ExecutionMode::Isolated, 3).request(spec).await.unwrap();
    assert_eq!(response.data.as_text(), Some("alpha-beta-gamma"));
    assert_eq!(response.retry_attempts, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn broken_stream_body_fails_instead_of_sending_a_prefix() {
    for mode in MODES {
        let (base, hits) = spawn_server().await;
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"alpha-")),
            Err(std::io::Error::other("source broke")),
            Ok(Bytes::from_static(b"omega")),
        ];
        let spec = RequestSpec::post(format!("{base}/echo"))
            .with_stream_body(Box::pin(futures::stream::iter(chunks)))
            .expect(ResponseKind::Text);

        let err = client(mode, 3).request(spec).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Transport, "{mode:?}");
        assert_eq!(err.retry_attempts, 0, "{mode:?}");
        assert!(err.to_string().contains("source broke"), "{mode:?}: {err}");
        assert_eq!(hits.load(Ordering::SeqCst), 0, "{mode:?}");
    }
}

#[tokio::test]
async fn progress_reports_every_byte_sent() {
    let (base, _hits) = spawn_server().await;
    let reports: Arc<Mutex<Vec<(u64, Option<u64>)>>> = Arc::default();
    let sink = Arc::clone(&reports);
    let spec = RequestSpec::post(format!("{base}/echo"))
        .with_body(vec![7u8; 64 * 1024])
        .expect(ResponseKind::Bytes)
        .on_progress(move |sent, total| sink.lock().unwrap().push((sent, total)));

    let response = client(ExecutionMode::Isolated, 0).request(spec).await.unwrap();
    assert_eq!(response.data.as_bytes().map(<[u8]>::len), Some(64 * 1024));

    let reports = reports.lock().unwrap();
    assert!(reports.len() >= 4);
    assert_eq!(reports.last(), Some(&(65_536, Some(65_536))));
    assert!(reports.windows(2).all(|w| w[0].0 < w[1].0));
}

// ── Routing ──────────────────────────────────────────────────────────

#[tokio::test]
async fn isolated_mode_runs_through_the_worker() {
    let (base, hits) = spawn_server().await;
    let spec = RequestSpec::get(format!("{base}/ok"));
    assert_eq!(
        select_transport(
            &spec,
            Capabilities {
                isolation_supported: true,
                channel_loaded: true,
            }
        ),
        TransportChoice::Isolated
    );

    let served = ChannelLoader::calls_served();
    let response = client(ExecutionMode::Isolated, 0).request(spec).await.unwrap();
    assert_eq!(response.data.as_text(), Some("ok"));
    assert!(ChannelLoader::is_loaded());
    assert!(ChannelLoader::calls_served() > served);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn local_mode_runs_in_the_callers_task() {
    let (base, _hits) = spawn_server().await;
    let spec = RequestSpec::get(format!("{base}/ok"));
    assert_eq!(
        select_transport(
            &spec,
            Capabilities {
                isolation_supported: false,
                channel_loaded: true,
            }
        ),
        TransportChoice::Local
    );
    let response = client(ExecutionMode::Local, 0).request(spec).await.unwrap();
    assert_eq!(response.data.as_text(), Some("ok"));
}

// ── Cancellation ─────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_stream_is_truncated_with_reason() {
    let (base, hits) = spawn_server().await;
    let signal = CancelSignal::new();
    let mut stream = client(ExecutionMode::Isolated, 8)
        .get_stream(&format!("{base}/stream"), Some(signal.clone()))
        .await
        .unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert!(first.starts_with(b"line 0"));

    signal.cancel("enough data");
    let mut tail = Vec::new();
    while let Some(item) = stream.next().await {
        tail.push(item);
    }
    let err = tail.pop().unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.cause.to_string(), "cancelled: enough data");
    assert!(tail.iter().all(Result::is_ok));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancel_aborts_in_flight_attempt() {
    let (base, hits) = spawn_server().await;
    let signal = CancelSignal::new();
    let trigger = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel("user pressed stop");
    });

    let started = std::time::Instant::now();
    let err = client(ExecutionMode::Isolated, 8)
        .request(RequestSpec::get(format!("{base}/slow")).with_cancel(signal))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.retry_attempts, 0);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ── Custom transports ────────────────────────────────────────────────

struct CountingInterceptor {
    requests: Arc<AtomicU32>,
    responses: Arc<AtomicU32>,
}

impl tether::Interceptor for CountingInterceptor {
    fn on_request(&self, _request: &tether::transport::PreparedRequest, _attempt: u32) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn on_response(
        &self,
        _request: &tether::transport::PreparedRequest,
        _outcome: &tether::outcome::Outcome,
        _elapsed: Duration,
    ) {
        self.responses.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn interceptors_see_every_physical_attempt() {
    let (base, _hits) = spawn_server().await;
    let requests = Arc::new(AtomicU32::new(0));
    let responses = Arc::new(AtomicU32::new(0));
    let options = ClientOptions::default().with_retry_delay_ms(0).with_no_logs(true);
    let transport = tether::LocalTransport::new(&options)
        .unwrap()
        .with_interceptor(CountingInterceptor {
            requests: Arc::clone(&requests),
            responses: Arc::clone(&responses),
        });
    let client = HttpClient::with_transport(options, Arc::new(transport));

    let response = client.get(&format!("{base}/flaky"), ResponseKind::Text).await.unwrap();
    assert_eq!(response.retry_attempts, 2);
    assert_eq!(requests.load(Ordering::SeqCst), 3);
    assert_eq!(responses.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn per_call_retry_budget_overrides_client_default() {
    let (base, hits) = spawn_server().await;
    let err = client(ExecutionMode::Isolated, 8)
        .request_with_retries(RequestSpec::get(format!("{base}/status/503")), 1, 0)
        .await
        .unwrap_err();
    assert_eq!(err.retry_attempts, 1);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
