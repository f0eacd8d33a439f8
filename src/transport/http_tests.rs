use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::broker::{Message, PubSub, Publisher};
use crate::discovery::PeerSource;
use crate::transport::http::HttpTransport;
use crate::utils::error::TransportError;

const WAIT: Duration = Duration::from_secs(5);
const NODE_ORIGIN: &str = "http://this-node:8000";

struct StaticPeers(Vec<String>);

impl PeerSource for StaticPeers {
    fn iter(&self) -> Box<dyn Iterator<Item = String> + Send> {
        Box::new(self.0.clone().into_iter())
    }
}

async fn start(
    engine: Arc<PubSub>,
    peers: Option<Arc<dyn PeerSource>>,
) -> (SocketAddr, CancellationToken) {
    let transport = HttpTransport::bind("127.0.0.1:0", NODE_ORIGIN.to_string(), engine, peers)
        .await
        .unwrap();
    let addr = transport.local_addr().unwrap();
    let token = CancellationToken::new();
    tokio::spawn(transport.run(token.clone()));
    (addr, token)
}

async fn wait_for_subscribers(engine: &PubSub, topic: &str, count: usize) {
    timeout(WAIT, async {
        while engine.subscriber_count(topic) != count {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriber count never settled");
}

#[tokio::test]
async fn test_publish_returns_accepted() {
    let engine = Arc::new(PubSub::new(100, 32));
    let (addr, _token) = start(engine, None).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/topic/user"))
        .body(r#"{"a":1}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
}

#[tokio::test]
async fn test_malformed_paths_are_rejected() {
    let engine = Arc::new(PubSub::new(100, 32));
    let (addr, _token) = start(engine, None).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/only-topic"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = client
        .get(format!("http://{addr}/a/b/c"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_other_methods_are_not_allowed() {
    let engine = Arc::new(PubSub::new(100, 32));
    let (addr, _token) = start(engine, None).await;

    let response = reqwest::Client::new()
        .delete(format!("http://{addr}/topic/user"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);
}

#[tokio::test]
async fn test_non_json_body_is_rejected() {
    let engine = Arc::new(PubSub::new(100, 32));
    let (addr, _token) = start(engine, None).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/topic/user"))
        .body("definitely not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_subscribe_over_capacity_is_server_error() {
    let engine = Arc::new(PubSub::new(0, 32));
    let (addr, _token) = start(engine, None).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/topic/user"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
}

#[tokio::test]
async fn test_sse_subscriber_receives_published_message() {
    let engine = Arc::new(PubSub::new(100, 32));
    let (addr, _token) = start(engine.clone(), None).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{addr}/topic/user1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE.as_str()],
        "text/event-stream"
    );
    wait_for_subscribers(&engine, "topic", 1).await;

    let posted = client
        .post(format!("http://{addr}/topic/user2"))
        .body(r#"{"a":1}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(posted.status(), 202);

    let mut stream = response.bytes_stream();
    let mut collected = String::new();
    timeout(WAIT, async {
        while !collected.contains("\n\n") || !collected.contains("data: ") {
            let chunk = stream.next().await.unwrap().unwrap();
            collected.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    })
    .await
    .expect("no event arrived");

    let line = collected
        .lines()
        .find(|line| line.starts_with("data: "))
        .unwrap();
    let msg: Message = serde_json::from_str(&line["data: ".len()..]).unwrap();
    assert_eq!(msg.data.get(), r#"{"a":1}"#);
    assert_eq!(msg.source, "user2");
    assert_eq!(msg.topic, "topic");
}

#[tokio::test]
async fn test_sse_disconnect_unsubscribes() {
    let engine = Arc::new(PubSub::new(100, 32));
    let (addr, _token) = start(engine.clone(), None).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/topic/user1"))
        .send()
        .await
        .unwrap();
    wait_for_subscribers(&engine, "topic", 1).await;

    drop(response);
    // the server notices once writes to the closed connection start failing
    timeout(WAIT, async {
        while engine.subscriber_count("topic") != 0 {
            engine.publish(
                "user2",
                "topic",
                serde_json::value::RawValue::from_string("1".to_string()).unwrap(),
            );
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("subscription was never torn down");
}

// ---- federation / anti-loop ----

#[derive(Clone, Default)]
struct Recorder {
    origins: Arc<Mutex<Vec<Option<String>>>>,
}

async fn record(State(recorder): State<Recorder>, headers: HeaderMap) -> StatusCode {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    recorder.origins.lock().unwrap().push(origin);
    StatusCode::ACCEPTED
}

/// Spawns a bare server that records the Origin header of every request.
async fn spawn_peer() -> (SocketAddr, Recorder) {
    let recorder = Recorder::default();
    let app = Router::new()
        .fallback(record)
        .with_state(recorder.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, recorder)
}

#[tokio::test]
async fn test_publish_without_origin_forwards_to_every_peer() {
    let (peer_a, recorder_a) = spawn_peer().await;
    let (peer_b, recorder_b) = spawn_peer().await;
    let peers = StaticPeers(vec![format!("http://{peer_a}"), format!("http://{peer_b}")]);

    let engine = Arc::new(PubSub::new(100, 32));
    let (addr, _token) = start(engine, Some(Arc::new(peers) as Arc<dyn PeerSource>)).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/topic/user"))
        .body(r#"{"a":1}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    timeout(WAIT, async {
        loop {
            let a = recorder_a.origins.lock().unwrap().len();
            let b = recorder_b.origins.lock().unwrap().len();
            if a == 1 && b == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peers never saw the forward");

    // each forward carries this node's endpoint as the anti-loop marker
    for recorder in [recorder_a, recorder_b] {
        let origins = recorder.origins.lock().unwrap();
        assert_eq!(origins.as_slice(), [Some(NODE_ORIGIN.to_string())]);
    }
}

#[tokio::test]
async fn test_publish_with_origin_is_never_forwarded() {
    let (peer_a, recorder_a) = spawn_peer().await;
    let (peer_b, recorder_b) = spawn_peer().await;
    let peers = StaticPeers(vec![format!("http://{peer_a}"), format!("http://{peer_b}")]);

    let engine = Arc::new(PubSub::new(100, 32));
    let (addr, _token) = start(engine, Some(Arc::new(peers) as Arc<dyn PeerSource>)).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/topic/user"))
        .header("Origin", "http://some-other-node:8000")
        .body(r#"{"a":1}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    sleep(Duration::from_millis(300)).await;
    assert!(recorder_a.origins.lock().unwrap().is_empty());
    assert!(recorder_b.origins.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_http_shutdown_times_out_with_open_sse_stream() {
    let engine = Arc::new(PubSub::new(100, 32));
    let transport =
        HttpTransport::bind("127.0.0.1:0", NODE_ORIGIN.to_string(), engine.clone(), None)
            .await
            .unwrap()
            .with_shutdown_grace(Duration::from_millis(200));
    let addr = transport.local_addr().unwrap();
    let token = CancellationToken::new();
    let handle = tokio::spawn(transport.run(token.clone()));

    // an open event stream never drains on its own
    let response = reqwest::Client::new()
        .get(format!("http://{addr}/topic/user1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    wait_for_subscribers(&engine, "topic", 1).await;

    token.cancel();
    let result = timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(TransportError::ShutdownTimeout(_))));
    drop(response);
}

#[tokio::test]
async fn test_http_run_stops_on_cancellation() {
    let engine = Arc::new(PubSub::new(100, 32));
    let transport = HttpTransport::bind("127.0.0.1:0", NODE_ORIGIN.to_string(), engine, None)
        .await
        .unwrap();
    let token = CancellationToken::new();
    let handle = tokio::spawn(transport.run(token.clone()));

    token.cancel();
    let result = timeout(Duration::from_secs(6), handle).await.unwrap().unwrap();
    assert!(result.is_ok());
}
