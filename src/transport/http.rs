//! The HTTP transport.
//!
//! One endpoint family: `GET /:topic/:source` opens a subscription and
//! streams messages as server-sent events; `POST /:topic/:source` publishes
//! the request body. A publish that did not itself arrive from a peer (no
//! `Origin` header) is re-published to every known peer with `Origin` set to
//! this node's endpoint, which is what keeps federated nodes from forwarding
//! the same message back and forth.

use std::convert::Infallible;
use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::Stream;
use serde_json::value::RawValue;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{Message, Publisher, Subscriber};
use crate::discovery::PeerSource;
use crate::utils::error::TransportError;

/// How long in-flight requests get to drain after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The engine surface the HTTP handlers need.
pub trait EngineHandle: Publisher + Subscriber {}

impl<T: Publisher + Subscriber> EngineHandle for T {}

#[derive(Clone)]
struct AppState {
    engine: Arc<dyn EngineHandle>,
    peers: Option<Arc<dyn PeerSource>>,
    origin: String,
    client: reqwest::Client,
}

pub struct HttpTransport {
    listener: TcpListener,
    state: AppState,
    grace: Duration,
}

impl HttpTransport {
    /// Binds the HTTP listener. `origin` is this node's own endpoint; it is
    /// stamped on forwarded publishes as the anti-loop marker. Passing no
    /// peer source disables federation entirely.
    pub async fn bind(
        addr: &str,
        origin: String,
        engine: Arc<dyn EngineHandle>,
        peers: Option<Arc<dyn PeerSource>>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: AppState {
                engine,
                peers,
                origin,
                client: reqwest::Client::new(),
            },
            grace: SHUTDOWN_GRACE,
        })
    }

    /// Overrides the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/:topic/:source", get(subscribe).post(publish))
            .fallback(fallback)
            .with_state(self.state.clone())
    }

    /// Serves until the token fires, then gives in-flight requests a bounded
    /// grace period to drain before reporting a shutdown failure.
    pub async fn run(self, token: CancellationToken) -> Result<(), TransportError> {
        let addr = self.listener.local_addr()?;
        info!(%addr, "starting http transport");
        let grace = self.grace;
        let app = self.router();
        let shutdown = token.clone();
        let server = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .into_future();
        tokio::pin!(server);
        tokio::select! {
            served = &mut server => served.map_err(TransportError::Io),
            _ = token.cancelled() => match timeout(grace, &mut server).await {
                Ok(served) => served.map_err(TransportError::Io),
                Err(_) => Err(TransportError::ShutdownTimeout(grace)),
            },
        }
    }
}

async fn subscribe(
    Path((topic, source)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    debug!(%topic, %source, "subscribing");
    let rx = match state.engine.subscribe(&source, &topic) {
        Ok(rx) => rx,
        Err(err) => {
            error!(error = %err, %topic, "subscribe rejected");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let stream = MessageStream {
        inner: BroadcastStream::new(rx),
        _guard: Unsubscriber {
            engine: state.engine,
            id: source,
            topic,
        },
    };
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn publish(
    Path((topic, source)): Path<(String, String)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // the payload is embedded verbatim in outbound frames, so it has to be
    // JSON text to be representable on the wire
    let payload = String::from_utf8(body.to_vec())
        .ok()
        .and_then(|text| RawValue::from_string(text).ok());
    let Some(payload) = payload else {
        return (StatusCode::BAD_REQUEST, "payload must be JSON text").into_response();
    };

    debug!(%topic, %source, "publishing message");
    state.engine.publish(&source, &topic, payload);

    if !headers.contains_key(header::ORIGIN) {
        if let Some(peers) = &state.peers {
            for peer in peers.iter() {
                let client = state.client.clone();
                let origin = state.origin.clone();
                let topic = topic.clone();
                let source = source.clone();
                let body = body.clone();
                tokio::spawn(forward(client, peer, origin, topic, source, body));
            }
        }
    }

    StatusCode::ACCEPTED.into_response()
}

/// Re-publishes a locally received message to one peer, stamped with this
/// node's endpoint so the peer will not forward it again. Failures are
/// logged; the local publish already succeeded.
async fn forward(
    client: reqwest::Client,
    peer: String,
    origin: String,
    topic: String,
    source: String,
    body: Bytes,
) {
    let uri = format!("{peer}/{topic}/{source}");
    let sent = client
        .post(&uri)
        .header(header::CONTENT_TYPE.as_str(), "application/json")
        .header(header::ORIGIN.as_str(), origin)
        .body(body)
        .send()
        .await;
    match sent {
        Ok(response) => debug!(%uri, status = %response.status(), "forwarded publish"),
        Err(err) => warn!(%uri, error = %err, "forward failed"),
    }
}

async fn fallback(method: Method) -> Response {
    match method {
        Method::GET | Method::POST => (
            StatusCode::BAD_REQUEST,
            "please provide topic and id in path (/topic/id)",
        )
            .into_response(),
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// Adapts a subscription channel into an SSE event stream.
///
/// Dropping the stream is the sole cancellation path: it happens when the
/// client disconnects or the server shuts down, and the guard unsubscribes.
struct MessageStream {
    inner: BroadcastStream<Message>,
    _guard: Unsubscriber,
}

struct Unsubscriber {
    engine: Arc<dyn EngineHandle>,
    id: String,
    topic: String,
}

impl Drop for Unsubscriber {
    fn drop(&mut self) {
        debug!(topic = %self.topic, id = %self.id, "unsubscribe");
        self.engine.unsubscribe(&self.id, &self.topic);
    }
}

impl Stream for MessageStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(msg))) => match serde_json::to_string(&msg) {
                    Ok(mut json) => {
                        // a literal CR in valid JSON can only be insignificant
                        // whitespace, and SSE data lines cannot carry one
                        if json.contains('\r') {
                            json = json.replace('\r', "");
                        }
                        return Poll::Ready(Some(Ok(Event::default().data(json))));
                    }
                    Err(err) => {
                        error!(error = %err, "failed to serialize message");
                    }
                },
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(skipped, "sse subscriber lagging, messages dropped");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
