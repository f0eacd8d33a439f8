//! The raw TCP transport: one listener accepts publisher connections, another
//! accepts subscriber connections, both feeding the same engine. Every
//! accepted connection gets its own task; an accept error on either listener
//! takes the whole transport down.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::de::IgnoredAny;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{Message, Publisher, Subscriber};
use crate::transport::frame::{JsonReader, write_frame};
use crate::transport::message::SubscribeFrame;
use crate::utils::error::TransportError;

pub struct TcpTransport<E> {
    engine: Arc<E>,
    pub_listener: TcpListener,
    sub_listener: TcpListener,
}

impl<E> TcpTransport<E>
where
    E: Publisher + Subscriber + 'static,
{
    /// Binds both listeners. Once this returns the transport is ready to
    /// accept, so callers binding `:0` can immediately query the real
    /// addresses.
    pub async fn bind(pub_addr: &str, sub_addr: &str, engine: Arc<E>) -> io::Result<Self> {
        let pub_listener = TcpListener::bind(pub_addr).await?;
        let sub_listener = TcpListener::bind(sub_addr).await?;
        Ok(Self {
            engine,
            pub_listener,
            sub_listener,
        })
    }

    pub fn pub_addr(&self) -> io::Result<SocketAddr> {
        self.pub_listener.local_addr()
    }

    pub fn sub_addr(&self) -> io::Result<SocketAddr> {
        self.sub_listener.local_addr()
    }

    /// Serves both listeners until the token fires or either accept loop
    /// fails. Cancellation closes the listeners without draining open
    /// connections.
    pub async fn run(self, token: CancellationToken) -> Result<(), TransportError> {
        let publish = self.pub_addr()?;
        let subscribe = self.sub_addr()?;
        info!(%publish, %subscribe, "starting tcp transport");
        let (err_tx, mut err_rx) = mpsc::channel(2);
        let pub_loop = tokio::spawn(accept_publishers(
            self.pub_listener,
            self.engine.clone(),
            err_tx.clone(),
        ));
        let sub_loop = tokio::spawn(accept_subscribers(self.sub_listener, self.engine, err_tx));

        let result = tokio::select! {
            _ = token.cancelled() => Ok(()),
            Some(err) = err_rx.recv() => Err(TransportError::Io(err)),
        };
        pub_loop.abort();
        sub_loop.abort();
        result
    }
}

async fn accept_publishers<E: Publisher + 'static>(
    listener: TcpListener,
    engine: Arc<E>,
    err_tx: mpsc::Sender<io::Error>,
) {
    loop {
        match listener.accept().await {
            Ok((conn, peer)) => {
                debug!(%peer, "publisher connected");
                let engine = engine.clone();
                tokio::spawn(handle_pub(conn, engine));
            }
            Err(err) => {
                let _ = err_tx.send(err).await;
                return;
            }
        }
    }
}

async fn accept_subscribers<E: Subscriber + 'static>(
    listener: TcpListener,
    engine: Arc<E>,
    err_tx: mpsc::Sender<io::Error>,
) {
    loop {
        match listener.accept().await {
            Ok((conn, peer)) => {
                debug!(%peer, "subscriber connected");
                let engine = engine.clone();
                tokio::spawn(handle_sub(conn, engine));
            }
            Err(err) => {
                let _ = err_tx.send(err).await;
                return;
            }
        }
    }
}

/// Decodes publish frames until the client hangs up or sends garbage; either
/// way the connection ends here and nothing propagates past the log line.
async fn handle_pub<E: Publisher>(conn: TcpStream, engine: Arc<E>) {
    let mut frames = JsonReader::new(conn);
    loop {
        match frames.next::<Message>().await {
            Ok(Some(msg)) => engine.publish(&msg.source, &msg.topic, msg.data),
            Ok(None) => return,
            Err(err) => {
                debug!(error = %err, "publisher connection ended");
                return;
            }
        }
    }
}

/// Reads one subscribe frame, then streams every delivered message back as a
/// JSON frame until the channel closes or the peer disconnects.
async fn handle_sub<E: Subscriber>(conn: TcpStream, engine: Arc<E>) {
    let (read_half, mut write_half) = conn.into_split();
    let mut frames = JsonReader::new(read_half);
    let first = match frames.next::<SubscribeFrame>().await {
        Ok(Some(frame)) => frame,
        Ok(None) => return,
        Err(err) => {
            debug!(error = %err, "bad subscribe frame");
            return;
        }
    };
    let id = first
        .source
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let topic = first.topic;

    let mut rx = match engine.subscribe(&id, &topic) {
        Ok(rx) => rx,
        Err(err) => {
            error!(error = %err, %topic, "subscribe failed");
            return;
        }
    };
    debug!(subscriber = %id, %topic, "subscribed");

    loop {
        tokio::select! {
            delivered = rx.recv() => match delivered {
                Ok(msg) => {
                    if let Err(err) = write_frame(&mut write_half, &msg).await {
                        debug!(error = %err, subscriber = %id, "write failed");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(subscriber = %id, skipped, "subscriber lagging, messages dropped");
                }
                Err(RecvError::Closed) => break,
            },
            inbound = frames.next::<IgnoredAny>() => match inbound {
                // anything else the subscriber sends is ignored
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            },
        }
    }

    engine.unsubscribe(&id, &topic);
    debug!(subscriber = %id, %topic, "unsubscribed");
}
