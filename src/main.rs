use std::sync::Arc;
use std::time::Duration;

use futures_util::future;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use netsub::broker::PubSub;
use netsub::config::load_config;
use netsub::discovery::{Discovery, PeerSource};
use netsub::transport::http::HttpTransport;
use netsub::transport::tcp::TcpTransport;
use netsub::utils::error::TransportError;
use netsub::utils::logging;

#[tokio::main]
async fn main() {
    let config = load_config().expect("Failed to load configuration");
    logging::init(&config.log.level);

    let engine = Arc::new(PubSub::new(
        config.broker.capacity,
        config.broker.queue_depth,
    ));
    let token = CancellationToken::new();

    // the endpoint announced to peers and stamped on forwarded publishes
    let origin = config
        .discovery
        .advertise
        .clone()
        .unwrap_or_else(|| format!("http://{}:{}", config.http.host, config.http.port));

    let mut components: Vec<(&str, JoinHandle<Result<(), TransportError>>)> = Vec::new();

    let mut peers: Option<Arc<dyn PeerSource>> = None;
    if config.discovery.enabled {
        let discovery = Arc::new(
            Discovery::bind(origin.clone(), config.discovery.port)
                .expect("Failed to bind discovery socket"),
        );
        peers = Some(discovery.clone());
        let discovery_token = token.clone();
        components.push((
            "discovery",
            tokio::spawn(async move {
                discovery
                    .run(discovery_token)
                    .await
                    .map_err(TransportError::Io)
            }),
        ));
    }

    let http_addr = format!("{}:{}", config.http.host, config.http.port);
    let http = HttpTransport::bind(&http_addr, origin, engine.clone(), peers)
        .await
        .expect("Failed to bind http transport");
    let tcp = TcpTransport::bind(
        &config.tcp.publish_addr,
        &config.tcp.subscribe_addr,
        engine,
    )
    .await
    .expect("Failed to bind tcp transport");

    components.push(("http", tokio::spawn(http.run(token.clone()))));
    components.push(("tcp", tokio::spawn(tcp.run(token.clone()))));

    let shutdown = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            shutdown.cancel();
        }
    });

    // every component is essential: the first one to stop takes the rest down
    let (names, handles): (Vec<_>, Vec<_>) = components.into_iter().unzip();
    let (stopped, index, rest) = future::select_all(handles).await;
    token.cancel();

    let mut failed = false;
    match stopped {
        Ok(Ok(())) => info!(component = names[index], "stopped"),
        Ok(Err(err)) => {
            error!(component = names[index], error = %err, "component failed");
            failed = true;
        }
        Err(err) => {
            error!(component = names[index], error = %err, "component panicked");
            failed = true;
        }
    }

    // let the survivors play out their shutdown grace
    let _ = timeout(Duration::from_secs(6), future::join_all(rest)).await;

    if failed {
        std::process::exit(1);
    }
}
