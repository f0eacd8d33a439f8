use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::{Discovery, PeerSource};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
#[serial]
async fn records_peers_and_reannounces() {
    // A plain socket stands in for the rest of the broadcast domain; the
    // node's announcement target points straight at it.
    let observer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let observer_addr = observer.local_addr().unwrap();

    let port = portpicker::pick_unused_port().expect("no free ports");
    let node = Arc::new(
        Discovery::bind_with_target("http://node-a:8000".to_string(), port, observer_addr)
            .unwrap(),
    );
    let token = CancellationToken::new();
    let runner = {
        let node = node.clone();
        let token = token.clone();
        tokio::spawn(async move { node.run(token).await })
    };

    // initial announcement
    let mut buf = [0u8; 256];
    let (received, node_addr) = timeout(RECV_TIMEOUT, observer.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..received], b"http://node-a:8000");

    // a new peer announcement is recorded and answered
    observer
        .send_to(b"http://node-b:8000", node_addr)
        .await
        .unwrap();
    let (received, _) = timeout(RECV_TIMEOUT, observer.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..received], b"http://node-a:8000");

    observer
        .send_to(b"http://node-c:8000", node_addr)
        .await
        .unwrap();
    let (received, _) = timeout(RECV_TIMEOUT, observer.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..received], b"http://node-a:8000");

    // duplicates and the node's own endpoint change nothing
    observer
        .send_to(b"http://node-b:8000", node_addr)
        .await
        .unwrap();
    observer
        .send_to(b"http://node-a:8000", node_addr)
        .await
        .unwrap();
    sleep(Duration::from_millis(200)).await;

    let mut peers: Vec<String> = node.iter().collect();
    peers.sort();
    assert_eq!(peers, ["http://node-b:8000", "http://node-c:8000"]);

    // neither of those triggered another announcement
    assert!(
        timeout(Duration::from_millis(200), observer.recv_from(&mut buf))
            .await
            .is_err()
    );

    token.cancel();
    timeout(Duration::from_secs(1), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
#[serial]
async fn iter_returns_fresh_traversal_each_call() {
    let port = portpicker::pick_unused_port().expect("no free ports");
    let node = Discovery::bind("http://node-a:8000".to_string(), port).unwrap();
    assert_eq!(node.iter().count(), 0);
    assert_eq!(node.iter().count(), 0);
}

#[tokio::test]
#[serial]
async fn multiple_instances_share_the_discovery_port() {
    let port = portpicker::pick_unused_port().expect("no free ports");
    let first = Discovery::bind("http://node-a:8000".to_string(), port);
    let second = Discovery::bind("http://node-b:8000".to_string(), port);
    assert!(first.is_ok());
    assert!(second.is_ok());
}
