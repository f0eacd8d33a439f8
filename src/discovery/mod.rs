//! UDP broadcast peer discovery.
//!
//! Every broker announces its own HTTP endpoint on a well-known UDP port.
//! A node records each unseen, non-self announcement in its peer registry and
//! answers with one re-announcement of its own, so late joiners learn about
//! nodes that broadcast before they were listening. There is no separate
//! acknowledgment frame; the re-announcement doubles as one.
//!
//! The registry is append-only for the lifetime of the process and is read by
//! the HTTP transport through [`PeerSource`] when it forwards publishes.

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::RwLock;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Well-known discovery port shared by every node on the broadcast domain.
pub const DISCOVERY_PORT: u16 = 8829;

/// Read access to the set of known peer endpoints.
pub trait PeerSource: Send + Sync {
    /// Returns a fresh, finite traversal over the peers known right now.
    fn iter(&self) -> Box<dyn Iterator<Item = String> + Send>;
}

/// The discovery component: one UDP socket plus the peer registry it fills.
pub struct Discovery {
    current: String,
    socket: UdpSocket,
    target: SocketAddr,
    peers: RwLock<HashSet<String>>,
}

impl Discovery {
    /// Binds the discovery socket on `0.0.0.0:<port>`.
    ///
    /// `current` is the endpoint advertised to peers, e.g. `http://host:8000`;
    /// it is also the value announcements are compared against so the node
    /// never records itself. Bind failure is fatal to this component.
    pub fn bind(current: String, port: u16) -> io::Result<Self> {
        Self::bind_with_target(current, port, SocketAddr::from((Ipv4Addr::BROADCAST, port)))
    }

    /// Like [`Discovery::bind`] with an explicit announcement target, so tests
    /// can run the protocol over unicast.
    pub(crate) fn bind_with_target(
        current: String,
        port: u16,
        target: SocketAddr,
    ) -> io::Result<Self> {
        // Address and port reuse let several local instances share the
        // discovery port; broadcast is needed for the announcements.
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Self {
            current,
            socket,
            target,
            peers: RwLock::new(HashSet::new()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Announces this node once, then loops over inbound datagrams until the
    /// token fires. Read errors terminate the loop and propagate.
    pub async fn run(&self, token: CancellationToken) -> io::Result<()> {
        info!(endpoint = %self.current, "starting discovery");
        self.announce().await?;
        let mut buf = [0u8; 256];
        loop {
            let received = tokio::select! {
                res = self.socket.recv_from(&mut buf) => res?.0,
                _ = token.cancelled() => return Ok(()),
            };
            let server = String::from_utf8_lossy(&buf[..received]).trim().to_string();
            if server.is_empty() || server == self.current {
                continue;
            }
            let added = self.peers.write().unwrap().insert(server.clone());
            if added {
                info!(peer = %server, "discovered server");
                // re-announce so the new node learns about us as well
                self.announce().await?;
            } else {
                debug!(peer = %server, "already known");
            }
        }
    }

    async fn announce(&self) -> io::Result<()> {
        self.socket
            .send_to(self.current.as_bytes(), self.target)
            .await?;
        Ok(())
    }
}

impl PeerSource for Discovery {
    fn iter(&self) -> Box<dyn Iterator<Item = String> + Send> {
        let snapshot: Vec<String> = self.peers.read().unwrap().iter().cloned().collect();
        Box::new(snapshot.into_iter())
    }
}

#[cfg(test)]
mod tests;
