//! Gossip over UDP.
//!
//! One socket carries everything. Gossip messages are fire-and-forget.
//! Configuration queries are matched to their replies by request id and
//! give up after a timeout; the caller retries.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ember_cluster::{
    ClusterConfiguration, ClusterError, ConfigurationQuery, GossipHandle, GossipMessage,
    GossipTransport, MemberId,
};
use futures::future::{self, BoxFuture, FutureExt};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Largest datagram we accept.
const MAX_DATAGRAM: usize = 65_507;

/// How long a configuration query waits for its reply.
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

type PendingQueries = HashMap<u64, oneshot::Sender<ClusterConfiguration>>;

#[derive(Clone)]
pub struct UdpTransport {
    local: MemberId,
    socket: Arc<UdpSocket>,
    peers: Arc<BTreeMap<MemberId, SocketAddr>>,
    pending: Arc<Mutex<PendingQueries>>,
    next_request_id: Arc<AtomicU64>,
    query_timeout: Duration,
}

impl UdpTransport {
    /// Binds the gossip socket.
    pub async fn bind(
        local: MemberId,
        addr: SocketAddr,
        peers: BTreeMap<MemberId, SocketAddr>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(member = %local, "gossip listening on {}", socket.local_addr()?);
        Ok(Self {
            local,
            socket: Arc::new(socket),
            peers: Arc::new(peers),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: Arc::new(AtomicU64::new(1)),
            query_timeout: QUERY_TIMEOUT,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn addr_of(&self, member: &MemberId) -> Result<SocketAddr, ClusterError> {
        self.peers
            .get(member)
            .copied()
            .ok_or_else(|| ClusterError::Transport(format!("no address for member {member}")))
    }

    /// Spawns the receive loop, delivering inbound gossip to `gossip`.
    pub fn spawn_receiver(&self, gossip: GossipHandle) -> JoinHandle<()> {
        let transport = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (len, from) = match transport.socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("gossip recv error: {e}");
                        continue;
                    }
                };
                let msg = match GossipMessage::decode(&buf[..len]) {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!("gossip decode error from {from}: {e}");
                        continue;
                    }
                };
                if let GossipMessage::QueryReply {
                    request_id,
                    configuration,
                    ..
                } = msg
                {
                    transport.complete_query(request_id, configuration);
                    continue;
                }
                if let Err(e) = gossip.receive(msg).await {
                    debug!("gossip actor gone, stopping receiver: {e}");
                    break;
                }
            }
        })
    }

    fn complete_query(&self, request_id: u64, configuration: ClusterConfiguration) {
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&request_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(configuration);
            }
            None => trace!(request_id, "late query reply"),
        }
    }
}

impl GossipTransport for UdpTransport {
    fn send(&self, to: &MemberId, message: GossipMessage) -> BoxFuture<'static, Result<(), ClusterError>> {
        let addr = match self.addr_of(to) {
            Ok(addr) => addr,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        let socket = Arc::clone(&self.socket);
        async move {
            let encoded = message.encode()?;
            socket
                .send_to(&encoded, addr)
                .await
                .map_err(|e| ClusterError::Transport(format!("send to {addr}: {e}")))?;
            Ok(())
        }
        .boxed()
    }
}

impl ConfigurationQuery for UdpTransport {
    fn query_configuration(
        &self,
        peer: &MemberId,
    ) -> BoxFuture<'static, Result<ClusterConfiguration, ClusterError>> {
        let addr = match self.addr_of(peer) {
            Ok(addr) => addr,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id, tx);

        let query = GossipMessage::Query {
            sender: self.local.clone(),
            request_id,
        };
        let socket = Arc::clone(&self.socket);
        let slot = PendingSlot {
            pending: Arc::clone(&self.pending),
            request_id,
        };
        let timeout = self.query_timeout;
        let peer = peer.clone();
        async move {
            let _slot = slot;
            let encoded = query.encode()?;
            socket
                .send_to(&encoded, addr)
                .await
                .map_err(|e| ClusterError::Transport(format!("send to {addr}: {e}")))?;
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(configuration)) => Ok(configuration),
                Ok(Err(_)) => Err(ClusterError::Unavailable),
                Err(_) => Err(ClusterError::Transport(format!(
                    "query to {peer} timed out"
                ))),
            }
        }
        .boxed()
    }
}

/// A query's entry in the pending table. Removed when the query finishes
/// or its future is dropped unanswered.
struct PendingSlot {
    pending: Arc<Mutex<PendingQueries>>,
    request_id: u64,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.request_id);
    }
}
