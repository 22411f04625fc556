//! State shared by the listeners, the handles and the announcer.

use super::node::{QuicNode, QuicRoute};
use super::stream::CLOSE_INVALID_NODE;
use super::tls::{self, SERVER_NAME};
use crate::error::FabricError;
use crate::identity::NodeId;
use crate::node::{Node, NodeModule, NodeType};
use crate::transport::{resolve, TransportError};
use crate::utils::Bucket;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, trace};

/// Dial timeout until settings provide one.
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(3);

fn route_key(route: &Arc<QuicRoute>) -> &Vec<u8> {
    route.key()
}

pub(crate) struct QuicContext {
    node: Arc<NodeModule>,
    routes: Bucket<Arc<QuicRoute>, Vec<u8>>,
    dial_timeout: RwLock<Duration>,
    client: Mutex<Option<(u64, quinn::ClientConfig)>>,
    listening: Mutex<Vec<SocketAddr>>,
}

impl QuicContext {
    pub(crate) fn new(node: Arc<NodeModule>) -> Self {
        Self {
            node,
            routes: Bucket::new(route_key),
            dial_timeout: RwLock::new(DEFAULT_DIAL_TIMEOUT),
            client: Mutex::new(None),
            listening: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn node(&self) -> &Arc<NodeModule> {
        &self.node
    }

    pub(crate) fn dial_timeout(&self) -> Duration {
        *self.dial_timeout.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_dial_timeout(&self, timeout: Duration) {
        *self.dial_timeout.write().unwrap_or_else(PoisonError::into_inner) = timeout;
    }

    pub(crate) fn routes(&self) -> Vec<Arc<QuicRoute>> {
        self.routes.items()
    }

    pub(crate) fn listening(&self) -> Vec<SocketAddr> {
        self.listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn add_listening(&self, addr: SocketAddr) {
        self.listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(addr);
    }

    pub(crate) fn remove_listening(&self, addr: &SocketAddr) {
        self.listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|a| a != addr);
    }

    /// Dialer configuration for the installed credentials, rebuilt when
    /// they change.
    fn client_config(&self) -> Result<quinn::ClientConfig, FabricError> {
        let identity = self.node.identity();
        let credentials = identity.current().ok_or(FabricError::Unavailable)?;
        let version = identity.version();

        let mut cached = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((v, config)) = cached.as_ref() {
            if *v == version {
                return Ok(config.clone());
            }
        }
        let config = tls::client_config(&credentials)?;
        *cached = Some((version, config.clone()));
        Ok(config)
    }

    async fn connect(&self, address: &str) -> Result<quinn::Connection, FabricError> {
        let config = self.client_config()?;
        let remote = resolve(address).await?;
        let local: SocketAddr = match remote {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let endpoint = quinn::Endpoint::client(local)?;
        let connecting = endpoint
            .connect_with(config, remote, SERVER_NAME)
            .map_err(TransportError::from)?;
        Ok(connecting.await.map_err(TransportError::from)?)
    }

    /// Dial `address` within the dial timeout and require the peer to be
    /// `expected`.
    pub(crate) async fn dial(
        &self,
        address: &str,
        expected: &NodeId,
    ) -> Result<quinn::Connection, FabricError> {
        let conn = tokio::time::timeout(self.dial_timeout(), self.connect(address)).await??;
        match tls::peer_node_id(&conn) {
            Ok(peer) if peer == *expected => Ok(conn),
            Ok(peer) => {
                debug!(addr = %address, expected = %expected, actual = %peer, "Peer identity mismatch");
                conn.close(CLOSE_INVALID_NODE, b"invalid node");
                Err(FabricError::InvalidNode)
            }
            Err(e) => {
                conn.close(CLOSE_INVALID_NODE, b"invalid node");
                Err(e)
            }
        }
    }

    /// Wrap an established connection in an alive handle and admit it.
    pub(crate) fn create_node(&self, conn: quinn::Connection) -> Result<Arc<QuicNode>, FabricError> {
        let node_id = tls::peer_node_id(&conn)?;
        let manager = self.node.manager();
        loop {
            let resource_id = manager.new_resource_id(NodeType::Alive);
            let node = Arc::new(QuicNode::new(
                node_id.clone(),
                resource_id,
                conn.clone(),
                Arc::downgrade(manager),
            ));
            match self.node.control(node.clone()) {
                Ok(()) => return Ok(node),
                Err(FabricError::Conflict) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Register a reachable handle for `node_id` at `address`.
    ///
    /// Fails with [`FabricError::Conflict`] if the same route exists.
    pub(crate) fn create_route(
        self: &Arc<Self>,
        node_id: NodeId,
        address: &str,
    ) -> Result<Arc<QuicRoute>, FabricError> {
        let mut routes = self.routes.write();
        let key = QuicRoute::key_of(&node_id, address);
        if routes.contains(&key) {
            return Err(FabricError::Conflict);
        }

        let manager = self.node.manager();
        let route = loop {
            let resource_id = manager.new_resource_id(NodeType::Reachable);
            let route = Arc::new(QuicRoute::new(
                node_id.clone(),
                resource_id,
                address.to_string(),
                Arc::downgrade(self),
            ));
            match self.node.control(route.clone()) {
                Ok(()) => break route,
                Err(FabricError::Conflict) => continue,
                Err(e) => return Err(e),
            }
        };
        routes.swap(route.clone());
        trace!(node_id = %node_id, addr = %address, "Route created");
        Ok(route)
    }

    /// Drop `route` from the route list and the node manager.
    pub(crate) fn destroy_route(&self, route: &QuicRoute) {
        self.routes.delete(route.key());
        self.node.manager().delete(route.id(), route.resource_id());
        trace!(node_id = %route.id(), addr = %route.address(), "Route destroyed");
    }
}
