//! QUIC Transport
//!
//! Listens on every configured node address, dials routes on demand, and
//! splits each connection's streams into node requests and greets. Peers
//! learned from broadcast announcements become reachable routes once they
//! answer a greet with the announced identity. This node's own public
//! addresses are announced every [`ANNOUNCE_INTERVAL`].

mod announce;
mod context;
mod node;
mod stream;
mod tls;

use crate::broadcast::{BroadcastHandler, Broadcaster};
use crate::config::{AppSettings, ConfigListener};
use crate::error::FabricError;
use crate::identity::{IdentityStore, NodeCredentials, NodeId, NodeSettingsListener};
use crate::node::{Node, NodeModule, NodeRef};
use crate::runtime::{BoxError, Capabilities, Initialize, Module, Ready, Registry, Shutdown};
use crate::transport::resolve;
use crate::utils::Signal;
use async_trait::async_trait;
use context::QuicContext;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};

pub use announce::Announcement;
pub use node::{QuicNode, QuicRoute, MAX_FAILURES};
pub use stream::{GREET, GREET_SIZE, NODE_STREAM};
pub use tls::{client_config, peer_node_id, server_config, ALPN, SERVER_NAME};

/// Delay before a failed listener is restarted.
pub const RETRY_DELAY: Duration = Duration::from_secs(6);

/// Period between announcements.
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(15);

/// Bound on the greet that validates an announced peer.
pub const GREET_TIMEOUT: Duration = Duration::from_secs(3);

/// Actors the ready loop must restart.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Restart {
    listeners: bool,
    announcer: bool,
}

impl Restart {
    fn merge(pending: &mut Restart, next: Restart) {
        pending.listeners |= next.listeners;
        pending.announcer |= next.announcer;
    }

    fn is_empty(&self) -> bool {
        !self.listeners && !self.announcer
    }
}

/// Module running the QUIC listeners and the announcer.
pub struct QuicModule {
    ctx: Arc<QuicContext>,
    registry: OnceLock<Arc<Registry>>,
    addresses: RwLock<Vec<String>>,
    public_addresses: RwLock<Vec<String>>,
    signal: Signal<Restart>,
}

impl QuicModule {
    /// Create the transport for `node`, which must be mounted before it.
    pub fn new(node: Arc<NodeModule>) -> Self {
        Self {
            ctx: Arc::new(QuicContext::new(node)),
            registry: OnceLock::new(),
            addresses: RwLock::new(Vec::new()),
            public_addresses: RwLock::new(Vec::new()),
            signal: Signal::new(),
        }
    }

    pub fn node(&self) -> &Arc<NodeModule> {
        self.ctx.node()
    }

    /// Configured listen addresses.
    pub fn addresses(&self) -> Vec<String> {
        read(&self.addresses)
    }

    /// Configured advertised addresses.
    pub fn public_addresses(&self) -> Vec<String> {
        read(&self.public_addresses)
    }

    /// Addresses the running listeners are bound to.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.ctx.listening()
    }

    /// Reachable routes, ordered by node id then address.
    pub fn routes(&self) -> Vec<Arc<QuicRoute>> {
        self.ctx.routes()
    }

    /// Install a reachable route to `node_id` at `address`.
    pub fn create_route(&self, node_id: NodeId, address: &str) -> Result<NodeRef, FabricError> {
        let route: NodeRef = self.ctx.create_route(node_id, address)?;
        Ok(route)
    }

    /// Announcement payloads, one per public address.
    pub fn announcements(&self) -> Result<Vec<Vec<u8>>, FabricError> {
        announcements(self.node().identity(), &self.public_addresses())
    }

    fn raise(&self, restart: Restart) {
        if !restart.is_empty() {
            self.signal.raise_with(restart, Restart::merge);
        }
    }

    /// Check an announcement and install a route to the peer behind it.
    async fn accept_announcement(&self, payload: &[u8], source: IpAddr) -> Result<(), FabricError> {
        let announcement = Announcement::decode(payload)?;
        let own = self
            .node()
            .identity()
            .node_id()
            .ok_or(FabricError::Unavailable)?;
        if announcement.node_id == own {
            return Ok(());
        }
        let address = route_address(&announcement.address, source).await?;

        let route = match self.ctx.create_route(announcement.node_id.clone(), &address) {
            Ok(route) => route,
            Err(FabricError::Conflict) => {
                trace!(node_id = %announcement.node_id, addr = %address, "Route already known");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let greeted = tokio::time::timeout(GREET_TIMEOUT, route.greet())
            .await
            .map_err(FabricError::from)
            .and_then(|r| r);
        if let Err(e) = greeted {
            route.close();
            return Err(e);
        }
        info!(node_id = %announcement.node_id, addr = %address, "Route added");
        Ok(())
    }
}

fn read(addresses: &RwLock<Vec<String>>) -> Vec<String> {
    addresses
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Replace `current` with `next`; returns whether it changed.
fn replace(current: &RwLock<Vec<String>>, next: Vec<String>) -> bool {
    let mut current = current.write().unwrap_or_else(PoisonError::into_inner);
    if *current == next {
        return false;
    }
    *current = next;
    true
}

fn announcements(identity: &IdentityStore, addresses: &[String]) -> Result<Vec<Vec<u8>>, FabricError> {
    let node_id = identity.node_id().ok_or(FabricError::Unavailable)?;
    if addresses.is_empty() {
        return Err(FabricError::Unavailable);
    }
    addresses
        .iter()
        .map(|address| {
            Announcement::new(node_id.clone(), address.as_str())
                .encode()
                .map_err(FabricError::from)
        })
        .collect()
}

/// Address to dial for an announcement received from `source`.
///
/// The announced host must be the sender itself or an unspecified address,
/// which is replaced by the sender.
async fn route_address(address: &str, source: IpAddr) -> Result<String, FabricError> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        if addr.ip() == source {
            return Ok(address.to_string());
        }
    }
    let resolved = resolve(address).await?;
    if !resolved.ip().is_unspecified() {
        debug!(addr = %address, source = %source, "Announced host is not the sender");
        return Err(FabricError::InvalidNode);
    }
    Ok(SocketAddr::new(source, resolved.port()).to_string())
}

/// Closes the endpoint and forgets its address when the listener ends.
struct Listening {
    ctx: Arc<QuicContext>,
    endpoint: quinn::Endpoint,
    addr: SocketAddr,
}

impl Drop for Listening {
    fn drop(&mut self) {
        self.endpoint.close(stream::CLOSE_NO_ERROR, b"");
        self.ctx.remove_listening(&self.addr);
    }
}

/// Accept connections on `address` until the endpoint closes.
async fn listen_and_serve(address: &str, ctx: &Arc<QuicContext>) -> Result<(), FabricError> {
    let credentials = ctx
        .node()
        .identity()
        .current()
        .ok_or(FabricError::Unavailable)?;
    let config = server_config(&credentials)?;
    let addr = resolve(address).await?;
    let endpoint = quinn::Endpoint::server(config, addr)?;
    let local = endpoint.local_addr()?;

    ctx.add_listening(local);
    let listening = Listening {
        ctx: ctx.clone(),
        endpoint: endpoint.clone(),
        addr: local,
    };
    info!(addr = %local, node_id = %credentials.node_id(), "QUIC listener started");

    while let Some(incoming) = endpoint.accept().await {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let remote = incoming.remote_address();
            match incoming.await {
                Ok(conn) => stream::serve_connection(ctx, conn).await,
                Err(e) => debug!(remote = %remote, error = %e, "Handshake failed"),
            }
        });
    }

    drop(listening);
    debug!(addr = %local, "QUIC listener closed");
    Ok(())
}

/// Keep one listener alive, retrying after [`RETRY_DELAY`].
async fn supervise(address: String, ctx: Arc<QuicContext>) {
    loop {
        match listen_and_serve(&address, &ctx).await {
            Ok(()) => break,
            Err(e) => warn!(address = %address, error = %e, "QUIC listener failed, retrying"),
        }
        tokio::time::sleep(RETRY_DELAY).await;
    }
}

/// Deliver this node's announcements through every broadcaster.
async fn announce(identity: &IdentityStore, registry: &Registry, addresses: &[String]) -> Result<(), FabricError> {
    let payloads = announcements(identity, addresses)?;
    for broadcaster in registry.modules::<dyn Broadcaster>() {
        for payload in &payloads {
            if let Err(e) = broadcaster.deliver(payload).await {
                warn!(error = %e, "Announcement delivery failed");
            }
        }
    }
    Ok(())
}

async fn announce_loop(node: Arc<NodeModule>, registry: Arc<Registry>, addresses: Vec<String>) {
    loop {
        match announce(node.identity(), &registry, &addresses).await {
            Ok(()) => trace!(count = addresses.len(), "Announced"),
            Err(FabricError::Unavailable) => {
                debug!("Nothing to announce, announcer stopped");
                return;
            }
            Err(e) => warn!(error = %e, "Announcement failed"),
        }
        tokio::time::sleep(ANNOUNCE_INTERVAL).await;
    }
}

impl ConfigListener for QuicModule {
    fn on_config_updated(&self, settings: &Arc<AppSettings>) {
        self.ctx.set_dial_timeout(settings.dial_timeout());
        let listeners = replace(&self.addresses, settings.node_addresses());
        let announcer = replace(&self.public_addresses, settings.public_addresses());
        self.raise(Restart {
            listeners,
            announcer,
        });
    }
}

impl NodeSettingsListener for QuicModule {
    fn on_node_settings_updated(&self, credentials: &Arc<NodeCredentials>) {
        debug!(node_id = %credentials.node_id(), "Node credentials changed, restarting listeners");
        self.raise(Restart {
            listeners: true,
            announcer: false,
        });
    }
}

#[async_trait]
impl BroadcastHandler for QuicModule {
    async fn serve_broadcast(&self, payload: &[u8], source: IpAddr) -> Result<(), FabricError> {
        self.accept_announcement(payload, source).await
    }
}

impl Module for QuicModule {
    fn name(&self) -> &'static str {
        "quic"
    }

    fn provide(self: Arc<Self>, caps: &mut Capabilities<'_>) {
        caps.add::<dyn Initialize>(self.clone())
            .add::<dyn Ready>(self.clone())
            .add::<dyn ConfigListener>(self.clone())
            .add::<dyn NodeSettingsListener>(self.clone())
            .add::<dyn BroadcastHandler>(self);
    }
}

impl Initialize for QuicModule {
    fn init(&self, registry: &Arc<Registry>) -> Result<(), BoxError> {
        let _ = self.registry.set(registry.clone());
        Ok(())
    }
}

#[async_trait]
impl Ready for QuicModule {
    async fn ready(&self, mut shutdown: Shutdown) -> Result<(), BoxError> {
        let registry = self.registry.get().cloned().ok_or(FabricError::Unavailable)?;
        let mut listeners = JoinSet::new();
        let mut announcer: Option<JoinHandle<()>> = None;

        loop {
            let restart = tokio::select! {
                restart = self.signal.recv() => restart,
                _ = shutdown.wait() => break,
            };

            if restart.listeners {
                listeners.abort_all();
                while listeners.join_next().await.is_some() {}
                let addresses = self.addresses();
                info!(count = addresses.len(), "Starting QUIC listeners");
                for address in addresses {
                    listeners.spawn(supervise(address, self.ctx.clone()));
                }
            }
            if restart.announcer {
                if let Some(task) = announcer.take() {
                    task.abort();
                }
                announcer = Some(tokio::spawn(announce_loop(
                    self.node().clone(),
                    registry.clone(),
                    self.public_addresses(),
                )));
            }
        }

        listeners.abort_all();
        while listeners.join_next().await.is_some() {}
        if let Some(task) = announcer {
            task.abort();
        }
        debug!("QUIC transport stopped");
        Ok(())
    }
}
