//! Pan Node Layer
//!
//! Node handles, the [`NodeManager`] index of live handles, and the
//! [`NodeModule`] that serves inbound node streams through the application
//! router and sends outbound requests through a [`Tripper`].

mod guard;
mod manager;
mod module;
mod repository;
mod resource;
mod tripper;

#[cfg(test)]
pub(crate) mod testing;

use crate::error::FabricError;
use crate::identity::NodeId;
use crate::protocol::Body;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub use guard::{NodeGuard, SettingsGuard};
pub use manager::NodeManager;
pub use module::{DoOptions, NodeAppModule, NodeAppModuleProvider, NodeModule};
pub use repository::{
    MemoryNodeRepository, NodeFields, NodeRecord, NodeRepository, NodeSearchCondition, NodeService,
};
pub use resource::{ResourceAllocator, ResourceId, RESOURCE_ID_SIZE};
pub use tripper::Tripper;

/// Kind of a node handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeType {
    /// Backed by a live connection.
    Alive,
    /// Backed by a known address, dialed on demand.
    Reachable,
}

impl NodeType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(NodeType::Alive),
            2 => Some(NodeType::Reachable),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            NodeType::Alive => 1,
            NodeType::Reachable => 2,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeType::Alive => "alive",
            NodeType::Reachable => "reachable",
        };
        write!(f, "{}", s)
    }
}

/// Write half of an opened node stream.
pub type SendStream = Box<dyn AsyncWrite + Send + Unpin>;

/// An opened node stream, past its stream-type flag.
pub struct NodeStream {
    pub send: SendStream,
    pub recv: Body,
}

impl NodeStream {
    pub fn new(send: SendStream, recv: Body) -> Self {
        Self { send, recv }
    }

    /// Write `request`, finish the write side, and hand back the read side.
    pub async fn round_trip(mut self, mut request: Body) -> Result<Body, FabricError> {
        tokio::io::copy(&mut request, &mut self.send).await?;
        self.send.shutdown().await?;
        Ok(self.recv)
    }
}

/// A way to reach one peer.
#[async_trait]
pub trait Node: Send + Sync + 'static {
    /// Peer identity.
    fn id(&self) -> &NodeId;

    fn node_type(&self) -> NodeType;

    /// Handle identity within the node manager.
    fn resource_id(&self) -> &ResourceId;

    /// Open a stream for one request.
    ///
    /// Fails with [`FabricError::NodeClosed`] once the handle is unusable.
    async fn open(&self) -> Result<NodeStream, FabricError>;

    /// Send a marshalled request and return the response stream.
    async fn do_request(&self, request: Body) -> Result<Body, FabricError> {
        self.open().await?.round_trip(request).await
    }

    /// Liveness and identity probe.
    async fn greet(&self) -> Result<(), FabricError>;

    /// Drop the handle from the manager and release its connection.
    fn close(&self);
}

/// Shared node handle.
pub type NodeRef = Arc<dyn Node>;

impl fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", self.id())
            .field("type", &self.node_type())
            .field("resource_id", self.resource_id())
            .finish()
    }
}
