//! In-memory node handles for tests.

use super::{Node, NodeModule, NodeRef, NodeStream, NodeType, ResourceAllocator, ResourceId};
use crate::error::FabricError;
use crate::identity::NodeId;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Node handle backed by an in-process pipe to a serving [`NodeModule`].
///
/// Without a server every open fails with [`FabricError::NodeClosed`].
pub(crate) struct StubNode {
    id: NodeId,
    resource_id: ResourceId,
    node_type: NodeType,
    server: Option<Arc<NodeModule>>,
    closed: AtomicBool,
    opens: AtomicUsize,
}

impl StubNode {
    pub(crate) fn new(id: NodeId, resource_id: ResourceId, node_type: NodeType) -> Self {
        Self {
            id,
            resource_id,
            node_type,
            server: None,
            closed: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
        }
    }

    /// Alive handle whose streams are served by `server`.
    pub(crate) fn serving(id: NodeId, resource_id: ResourceId, server: Arc<NodeModule>) -> Self {
        Self {
            server: Some(server),
            ..Self::new(id, resource_id, NodeType::Alive)
        }
    }

    /// Handle that cannot carry requests.
    pub(crate) fn closed(id: NodeId) -> Self {
        let resource_id = ResourceAllocator::new().allocate(NodeType::Alive);
        Self::closed_with(id, resource_id)
    }

    pub(crate) fn closed_with(id: NodeId, resource_id: ResourceId) -> Self {
        Self::new(id, resource_id, NodeType::Alive)
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Node for StubNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn node_type(&self) -> NodeType {
        self.node_type
    }

    fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    async fn open(&self) -> Result<NodeStream, FabricError> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        let server = match &self.server {
            Some(server) if !self.is_closed() => server.clone(),
            _ => return Err(FabricError::NodeClosed),
        };

        let (client, remote) = tokio::io::duplex(PIPE_CAPACITY);
        let (reader, writer) = tokio::io::split(remote);
        let peer: NodeRef = Arc::new(StubNode::closed(NodeId::from(vec![0u8; 8])));
        tokio::spawn(async move {
            let _ = server.serve(reader, writer, peer).await;
        });

        let (recv, send) = tokio::io::split(client);
        Ok(NodeStream::new(Box::new(send), Box::new(recv)))
    }

    async fn greet(&self) -> Result<(), FabricError> {
        if self.is_closed() {
            Err(FabricError::NodeClosed)
        } else {
            Ok(())
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}
