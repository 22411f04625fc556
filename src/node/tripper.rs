//! Outbound request routing.

use super::NodeManager;
use crate::error::FabricError;
use crate::identity::NodeId;
use crate::protocol::Body;
use async_trait::async_trait;
use tracing::debug;

/// Turns an outbound `(node id, marshalled request)` into a response stream.
#[async_trait]
pub trait Tripper: Send + Sync {
    async fn round_trip(&self, node_id: &NodeId, request: Body) -> Result<Body, FabricError>;
}

/// Try the node's handles in resource-id order.
///
/// A handle is only committed to once its stream opens, so the request body
/// is never consumed by a handle that cannot carry it. Handles that report
/// [`FabricError::NodeClosed`] are evicted.
#[async_trait]
impl Tripper for NodeManager {
    async fn round_trip(&self, node_id: &NodeId, request: Body) -> Result<Body, FabricError> {
        let nodes = self.search(node_id);
        if nodes.is_empty() {
            return Err(FabricError::NotFound);
        }

        let mut last_err = FabricError::NodeClosed;
        for node in nodes {
            match node.open().await {
                Ok(stream) => return stream.round_trip(request).await,
                Err(e) => {
                    debug!(
                        node_id = %node_id,
                        resource_id = %node.resource_id(),
                        error = %e,
                        "Node handle failed"
                    );
                    if e.is_node_closed() {
                        self.delete(node.id(), node.resource_id());
                    }
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}
