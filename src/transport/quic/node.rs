//! Alive and reachable node handles.

use super::context::QuicContext;
use super::stream::{self, CLOSE_NO_ERROR, NODE_STREAM};
use crate::error::FabricError;
use crate::identity::NodeId;
use crate::node::{Node, NodeManager, NodeStream, NodeType, ResourceId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Consecutive dial failures after which a route evicts itself.
pub const MAX_FAILURES: u32 = 3;

/// Handle over one live connection.
pub struct QuicNode {
    id: NodeId,
    resource_id: ResourceId,
    conn: quinn::Connection,
    manager: Weak<NodeManager>,
}

impl QuicNode {
    pub(crate) fn new(
        id: NodeId,
        resource_id: ResourceId,
        conn: quinn::Connection,
        manager: Weak<NodeManager>,
    ) -> Self {
        Self {
            id,
            resource_id,
            conn,
            manager,
        }
    }

    pub fn connection(&self) -> &quinn::Connection {
        &self.conn
    }
}

#[async_trait]
impl Node for QuicNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn node_type(&self) -> NodeType {
        NodeType::Alive
    }

    fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    async fn open(&self) -> Result<NodeStream, FabricError> {
        let (send, recv) = stream::open_stream(&self.conn, NODE_STREAM).await?;
        Ok(NodeStream::new(Box::new(send), Box::new(recv)))
    }

    async fn greet(&self) -> Result<(), FabricError> {
        stream::greet(&self.conn).await
    }

    fn close(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.delete(&self.id, &self.resource_id);
        }
        self.conn.close(CLOSE_NO_ERROR, b"");
    }
}

/// Handle over a known address, dialed for every use.
pub struct QuicRoute {
    id: NodeId,
    resource_id: ResourceId,
    address: String,
    key: Vec<u8>,
    failures: AtomicU32,
    ctx: Weak<QuicContext>,
}

impl QuicRoute {
    pub(crate) fn new(
        id: NodeId,
        resource_id: ResourceId,
        address: String,
        ctx: Weak<QuicContext>,
    ) -> Self {
        let key = Self::key_of(&id, &address);
        Self {
            id,
            resource_id,
            address,
            key,
            failures: AtomicU32::new(0),
            ctx,
        }
    }

    /// Route list key: node id followed by the address.
    pub fn key_of(id: &NodeId, address: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(id.len() + address.len());
        key.extend_from_slice(id.as_bytes());
        key.extend_from_slice(address.as_bytes());
        key
    }

    pub fn key(&self) -> &Vec<u8> {
        &self.key
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Consecutive dial failures so far.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Dial the route, counting failures against the eviction budget.
    async fn dial(&self) -> Result<(Arc<QuicContext>, quinn::Connection), FabricError> {
        let ctx = self.ctx.upgrade().ok_or(FabricError::NodeClosed)?;
        if self.failures() >= MAX_FAILURES {
            self.close();
            return Err(FabricError::InvalidNode);
        }

        match ctx.dial(&self.address, &self.id).await {
            Ok(conn) => {
                self.failures.store(0, Ordering::Relaxed);
                Ok((ctx, conn))
            }
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    node_id = %self.id,
                    addr = %self.address,
                    failures,
                    error = %e,
                    "Route dial failed"
                );
                if failures >= MAX_FAILURES {
                    ctx.destroy_route(self);
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Node for QuicRoute {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn node_type(&self) -> NodeType {
        NodeType::Reachable
    }

    fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    /// Dial, serve the new connection as an alive node, and open a request
    /// stream on it.
    async fn open(&self) -> Result<NodeStream, FabricError> {
        let (ctx, conn) = self.dial().await?;
        tokio::spawn(stream::serve_connection(ctx, conn.clone()));
        // The route stays usable when a fresh connection drops.
        let (send, recv) = stream::open_stream(&conn, NODE_STREAM)
            .await
            .map_err(|e| match e {
                FabricError::NodeClosed => FabricError::Transport("connection lost".to_string()),
                other => other,
            })?;
        Ok(NodeStream::new(Box::new(send), Box::new(recv)))
    }

    async fn greet(&self) -> Result<(), FabricError> {
        let (_, conn) = self.dial().await?;
        let result = stream::greet(&conn).await;
        conn.close(CLOSE_NO_ERROR, b"");
        result
    }

    fn close(&self) {
        if let Some(ctx) = self.ctx.upgrade() {
            ctx.destroy_route(self);
        }
    }
}
