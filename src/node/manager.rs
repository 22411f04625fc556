//! Node manager.
//!
//! Two-level index of live node handles: buckets ordered by node id, each
//! holding the handles of that peer ordered by resource id. Empty buckets
//! are removed in the same critical section that empties them.

use super::resource::{ResourceAllocator, ResourceId};
use super::{NodeRef, NodeType};
use crate::identity::NodeId;
use crate::utils::{Bucket, SortedItems};
use tracing::trace;

struct NodeBucket {
    id: NodeId,
    nodes: SortedItems<NodeRef, ResourceId>,
}

fn bucket_id(bucket: &NodeBucket) -> &NodeId {
    &bucket.id
}

fn node_resource_id(node: &NodeRef) -> &ResourceId {
    node.resource_id()
}

/// Index of node handles by `(node id, resource id)`.
pub struct NodeManager {
    buckets: Bucket<NodeBucket, NodeId>,
    resources: ResourceAllocator,
}

impl NodeManager {
    pub fn new() -> Self {
        Self {
            buckets: Bucket::new(bucket_id),
            resources: ResourceAllocator::new(),
        }
    }

    /// Allocate a fresh resource id for a handle of `node_type`.
    pub fn new_resource_id(&self, node_type: NodeType) -> ResourceId {
        self.resources.allocate(node_type)
    }

    /// Visit every known node id in order; the first error stops iteration.
    pub fn traverse_node_id<E, F>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&NodeId) -> Result<(), E>,
    {
        let ids: Vec<NodeId> = self.buckets.read().iter().map(|b| b.id.clone()).collect();
        for id in &ids {
            f(id)?;
        }
        Ok(())
    }

    /// Visit the handles of one node in resource-id order while `f` returns
    /// true.
    pub fn traverse_node<F>(&self, node_id: &NodeId, mut f: F)
    where
        F: FnMut(&NodeRef) -> bool,
    {
        for node in self.search(node_id) {
            if !f(&node) {
                break;
            }
        }
    }

    /// Snapshot of the handles for `node_id`.
    pub fn search(&self, node_id: &NodeId) -> Vec<NodeRef> {
        self.buckets
            .read()
            .get(node_id)
            .map(|bucket| bucket.nodes.items().to_vec())
            .unwrap_or_default()
    }

    /// Number of handles for `node_id`.
    pub fn count(&self, node_id: &NodeId) -> usize {
        self.buckets
            .read()
            .get(node_id)
            .map_or(0, |bucket| bucket.nodes.len())
    }

    /// Number of distinct node ids.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Insert `node` unless a handle with the same ids exists.
    ///
    /// Returns the stored handle and whether it already existed.
    pub fn search_or_store(&self, node: NodeRef) -> (NodeRef, bool) {
        let mut buckets = self.buckets.write();
        if let Some(bucket) = buckets.get_mut(node.id()) {
            let (idx, existed) = bucket.nodes.search_or_store(node);
            return (bucket.nodes.items()[idx].clone(), existed);
        }

        let mut nodes = SortedItems::new(node_resource_id);
        nodes.search_or_store(node.clone());
        let bucket = NodeBucket {
            id: node.id().clone(),
            nodes,
        };
        buckets.search_or_store(bucket);
        trace!(node_id = %node.id(), resource_id = %node.resource_id(), "Node bucket created");
        (node, false)
    }

    /// Remove the handle with the ids of `node`.
    ///
    /// Returns whether a handle was removed.
    pub fn delete(&self, node_id: &NodeId, resource_id: &ResourceId) -> bool {
        let mut buckets = self.buckets.write();
        let Some(bucket) = buckets.get_mut(node_id) else {
            return false;
        };
        if bucket.nodes.delete(resource_id).is_none() {
            return false;
        }
        if bucket.nodes.is_empty() {
            buckets.delete(node_id);
            trace!(node_id = %node_id, "Node bucket dropped");
        }
        true
    }
}

impl Default for NodeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::StubNode;
    use crate::node::Node;
    use std::sync::Arc;

    fn id(byte: u8) -> NodeId {
        NodeId::from(vec![byte; 4])
    }

    fn stub(mgr: &NodeManager, node_id: NodeId, node_type: NodeType) -> Arc<StubNode> {
        Arc::new(StubNode::new(node_id, mgr.new_resource_id(node_type), node_type))
    }

    #[test]
    fn test_store_and_search() {
        let mgr = NodeManager::new();
        let a = stub(&mgr, id(1), NodeType::Alive);
        let b = stub(&mgr, id(1), NodeType::Reachable);

        let (_, existed) = mgr.search_or_store(b.clone());
        assert!(!existed);
        let (_, existed) = mgr.search_or_store(a.clone());
        assert!(!existed);

        let found = mgr.search(&id(1));
        assert_eq!(found.len(), 2);
        // Resource-id order puts the alive handle first.
        assert_eq!(found[0].resource_id(), a.resource_id());
        assert_eq!(found[1].resource_id(), b.resource_id());
        assert_eq!(mgr.count(&id(1)), 2);
        assert_eq!(mgr.count(&id(2)), 0);
        assert!(mgr.search(&id(2)).is_empty());
    }

    #[test]
    fn test_duplicate_ids_return_existing() {
        let mgr = NodeManager::new();
        let first = stub(&mgr, id(1), NodeType::Alive);
        let clash = Arc::new(StubNode::new(id(1), *first.resource_id(), NodeType::Alive));

        mgr.search_or_store(first.clone());
        let (stored, existed) = mgr.search_or_store(clash);
        assert!(existed);
        assert!(Arc::ptr_eq(&stored, &(first as NodeRef)));
        assert_eq!(mgr.count(&id(1)), 1);
    }

    #[test]
    fn test_delete_last_drops_bucket() {
        let mgr = NodeManager::new();
        let a = stub(&mgr, id(1), NodeType::Alive);
        let b = stub(&mgr, id(1), NodeType::Alive);
        mgr.search_or_store(a.clone());
        mgr.search_or_store(b.clone());

        assert!(mgr.delete(a.id(), a.resource_id()));
        assert_eq!(mgr.len(), 1);
        assert!(!mgr.delete(a.id(), a.resource_id()));
        assert!(mgr.delete(b.id(), b.resource_id()));
        assert!(mgr.is_empty());
        assert_eq!(mgr.count(&id(1)), 0);
    }

    #[test]
    fn test_traverse_node_id_in_order() {
        let mgr = NodeManager::new();
        for byte in [3u8, 1, 2, 1] {
            mgr.search_or_store(stub(&mgr, id(byte), NodeType::Alive));
        }

        let mut seen = Vec::new();
        mgr.traverse_node_id(|node_id| {
            seen.push(node_id.clone());
            Ok::<_, ()>(())
        })
        .unwrap();
        assert_eq!(seen, vec![id(1), id(2), id(3)]);

        let mut visited = 0;
        let result = mgr.traverse_node_id(|_| {
            visited += 1;
            if visited == 2 {
                Err("stop")
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err("stop"));
        assert_eq!(visited, 2);
    }

    #[test]
    fn test_traverse_node_stops_on_false() {
        let mgr = NodeManager::new();
        for _ in 0..3 {
            mgr.search_or_store(stub(&mgr, id(7), NodeType::Alive));
        }

        let mut visited = 0;
        mgr.traverse_node(&id(7), |_| {
            visited += 1;
            visited < 2
        });
        assert_eq!(visited, 2);
    }

    #[test]
    fn test_concurrent_stores_stay_unique() {
        let mgr = Arc::new(NodeManager::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mgr = mgr.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let node = stub(&mgr, id(9), NodeType::Alive);
                        let (_, existed) = mgr.search_or_store(node);
                        assert!(!existed);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(mgr.count(&id(9)), 400);
    }
}
