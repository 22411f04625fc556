//! Known-peer records and the service that joins them with live handles.
//!
//! No engine module provides these: they are the surface an embedding
//! management layer builds on, pairing its own [`NodeRepository`] with a
//! mounted node module's manager:
//!
//! ```ignore
//! let service = NodeService::new(Arc::new(MemoryNodeRepository::new()), node.manager().clone());
//! ```

use super::NodeManager;
use crate::error::FabricError;
use crate::identity::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// A known peer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    /// Record id; `0` until first saved.
    pub id: u64,
    /// Peer node id in lowercase hex.
    pub node_id: String,
    pub name: String,
    pub blocked: bool,
    /// Whether the node manager holds a handle for the peer. Not stored.
    #[serde(default)]
    pub online: bool,
}

/// Filters for [`NodeRepository::search`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSearchCondition {
    /// Substring of the name.
    pub name: Option<String>,
    /// Exact node id.
    pub node_id: Option<String>,
    pub blocked: Option<bool>,
    /// Applied by [`NodeService`], which knows the live handles.
    pub online: Option<bool>,
    /// Zero-based page index.
    #[serde(default)]
    pub page: usize,
    /// Page length; `0` returns every match.
    #[serde(default)]
    pub page_size: usize,
}

impl NodeSearchCondition {
    fn matches(&self, record: &NodeRecord) -> bool {
        if let Some(name) = &self.name {
            if !record.name.contains(name.as_str()) {
                return false;
            }
        }
        if let Some(node_id) = &self.node_id {
            if &record.node_id != node_id {
                return false;
            }
        }
        self.blocked.map_or(true, |blocked| blocked == record.blocked)
    }
}

/// Fields accepted when creating or updating a record.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeFields {
    pub node_id: String,
    pub name: String,
    pub blocked: Option<bool>,
}

/// Storage of known peers.
pub trait NodeRepository: Send + Sync {
    /// Total number of matches and the requested page of them, by id.
    fn search(&self, condition: &NodeSearchCondition) -> Result<(usize, Vec<NodeRecord>), FabricError>;

    /// Insert (id `0`) or replace a record. Node ids are unique.
    fn save(&self, record: NodeRecord) -> Result<NodeRecord, FabricError>;

    fn select(&self, id: u64) -> Result<NodeRecord, FabricError>;

    fn delete(&self, record: &NodeRecord) -> Result<(), FabricError>;

    fn select_by_node_id(&self, node_id: &str) -> Result<NodeRecord, FabricError>;

    /// Visit the records of `node_ids` that exist; the first error stops.
    fn traverse_with_node_ids(
        &self,
        node_ids: &[String],
        f: &mut dyn FnMut(&NodeRecord) -> Result<(), FabricError>,
    ) -> Result<(), FabricError>;
}

// ============================================================================
// In-memory repository
// ============================================================================

#[derive(Default)]
struct MemoryState {
    last_id: u64,
    records: BTreeMap<u64, NodeRecord>,
}

/// [`NodeRepository`] kept in process memory.
#[derive(Default)]
pub struct MemoryNodeRepository {
    state: RwLock<MemoryState>,
}

impl MemoryNodeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeRepository for MemoryNodeRepository {
    fn search(&self, condition: &NodeSearchCondition) -> Result<(usize, Vec<NodeRecord>), FabricError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let matches: Vec<&NodeRecord> = state
            .records
            .values()
            .filter(|record| condition.matches(record))
            .collect();
        let total = matches.len();

        let items = if condition.page_size > 0 {
            matches
                .into_iter()
                .skip(condition.page.saturating_mul(condition.page_size))
                .take(condition.page_size)
                .cloned()
                .collect()
        } else {
            matches.into_iter().cloned().collect()
        };
        Ok((total, items))
    }

    fn save(&self, mut record: NodeRecord) -> Result<NodeRecord, FabricError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let taken = state
            .records
            .values()
            .any(|other| other.node_id == record.node_id && other.id != record.id);
        if taken {
            return Err(FabricError::Conflict);
        }

        if record.id == 0 {
            state.last_id += 1;
            record.id = state.last_id;
        } else if !state.records.contains_key(&record.id) {
            return Err(FabricError::NotFound);
        }

        let mut stored = record.clone();
        stored.online = false;
        state.records.insert(record.id, stored);
        Ok(record)
    }

    fn select(&self, id: u64) -> Result<NodeRecord, FabricError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.records.get(&id).cloned().ok_or(FabricError::NotFound)
    }

    fn delete(&self, record: &NodeRecord) -> Result<(), FabricError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state
            .records
            .remove(&record.id)
            .map(|_| ())
            .ok_or(FabricError::NotFound)
    }

    fn select_by_node_id(&self, node_id: &str) -> Result<NodeRecord, FabricError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .records
            .values()
            .find(|record| record.node_id == node_id)
            .cloned()
            .ok_or(FabricError::NotFound)
    }

    fn traverse_with_node_ids(
        &self,
        node_ids: &[String],
        f: &mut dyn FnMut(&NodeRecord) -> Result<(), FabricError>,
    ) -> Result<(), FabricError> {
        let records: Vec<NodeRecord> = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            state
                .records
                .values()
                .filter(|record| node_ids.contains(&record.node_id))
                .cloned()
                .collect()
        };
        for record in &records {
            f(record)?;
        }
        Ok(())
    }
}

// ============================================================================
// Node service
// ============================================================================

/// Known-peer management on top of a repository and the live node manager.
///
/// Unblocked records report whether a handle is currently held; blocking or
/// deleting a record closes the peer's handles.
pub struct NodeService {
    repo: Arc<dyn NodeRepository>,
    manager: Arc<NodeManager>,
}

impl NodeService {
    pub fn new(repo: Arc<dyn NodeRepository>, manager: Arc<NodeManager>) -> Self {
        Self { repo, manager }
    }

    pub fn search(&self, condition: &NodeSearchCondition) -> Result<(usize, Vec<NodeRecord>), FabricError> {
        let (total, items) = self.repo.search(condition)?;
        if condition.blocked == Some(true) {
            return Ok((total, items));
        }

        let mut filtered = Vec::with_capacity(items.len());
        for mut item in items {
            if !item.blocked {
                self.set_online(&mut item)?;
            }
            if condition.online.is_some_and(|online| online != item.online) {
                continue;
            }
            filtered.push(item);
        }
        Ok((total, filtered))
    }

    pub fn select(&self, id: u64) -> Result<NodeRecord, FabricError> {
        let mut record = self.repo.select(id)?;
        if !record.blocked {
            self.set_online(&mut record)?;
        }
        Ok(record)
    }

    pub fn create(&self, fields: NodeFields) -> Result<NodeRecord, FabricError> {
        NodeId::from_hex(&fields.node_id).map_err(|_| FabricError::InvalidNode)?;
        self.repo.save(NodeRecord {
            node_id: fields.node_id,
            name: fields.name,
            blocked: fields.blocked.unwrap_or(false),
            ..Default::default()
        })
    }

    /// Apply a non-blank name and an explicit blocked flag.
    pub fn update(&self, id: u64, fields: NodeFields) -> Result<NodeRecord, FabricError> {
        let mut record = self.repo.select(id)?;
        let mut dirty = false;

        let name = fields.name.trim();
        if !name.is_empty() {
            record.name = name.to_string();
            dirty = true;
        }
        if let Some(blocked) = fields.blocked {
            record.blocked = blocked;
            dirty = true;
        }

        if dirty {
            record = self.repo.save(record)?;
            if record.blocked {
                self.close_node(&record)?;
            }
        }
        if !record.blocked {
            self.set_online(&mut record)?;
        }
        Ok(record)
    }

    pub fn delete(&self, id: u64) -> Result<(), FabricError> {
        let record = self.repo.select(id)?;
        self.repo.delete(&record)?;
        if !record.blocked {
            self.close_node(&record)?;
        }
        Ok(())
    }

    fn set_online(&self, record: &mut NodeRecord) -> Result<(), FabricError> {
        let node_id = NodeId::from_hex(&record.node_id).map_err(|_| FabricError::InvalidNode)?;
        record.online = self.manager.count(&node_id) > 0;
        Ok(())
    }

    fn close_node(&self, record: &NodeRecord) -> Result<(), FabricError> {
        let node_id = NodeId::from_hex(&record.node_id).map_err(|_| FabricError::InvalidNode)?;
        let mut closed = 0usize;
        self.manager.traverse_node(&node_id, |node| {
            node.close();
            closed += 1;
            true
        });
        debug!(node_id = %node_id, closed, "Closed node handles");
        Ok(())
    }
}
