//! Resource ids for node handles.
//!
//! ```text
//! [type:1][unix seconds:8 BE][counter:4 BE]
//! ```

use super::NodeType;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Encoded size of a resource id.
pub const RESOURCE_ID_SIZE: usize = 13;

/// Per-handle identifier, unique within a process and ordered by time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId([u8; RESOURCE_ID_SIZE]);

impl ResourceId {
    pub fn from_bytes(bytes: [u8; RESOURCE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; RESOURCE_ID_SIZE] {
        &self.0
    }

    /// Handle type recorded in the first byte.
    pub fn node_type(&self) -> Option<NodeType> {
        NodeType::from_byte(self.0[0])
    }

    /// Creation time in seconds since the Unix epoch.
    pub fn created_at(&self) -> u64 {
        let mut secs = [0u8; 8];
        secs.copy_from_slice(&self.0[1..9]);
        u64::from_be_bytes(secs)
    }

    pub fn counter(&self) -> u32 {
        let mut counter = [0u8; 4];
        counter.copy_from_slice(&self.0[9..13]);
        u32::from_be_bytes(counter)
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", hex::encode(self.0))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[derive(Default)]
struct AllocatorState {
    secs: u64,
    counter: u32,
}

/// Issues resource ids.
///
/// The timestamp never moves backwards and the counter never repeats within
/// one timestamp, so ids of one type issued later always compare greater.
#[derive(Default)]
pub struct ResourceAllocator {
    state: Mutex<AllocatorState>,
}

impl ResourceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id for a handle of `node_type`.
    pub fn allocate(&self, node_type: NodeType) -> ResourceId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let (secs, counter) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.secs = state.secs.max(now);
            state.counter = match state.counter.checked_add(1) {
                Some(next) => next,
                None => {
                    // Counter exhausted: borrow the next second.
                    state.secs += 1;
                    1
                }
            };
            (state.secs, state.counter)
        };

        let mut bytes = [0u8; RESOURCE_ID_SIZE];
        bytes[0] = node_type.to_byte();
        bytes[1..9].copy_from_slice(&secs.to_be_bytes());
        bytes[9..13].copy_from_slice(&counter.to_be_bytes());
        ResourceId(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let allocator = ResourceAllocator::new();
        let id = allocator.allocate(NodeType::Reachable);
        assert_eq!(id.as_bytes()[0], 2);
        assert_eq!(id.node_type(), Some(NodeType::Reachable));
        assert_eq!(id.counter(), 1);
        assert!(id.created_at() > 1_600_000_000);
    }

    #[test]
    fn test_monotonic_per_type() {
        let allocator = ResourceAllocator::new();
        let mut prev = allocator.allocate(NodeType::Alive);
        for _ in 0..1000 {
            let next = allocator.allocate(NodeType::Alive);
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_counter_shared_across_types() {
        let allocator = ResourceAllocator::new();
        let a = allocator.allocate(NodeType::Alive);
        let r = allocator.allocate(NodeType::Reachable);
        assert_eq!(r.counter(), a.counter() + 1);
        // Alive handles sort before reachable ones.
        assert!(a < r);
    }

    #[test]
    fn test_counter_wrap_advances_time() {
        let allocator = ResourceAllocator::new();
        let first = allocator.allocate(NodeType::Alive);
        allocator.state.lock().unwrap().counter = u32::MAX;
        let wrapped = allocator.allocate(NodeType::Alive);
        assert_eq!(wrapped.counter(), 1);
        assert!(wrapped.created_at() > first.created_at());
        assert!(wrapped > first);
    }
}
