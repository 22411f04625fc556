//! Per-source reassembly of fragmented announcements.

use super::packet::{parse_packet_buffer, Fragment};
use crate::utils::Bucket;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Lifetime of an incomplete buffer.
pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(3);

struct PacketBuffer {
    addr: SocketAddr,
    size: usize,
    content: Vec<u8>,
    generation: u64,
    timer: JoinHandle<()>,
}

impl PacketBuffer {
    fn cancel(&self) {
        self.timer.abort();
    }
}

fn buffer_addr(buffer: &PacketBuffer) -> &SocketAddr {
    &buffer.addr
}

/// Buffers of partially received payloads, one per source address.
///
/// A buffer is created by a size-bearing fragment, grows with the
/// continuations from the same source, and is evicted when complete, when it
/// would overflow its declared size, or when its timer fires.
pub struct Reassembler {
    buffers: Arc<Bucket<PacketBuffer, SocketAddr>>,
    timeout: Duration,
    generation: AtomicU64,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_timeout(REASSEMBLY_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            buffers: Arc::new(Bucket::new(buffer_addr)),
            timeout,
            generation: AtomicU64::new(0),
        }
    }

    /// Number of incomplete buffers.
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }

    /// Feed one datagram; returns the payload once it is complete.
    ///
    /// Must be called within a tokio runtime.
    pub fn push(&self, source: SocketAddr, datagram: &[u8]) -> Option<Vec<u8>> {
        let mut buffers = self.buffers.write();
        match parse_packet_buffer(datagram) {
            Fragment::Invalid => {
                trace!(source = %source, len = datagram.len(), "Invalid fragment dropped");
                None
            }
            Fragment::Start { size, payload } => {
                if let Some(stale) = buffers.delete(&source) {
                    debug!(source = %source, "Restarting reassembly");
                    stale.cancel();
                }
                if payload.len() == size {
                    return Some(payload.to_vec());
                }

                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let timer = self.spawn_timer(source, generation);
                buffers.swap(PacketBuffer {
                    addr: source,
                    size,
                    content: payload.to_vec(),
                    generation,
                    timer,
                });
                None
            }
            Fragment::Continuation(payload) => {
                let buffer = buffers.get_mut(&source)?;
                if buffer.content.len() + payload.len() > buffer.size {
                    debug!(source = %source, declared = buffer.size, "Fragment overflows buffer");
                    if let Some(stale) = buffers.delete(&source) {
                        stale.cancel();
                    }
                    return None;
                }

                buffer.content.extend_from_slice(payload);
                if buffer.content.len() < buffer.size {
                    return None;
                }
                let done = buffers.delete(&source)?;
                done.cancel();
                Some(done.content)
            }
        }
    }

    fn spawn_timer(&self, source: SocketAddr, generation: u64) -> JoinHandle<()> {
        let buffers = Arc::downgrade(&self.buffers);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(buffers) = buffers.upgrade() else {
                return;
            };
            let mut buffers = buffers.write();
            if buffers.get(&source).is_some_and(|b| b.generation == generation) {
                buffers.delete(&source);
                debug!(source = %source, "Reassembly timed out");
            }
        })
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Reassembler {
    fn drop(&mut self) {
        for buffer in self.buffers.write().iter() {
            buffer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::packet::{fragment, pack_buffer, HEADER_SIZE};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 7], port))
    }

    fn first(size: u16, payload: &[u8]) -> Vec<u8> {
        let mut block = vec![0];
        block.extend_from_slice(&(u16::MAX ^ size).to_be_bytes());
        block.extend_from_slice(&size.to_be_bytes());
        block.extend_from_slice(payload);
        block
    }

    fn continuation(payload: &[u8]) -> Vec<u8> {
        let mut block = vec![0; HEADER_SIZE];
        block.extend_from_slice(payload);
        block
    }

    #[tokio::test]
    async fn test_two_fragments() {
        let reassembler = Reassembler::new();
        assert_eq!(reassembler.push(addr(1), &first(10, b"abcd")), None);
        assert_eq!(reassembler.pending(), 1);

        let payload = reassembler.push(addr(1), &continuation(b"efghij"));
        assert_eq!(payload.as_deref(), Some(&b"abcdefghij"[..]));
        assert_eq!(reassembler.pending(), 0);
    }

    #[tokio::test]
    async fn test_single_datagram_completes() {
        let reassembler = Reassembler::new();
        let packed = pack_buffer(b"whole").unwrap();
        assert_eq!(reassembler.push(addr(1), &packed), Some(b"whole".to_vec()));
        assert_eq!(reassembler.pending(), 0);
    }

    #[tokio::test]
    async fn test_sources_are_independent() {
        let reassembler = Reassembler::new();
        let payload: Vec<u8> = (0..40u8).collect();
        let blocks = fragment(&payload, 20).unwrap();
        assert_eq!(blocks.len(), 3);

        for block in &blocks[..2] {
            assert_eq!(reassembler.push(addr(1), block), None);
            assert_eq!(reassembler.push(addr(2), block), None);
        }
        assert_eq!(reassembler.pending(), 2);
        assert_eq!(reassembler.push(addr(2), &blocks[2]), Some(payload.clone()));
        assert_eq!(reassembler.push(addr(1), &blocks[2]), Some(payload));
    }

    #[tokio::test]
    async fn test_orphan_continuation_ignored() {
        let reassembler = Reassembler::new();
        assert_eq!(reassembler.push(addr(1), &continuation(b"late")), None);
        assert_eq!(reassembler.push(addr(1), b"\x01headerless"), None);
        assert_eq!(reassembler.pending(), 0);
    }

    #[tokio::test]
    async fn test_headerless_datagram_appends() {
        let reassembler = Reassembler::new();
        reassembler.push(addr(1), &first(7, b"ab"));
        assert_eq!(reassembler.push(addr(1), b"\x01cde"), None);
        assert_eq!(reassembler.push(addr(1), b"f"), Some(b"ab\x01cdef".to_vec()));
    }

    #[tokio::test]
    async fn test_overflow_discards_buffer() {
        let reassembler = Reassembler::new();
        reassembler.push(addr(1), &first(5, b"ab"));
        assert_eq!(reassembler.push(addr(1), &continuation(b"cdef")), None);
        assert_eq!(reassembler.pending(), 0);
        assert_eq!(reassembler.push(addr(1), &continuation(b"cde")), None);
    }

    #[tokio::test]
    async fn test_new_start_replaces_buffer() {
        let reassembler = Reassembler::new();
        reassembler.push(addr(1), &first(8, b"old"));
        reassembler.push(addr(1), &first(4, b"ne"));
        assert_eq!(reassembler.pending(), 1);
        assert_eq!(reassembler.push(addr(1), &continuation(b"w!")), Some(b"new!".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_evicts_buffer() {
        let reassembler = Reassembler::new();
        assert_eq!(reassembler.push(addr(1), &first(100, b"partial")), None);

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(reassembler.pending(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(reassembler.pending(), 0);

        let rest = vec![1u8; 93];
        assert_eq!(reassembler.push(addr(1), &continuation(&rest)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_spares_replacement() {
        let reassembler = Reassembler::new();
        reassembler.push(addr(1), &first(10, b"one"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        reassembler.push(addr(1), &first(10, b"two"));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(reassembler.pending(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(reassembler.pending(), 0);
    }
}
