//! Fragment framing for multicast datagrams.
//!
//! ```text
//! byte    : 0 (framing marker)
//! u16-be  : checksum (65535 XOR size)
//! u16-be  : size of the reassembled payload, 0 on continuation fragments
//! bytes   : fragment payload
//! ```

use super::BroadcastError;

/// Size of the fragment header.
pub const HEADER_SIZE: usize = 5;

/// Largest payload a single announcement may carry.
pub const MAX_PAYLOAD: usize = 65531;

const CONTINUATION: [u8; HEADER_SIZE] = [0; HEADER_SIZE];

/// A decoded datagram.
#[derive(Debug, PartialEq, Eq)]
pub enum Fragment<'a> {
    /// First fragment, carrying the total payload size.
    Start { size: usize, payload: &'a [u8] },
    /// Bytes to append to the source's pending buffer.
    Continuation(&'a [u8]),
    /// A zero-marked datagram whose header does not check out.
    Invalid,
}

/// Prefix `payload` with a size-bearing header.
pub fn pack_buffer(payload: &[u8]) -> Result<Vec<u8>, BroadcastError> {
    pack_first(payload, payload.len())
}

/// Decode the header of one datagram.
///
/// Datagrams that do not start with the framing marker are continuation
/// bytes in their entirety.
pub fn parse_packet_buffer(block: &[u8]) -> Fragment<'_> {
    match block.first() {
        None => return Fragment::Invalid,
        Some(&marker) if marker != 0 => return Fragment::Continuation(block),
        Some(_) => {}
    }
    if block.len() < HEADER_SIZE {
        return Fragment::Invalid;
    }

    let checksum = u16::from_be_bytes([block[1], block[2]]);
    let size = u16::from_be_bytes([block[3], block[4]]);
    let payload = &block[HEADER_SIZE..];
    if size == 0 {
        return Fragment::Continuation(payload);
    }
    if checksum ^ size != u16::MAX || (size as usize) < payload.len() {
        return Fragment::Invalid;
    }
    Fragment::Start {
        size: size as usize,
        payload,
    }
}

/// Split `payload` into datagrams of at most `mtu` bytes, each with a
/// header.
pub fn fragment(payload: &[u8], mtu: usize) -> Result<Vec<Vec<u8>>, BroadcastError> {
    if mtu <= HEADER_SIZE {
        return Err(BroadcastError::MtuTooSmall(mtu));
    }
    let chunk = mtu - HEADER_SIZE;
    let mut chunks = payload.chunks(chunk);

    let first = chunks.next().unwrap_or_default();
    let mut blocks = vec![pack_first(first, payload.len())?];
    for rest in chunks {
        let mut block = Vec::with_capacity(HEADER_SIZE + rest.len());
        block.extend_from_slice(&CONTINUATION);
        block.extend_from_slice(rest);
        blocks.push(block);
    }
    Ok(blocks)
}

/// Header declaring `total` bytes, followed by the first chunk.
fn pack_first(first: &[u8], total: usize) -> Result<Vec<u8>, BroadcastError> {
    if total > MAX_PAYLOAD {
        return Err(BroadcastError::TooLarge(total));
    }
    let size = total as u16;
    let mut buf = Vec::with_capacity(HEADER_SIZE + first.len());
    buf.push(0);
    buf.extend_from_slice(&(u16::MAX ^ size).to_be_bytes());
    buf.extend_from_slice(&size.to_be_bytes());
    buf.extend_from_slice(first);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_then_parse() {
        let packed = pack_buffer(b"hello").unwrap();
        assert_eq!(&packed[..HEADER_SIZE], &[0, 0xff, 0xfa, 0, 5]);
        assert_eq!(
            parse_packet_buffer(&packed),
            Fragment::Start {
                size: 5,
                payload: b"hello"
            }
        );
    }

    #[test]
    fn test_too_large() {
        let payload = vec![7u8; MAX_PAYLOAD + 1];
        assert!(matches!(pack_buffer(&payload), Err(BroadcastError::TooLarge(65532))));
        assert!(pack_buffer(&payload[..MAX_PAYLOAD]).is_ok());
    }

    #[test]
    fn test_parse_rejects_bad_headers() {
        assert_eq!(parse_packet_buffer(&[]), Fragment::Invalid);
        assert_eq!(parse_packet_buffer(&[0, 1, 2]), Fragment::Invalid);
        // Checksum does not match the size.
        assert_eq!(parse_packet_buffer(&[0, 0, 0, 0, 3, 1, 2, 3]), Fragment::Invalid);
        // Payload longer than the declared size.
        let mut packed = pack_buffer(b"ab").unwrap();
        packed.push(b'c');
        assert_eq!(parse_packet_buffer(&packed), Fragment::Invalid);
    }

    #[test]
    fn test_parse_continuations() {
        assert_eq!(
            parse_packet_buffer(&[0, 0, 0, 0, 0, 9, 8]),
            Fragment::Continuation(&[9, 8])
        );
        assert_eq!(parse_packet_buffer(&[4, 5, 6]), Fragment::Continuation(&[4, 5, 6]));
    }

    #[test]
    fn test_fragment_splits_on_mtu() {
        let payload: Vec<u8> = (0..25u8).collect();
        let blocks = fragment(&payload, 15).unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.len() <= 15));

        assert_eq!(
            parse_packet_buffer(&blocks[0]),
            Fragment::Start {
                size: 25,
                payload: &payload[..10]
            }
        );
        assert_eq!(&blocks[1][..HEADER_SIZE], &CONTINUATION);
        assert_eq!(&blocks[2][HEADER_SIZE..], &payload[20..]);
    }

    #[test]
    fn test_fragment_single_block() {
        let blocks = fragment(b"tiny", 1500).unwrap();
        assert_eq!(blocks, vec![pack_buffer(b"tiny").unwrap()]);
        assert!(matches!(fragment(b"x", 5), Err(BroadcastError::MtuTooSmall(5))));
    }
}
