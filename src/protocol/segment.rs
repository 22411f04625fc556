//! Length-prefixed segments.
//!
//! A segment is a u32 big-endian length followed by that many bytes. It is
//! the unit for request names, header keys and header values.

use super::ProtocolError;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the segment length prefix.
pub const SEGMENT_PREFIX_SIZE: usize = 4;

/// Append a segment to `buf`.
pub fn put_segment(buf: &mut Vec<u8>, data: &[u8]) -> Result<(), ProtocolError> {
    let len = u32::try_from(data.len()).map_err(|_| ProtocolError::TooLarge(data.len()))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(data);
    Ok(())
}

/// Read a u32 big-endian length, then read exactly that many bytes.
///
/// A length above `limit` is refused before any of the segment is read.
pub async fn read_segment<R>(
    reader: &mut R,
    limit: usize,
    what: &'static str,
) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let size = reader.read_u32().await? as usize;
    check_size(size, limit, what)?;
    read_exact_limited(reader, size, what).await
}

/// Refuse a size announced above `limit`.
pub fn check_size(size: usize, limit: usize, what: &'static str) -> Result<(), ProtocolError> {
    if size > limit {
        return Err(ProtocolError::Oversized { what, size, limit });
    }
    Ok(())
}

/// Read exactly `size` bytes, growing the buffer as data arrives.
pub async fn read_exact_limited<R>(
    reader: &mut R,
    size: usize,
    what: &'static str,
) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut data = Vec::with_capacity(size.min(4096));
    let read = reader.take(size as u64).read_to_end(&mut data).await?;
    if read != size {
        return Err(ProtocolError::Truncated {
            what,
            expected: size,
            actual: read,
        });
    }
    Ok(data)
}

/// Split a segment off the front of an in-memory block.
pub fn take_segment<'a>(block: &mut &'a [u8], what: &'static str) -> Result<&'a [u8], ProtocolError> {
    if block.len() < SEGMENT_PREFIX_SIZE {
        return Err(ProtocolError::Truncated {
            what,
            expected: SEGMENT_PREFIX_SIZE,
            actual: block.len(),
        });
    }
    let size = u32::from_be_bytes([block[0], block[1], block[2], block[3]]) as usize;
    let rest = &block[SEGMENT_PREFIX_SIZE..];
    if rest.len() < size {
        return Err(ProtocolError::Truncated {
            what,
            expected: size,
            actual: rest.len(),
        });
    }
    let (segment, tail) = rest.split_at(size);
    *block = tail;
    Ok(segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_segment_roundtrip() {
        let mut buf = Vec::new();
        put_segment(&mut buf, b"hello").unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);

        let mut reader = buf.as_slice();
        let segment = read_segment(&mut reader, 64, "name").await.unwrap();
        assert_eq!(segment, b"hello");
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_short_segment_is_truncated() {
        let buf = [0u8, 0, 0, 8, b'a', b'b'];
        let mut reader = &buf[..];
        let err = read_segment(&mut reader, 64, "name").await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                expected: 8,
                actual: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_prefix_is_io_error() {
        let buf = [0u8, 1];
        let mut reader = &buf[..];
        let err = read_segment(&mut reader, 64, "name").await.unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[tokio::test]
    async fn test_oversized_prefix_is_refused() {
        // Announces 4 GiB - 1 with nothing behind it.
        let buf = [0xffu8, 0xff, 0xff, 0xff];
        let mut reader = &buf[..];
        let err = read_segment(&mut reader, 1024, "name").await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Oversized {
                size: 0xffff_ffff,
                limit: 1024,
                ..
            }
        ));

        let mut buf = Vec::new();
        put_segment(&mut buf, &[1u8; 1024]).unwrap();
        let mut reader = buf.as_slice();
        assert_eq!(read_segment(&mut reader, 1024, "name").await.unwrap().len(), 1024);
    }

    #[test]
    fn test_take_segment() {
        let mut buf = Vec::new();
        put_segment(&mut buf, b"k").unwrap();
        put_segment(&mut buf, b"").unwrap();

        let mut block = buf.as_slice();
        assert_eq!(take_segment(&mut block, "key").unwrap(), b"k");
        assert_eq!(take_segment(&mut block, "value").unwrap(), b"");
        assert!(block.is_empty());
        assert!(take_segment(&mut block, "key").is_err());
    }
}
